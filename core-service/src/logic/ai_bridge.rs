//! AI Bridge - Inference Request/Response Protocol
//!
//! Nhận request JSON `{model_path?, sequence}`, trả về response JSON luôn luôn
//! (kể cả khi lỗi). Không có model → heuristic fallback kèm warning.
//!
//! Package đã load được cache trong `ModelStore` (caller sở hữu, không global),
//! key theo path + mtime để model mới train được nhận ngay.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants::get_model_path;
use crate::error::{EngineError, Result};
use crate::logic::features::stack_rows;
use crate::logic::model::{heuristic_score, score, AnomalyVerdict, ModelPackage, ScoringMethod};

/// Warning attached to heuristic responses
pub const FALLBACK_WARNING: &str = "Model not found, using heuristic";

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// `sequence` accepts a list of vectors or one bare vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SequenceInput {
    Many(Vec<Vec<f32>>),
    Single(Vec<f32>),
}

impl SequenceInput {
    pub fn into_rows(self) -> Vec<Vec<f32>> {
        match self {
            SequenceInput::Many(rows) => rows,
            SequenceInput::Single(row) => vec![row],
        }
    }
}

/// Inference request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    pub sequence: SequenceInput,
}

/// Inference response, produced for every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub score: f32,
    pub is_anomaly: bool,
    pub confidence: f32,
    /// Always present; null for heuristic / error
    pub raw_mse: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<ScoringMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub inference_time_us: u64,
}

impl From<AnomalyVerdict> for InferenceResponse {
    fn from(verdict: AnomalyVerdict) -> Self {
        Self {
            score: verdict.score,
            is_anomaly: verdict.is_anomaly,
            confidence: verdict.confidence,
            raw_mse: verdict.raw_mse,
            threshold: verdict.threshold,
            method: Some(verdict.method),
            warning: None,
            error: None,
            inference_time_us: verdict.inference_time_us,
        }
    }
}

impl InferenceResponse {
    /// score 0, not anomalous, confidence 0
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            is_anomaly: false,
            confidence: 0.0,
            raw_mse: None,
            threshold: None,
            method: None,
            warning: None,
            error: Some(message.into()),
            inference_time_us: 0,
        }
    }
}

// ============================================================================
// MODEL STORE
// ============================================================================

/// Same mtime and size → treated as the same file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

#[derive(Debug, Clone)]
struct CachedPackage {
    stamp: FileStamp,
    package: Arc<ModelPackage>,
}

/// Cache of loaded packages keyed by path; reloads when the file changes
#[derive(Debug, Default)]
pub struct ModelStore {
    cache: RwLock<HashMap<PathBuf, CachedPackage>>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loaded package for `path`. Absent file → `MissingModel`.
    pub fn get(&self, path: &Path) -> Result<Arc<ModelPackage>> {
        let stamp = match fs::metadata(path) {
            Ok(meta) => FileStamp {
                modified: meta.modified().ok(),
                len: meta.len(),
            },
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                self.cache.write().remove(path);
                return Err(EngineError::MissingModel {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(cached) = self.cache.read().get(path) {
            if cached.stamp.modified.is_some() && cached.stamp == stamp {
                return Ok(Arc::clone(&cached.package));
            }
        }

        let package = Arc::new(ModelPackage::load(path)?);
        self.cache.write().insert(
            path.to_path_buf(),
            CachedPackage {
                stamp,
                package: Arc::clone(&package),
            },
        );
        Ok(package)
    }

    pub fn invalidate(&self, path: &Path) {
        self.cache.write().remove(path);
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

// ============================================================================
// REQUEST HANDLING
// ============================================================================

/// Score one request; never fails, errors become error responses
pub fn handle_request(store: &ModelStore, request: InferenceRequest) -> InferenceResponse {
    let model_path = request.model_path.unwrap_or_else(get_model_path);
    let history = match stack_rows(&request.sequence.into_rows()) {
        Ok(history) => history,
        Err(e) => return InferenceResponse::failure(e.to_string()),
    };

    match store.get(&model_path) {
        Ok(package) => match score(&package, history.view()) {
            Ok(verdict) => verdict.into(),
            Err(e) => InferenceResponse::failure(e.to_string()),
        },
        Err(e) if e.is_missing_model() => {
            log::warn!("No model at {}, using heuristic", model_path.display());
            match heuristic_score(history.view()) {
                Ok(verdict) => InferenceResponse {
                    warning: Some(FALLBACK_WARNING.to_string()),
                    ..InferenceResponse::from(verdict)
                },
                Err(e) => InferenceResponse::failure(e.to_string()),
            }
        }
        Err(e) => {
            log::error!("Cannot use model {}: {}", model_path.display(), e);
            InferenceResponse::failure(e.to_string())
        }
    }
}

/// Parse a raw JSON request and handle it
pub fn handle_json(store: &ModelStore, input: &str) -> InferenceResponse {
    match serde_json::from_str::<InferenceRequest>(input) {
        Ok(request) => handle_request(store, request),
        Err(e) => InferenceResponse::failure(format!("invalid request: {}", e)),
    }
}
