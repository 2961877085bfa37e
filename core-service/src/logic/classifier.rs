//! Classifier Dataset - Labeled records cho supervised classifier
//!
//! Chỉ phần boundary: đọc JSONL, suy ra label, ghi `.meta` sidecar.
//! Thuật toán train classifier nằm ngoài engine này.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::constants::FEATURE_COUNT;
use crate::error::Result;

/// Engine tag written into the metadata sidecar
pub const CLASSIFIER_ENGINE: &str = "onnx-randomforest";

// ============================================================================
// RECORDS
// ============================================================================

/// One JSONL line from the dataset export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierRecord {
    pub features: Vec<f32>,
    #[serde(default, deserialize_with = "text_label")]
    pub threat: Option<String>,
    /// Kept raw: any truthy value overrides `threat`, even a non-string one
    #[serde(default)]
    pub user_label: Value,
}

/// Non-string threats count as no label rather than a bad record
fn text_label<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(label) => Some(label),
        _ => None,
    })
}

/// Null, false, 0, "" and empty containers are falsy
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

impl ClassifierRecord {
    /// A truthy user override wins; a non-string override yields no label
    pub fn effective_label(&self) -> Option<&str> {
        if is_truthy(&self.user_label) {
            self.user_label.as_str()
        } else {
            self.threat.as_deref()
        }
    }

    /// Only "malicious" is positive; suspicious counts as benign
    pub fn is_malicious(&self) -> bool {
        self.effective_label()
            .map(|label| label.to_lowercase().contains("malicious"))
            .unwrap_or(false)
    }
}

/// Parse JSONL text; bad lines and wrong-width records are skipped
pub fn parse_records(text: &str) -> Vec<ClassifierRecord> {
    text.lines()
        .filter_map(|line| serde_json::from_str::<ClassifierRecord>(line).ok())
        .filter(|record| record.features.len() == FEATURE_COUNT)
        .collect()
}

pub fn load_records(path: &Path) -> Result<Vec<ClassifierRecord>> {
    let text = fs::read_to_string(path)?;
    let records = parse_records(&text);
    log::info!("Loaded {} valid records from {}", records.len(), path.display());
    Ok(records)
}

// ============================================================================
// METADATA SIDECAR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierMetadata {
    /// "vYYYY.MM.DD"
    pub version: String,
    pub records: usize,
    pub features: usize,
    /// Unix seconds
    pub created_at: i64,
    pub engine: String,
}

impl ClassifierMetadata {
    pub fn new(records: usize, features: usize) -> Self {
        Self {
            version: format!("v{}", Local::now().format("%Y.%m.%d")),
            records,
            features,
            created_at: Utc::now().timestamp(),
            engine: CLASSIFIER_ENGINE.to_string(),
        }
    }
}

/// `model.onnx` → `model.meta`
pub fn metadata_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("meta")
}

pub fn save_metadata(model_path: &Path, metadata: &ClassifierMetadata) -> Result<PathBuf> {
    let path = metadata_path(model_path);
    fs::write(&path, serde_json::to_vec_pretty(metadata)?)?;
    log::info!("Classifier metadata saved to {}", path.display());
    Ok(path)
}
