//! Training Pipeline - Data → Model Package
//!
//! load/generate → fit normalization → windows → split 80/20 (theo thời gian)
//! → train → calibrate (p95 trên training windows) → save package.
//!
//! Kết quả in ra một dòng `[RESULT]{...}` để process cha parse.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{
    get_model_path, DEFAULT_HIDDEN_DIM, DEFAULT_LATENT_DIM,
    DEFAULT_NUM_LAYERS, DEFAULT_PERCENTILE, DEFAULT_SEQUENCE_LENGTH, FEATURE_COUNT, TRAIN_SPLIT,
};
use crate::error::{EngineError, Result};
use crate::logic::features::{build_training_windows, normalize, stack_rows};
use crate::logic::model::synthetic::{generate_synthetic, DEFAULT_SYNTHETIC_SAMPLES};
use crate::logic::model::{
    calibrate, train, ModelConfig, ModelPackage, ModelVariant, Provenance, SequenceAutoencoder,
    TrainerOptions,
};

/// Result line prefix
pub const RESULT_PREFIX: &str = "[RESULT]";

// ============================================================================
// REQUEST / SUMMARY
// ============================================================================

/// Everything a training run needs; unset fields take engine defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingRequest {
    /// JSON training data (app export or plain array)
    pub data_path: Option<PathBuf>,
    /// Generate N synthetic vectors instead of reading data
    pub synthetic_samples: usize,
    pub output: PathBuf,
    #[serde(alias = "model_type")]
    pub variant: ModelVariant,
    pub sequence_length: usize,
    pub hidden_dim: usize,
    pub latent_dim: usize,
    pub num_layers: usize,
    pub percentile: f32,
    #[serde(flatten)]
    pub trainer: TrainerOptions,
}

impl Default for TrainingRequest {
    fn default() -> Self {
        Self {
            data_path: None,
            synthetic_samples: 0,
            output: get_model_path(),
            variant: ModelVariant::default(),
            sequence_length: DEFAULT_SEQUENCE_LENGTH,
            hidden_dim: DEFAULT_HIDDEN_DIM,
            latent_dim: DEFAULT_LATENT_DIM,
            num_layers: DEFAULT_NUM_LAYERS,
            percentile: DEFAULT_PERCENTILE,
            trainer: TrainerOptions::default(),
        }
    }
}

impl TrainingRequest {
    /// Blank input means all defaults
    pub fn from_json(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(input)?)
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            input_dim: FEATURE_COUNT,
            hidden_dim: self.hidden_dim,
            latent_dim: self.latent_dim,
            num_layers: self.num_layers,
            sequence_length: self.sequence_length,
        }
    }
}

/// Success summary printed after `[RESULT]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub success: bool,
    pub model_path: PathBuf,
    pub model_type: ModelVariant,
    pub sequence_length: usize,
    pub features: usize,
    pub threshold: f32,
    pub best_loss: f32,
    pub epochs: usize,
}

#[derive(Debug, Serialize)]
struct FailureSummary<'a> {
    success: bool,
    error: &'a str,
}

/// `[RESULT]{...}` line for a finished run (success or failure)
pub fn result_line<T: Serialize>(outcome: &Result<T>) -> String {
    let body = match outcome {
        Ok(summary) => serde_json::to_string(summary),
        Err(e) => {
            let message = e.to_string();
            serde_json::to_string(&FailureSummary {
                success: false,
                error: &message,
            })
        }
    };
    match body {
        Ok(json) => format!("{}{}", RESULT_PREFIX, json),
        Err(e) => format!("{}{{\"success\":false,\"error\":\"{}\"}}", RESULT_PREFIX, e),
    }
}

// ============================================================================
// DATA LOADING
// ============================================================================

/// Parse training JSON: `{"version", "data": [{"features"}]}` or `[{"features"}]`.
///
/// Vectors shorter than F are skipped, longer ones truncated to F.
pub fn parse_training_data(bytes: &[u8]) -> Result<Array2<f32>> {
    let root: Value = serde_json::from_slice(bytes)?;

    let items = match &root {
        Value::Object(map) if map.contains_key("data") => {
            log::info!(
                "Detected app export format (v{}), exported at {}, {} samples",
                map.get("version").and_then(Value::as_str).unwrap_or("?"),
                map.get("exported_at").and_then(Value::as_str).unwrap_or("unknown"),
                map.get("total_samples").map(|v| v.to_string()).unwrap_or_else(|| "?".to_string())
            );
            map.get("data").and_then(Value::as_array)
        }
        Value::Array(items) => Some(items),
        _ => None,
    };

    let mut skipped = 0usize;
    let rows: Vec<Vec<f32>> = items
        .into_iter()
        .flatten()
        .filter_map(|item| {
            let features = item.get("features")?.as_array()?;
            let values: Option<Vec<f32>> = features
                .iter()
                .take(FEATURE_COUNT)
                .map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            match values {
                Some(row) if row.len() == FEATURE_COUNT => Some(row),
                _ => {
                    skipped += 1;
                    None
                }
            }
        })
        .collect();

    if skipped > 0 {
        log::warn!("Skipped {} entries with fewer than {} features", skipped, FEATURE_COUNT);
    }
    if rows.is_empty() {
        return Err(EngineError::InsufficientData(
            "no valid vectors in training data".to_string(),
        ));
    }

    stack_rows(&rows)
}

pub fn load_training_data(path: &Path) -> Result<Array2<f32>> {
    let bytes = std::fs::read(path)?;
    let data = parse_training_data(&bytes)?;
    log::info!("Loaded {} vectors from {}", data.nrows(), path.display());
    Ok(data)
}

/// Chronological split: first `ratio` of windows train, rest validate
pub fn split_windows(mut windows: Vec<Array2<f32>>, ratio: f32) -> (Vec<Array2<f32>>, Vec<Array2<f32>>) {
    let split = ((windows.len() as f32) * ratio) as usize;
    let validation = windows.split_off(split.min(windows.len()));
    (windows, validation)
}

// ============================================================================
// PIPELINE
// ============================================================================

fn raw_corpus(request: &TrainingRequest) -> Result<Array2<f32>> {
    if request.synthetic_samples > 0 {
        return Ok(generate_synthetic(request.synthetic_samples, request.trainer.seed));
    }
    match &request.data_path {
        Some(path) => load_training_data(path),
        None => {
            log::info!("No data specified, generating {} synthetic samples", DEFAULT_SYNTHETIC_SAMPLES);
            Ok(generate_synthetic(DEFAULT_SYNTHETIC_SAMPLES, request.trainer.seed))
        }
    }
}

/// Train, calibrate and package from an already-loaded raw corpus
pub fn train_package(raw: &Array2<f32>, request: &TrainingRequest) -> Result<ModelPackage> {
    let config = request.model_config();
    config.validate()?;

    let stats = normalize::fit(raw.view())?;
    let normalized = normalize::apply(&stats, raw.view())?;
    let windows = build_training_windows(normalized.view(), config.sequence_length)?;
    let (train_windows, val_windows) = split_windows(windows, TRAIN_SPLIT);
    if train_windows.is_empty() {
        return Err(EngineError::InsufficientData(
            "no windows left for training after split".to_string(),
        ));
    }
    log::info!(
        "Windows: {} train, {} validation (L={})",
        train_windows.len(),
        val_windows.len(),
        config.sequence_length
    );

    let mut model = SequenceAutoencoder::new(request.variant, config, request.trainer.seed)?;
    let history = train(&mut model, &train_windows, Some(&val_windows), &request.trainer)?;
    let threshold = calibrate(&model, &train_windows, request.percentile)?;

    ModelPackage::new(model, stats, threshold, Provenance::from_history(&history))
}

/// Full training run: data → package on disk → summary
pub fn run_training(request: &TrainingRequest) -> Result<TrainingSummary> {
    log::info!(
        "Training {} autoencoder: L={}, hidden={}, latent={}, layers={}",
        request.variant,
        request.sequence_length,
        request.hidden_dim,
        request.latent_dim,
        request.num_layers
    );

    let raw = raw_corpus(request)?;
    let package = train_package(&raw, request)?;
    package.save(&request.output)?;

    Ok(TrainingSummary {
        success: true,
        model_path: request.output.clone(),
        model_type: package.variant(),
        sequence_length: package.config().sequence_length,
        features: package.config().input_dim,
        threshold: package.threshold(),
        best_loss: package.provenance().best_loss,
        epochs: package.provenance().epochs_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_app_export_format() {
        let json = serde_json::json!({
            "version": "1.0",
            "exported_at": "2024-01-01T00:00:00Z",
            "total_samples": 3,
            "data": [
                {"features": vec![1.0; FEATURE_COUNT]},
                {"features": vec![2.0; FEATURE_COUNT + 3]},
                {"features": vec![3.0; FEATURE_COUNT - 1]},
                {"other": 1}
            ]
        });
        let data = parse_training_data(json.to_string().as_bytes()).unwrap();
        assert_eq!(data.dim(), (2, FEATURE_COUNT));
        assert_eq!(data[[1, 0]], 2.0);
    }

    #[test]
    fn test_parse_plain_array_format() {
        let json = serde_json::json!([{"features": vec![0.5; FEATURE_COUNT]}]);
        let data = parse_training_data(json.to_string().as_bytes()).unwrap();
        assert_eq!(data.nrows(), 1);
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(
            parse_training_data(b"{\"data\": []}"),
            Err(EngineError::InsufficientData(_))
        ));
        assert!(parse_training_data(b"not json").is_err());
    }

    #[test]
    fn test_split_is_chronological() {
        let windows: Vec<Array2<f32>> = (0..10).map(|i| Array2::from_elem((1, 1), i as f32)).collect();
        let (train, val) = split_windows(windows, 0.8);
        assert_eq!(train.len(), 8);
        assert_eq!(val.len(), 2);
        assert_eq!(train[7][[0, 0]], 7.0);
        assert_eq!(val[0][[0, 0]], 8.0);
    }

    #[test]
    fn test_result_line_formats() {
        let failure: Result<TrainingSummary> = Err(EngineError::InsufficientData("x".to_string()));
        let line = result_line(&failure);
        assert!(line.starts_with(RESULT_PREFIX));
        let json: Value = serde_json::from_str(&line[RESULT_PREFIX.len()..]).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("insufficient data"));
    }

    #[test]
    fn test_malformed_request_reports_result_line() {
        assert_eq!(TrainingRequest::from_json("  \n").unwrap(), TrainingRequest::default());

        let outcome = TrainingRequest::from_json("{\"epochs\": ").and_then(|request| run_training(&request));
        assert!(matches!(outcome, Err(EngineError::Serialization(_))));

        let line = result_line(&outcome);
        assert!(line.starts_with(RESULT_PREFIX));
        let json: Value = serde_json::from_str(&line[RESULT_PREFIX.len()..]).unwrap();
        assert_eq!(json["success"], false);
        assert!(!json["error"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_request_defaults_and_aliases() {
        let request: TrainingRequest =
            serde_json::from_str("{\"model_type\": \"gru\", \"epochs\": 3, \"synthetic_samples\": 40}").unwrap();
        assert_eq!(request.variant, ModelVariant::GatedSimple);
        assert_eq!(request.trainer.epochs, 3);
        assert_eq!(request.sequence_length, DEFAULT_SEQUENCE_LENGTH);
        assert_eq!(request.trainer.batch_size, crate::constants::DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_too_little_data_is_insufficient() {
        let raw = Array2::<f32>::zeros((5, FEATURE_COUNT));
        let request = TrainingRequest::default();
        assert!(matches!(
            train_package(&raw, &request),
            Err(EngineError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_run_training_small_synthetic() {
        let dir = TempDir::new().unwrap();
        let request = TrainingRequest {
            synthetic_samples: 30,
            output: dir.path().join("model.osae"),
            variant: ModelVariant::GatedSimple,
            hidden_dim: 8,
            latent_dim: 4,
            num_layers: 1,
            trainer: TrainerOptions {
                epochs: 3,
                batch_size: 8,
                ..Default::default()
            },
            ..Default::default()
        };

        let summary = run_training(&request).unwrap();
        assert!(summary.success);
        assert_eq!(summary.epochs, 3);
        assert_eq!(summary.features, FEATURE_COUNT);
        assert!(summary.threshold > 0.0);

        let package = ModelPackage::load(&request.output).unwrap();
        assert_eq!(package.threshold(), summary.threshold);
        assert_eq!(package.variant(), ModelVariant::GatedSimple);
        assert!(result_line(&Ok(summary)).contains("\"success\":true"));
    }
}
