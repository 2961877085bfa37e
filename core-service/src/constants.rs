//! Central Configuration Constants
//!
//! Single source of truth for all engine defaults.
//! Training, export và inference đều đọc từ đây - không hard-code ở chỗ khác.

use std::path::PathBuf;

pub use crate::logic::features::layout::FEATURE_COUNT;

/// Default sequence length (L)
pub const DEFAULT_SEQUENCE_LENGTH: usize = 5;

/// Recurrent hidden dimension
pub const DEFAULT_HIDDEN_DIM: usize = 64;

/// Latent (bottleneck) dimension
pub const DEFAULT_LATENT_DIM: usize = 32;

/// Number of stacked recurrent layers
pub const DEFAULT_NUM_LAYERS: usize = 2;

pub const DEFAULT_EPOCHS: usize = 100;
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_LEARNING_RATE: f32 = 0.001;

/// Percentile of normal reconstruction errors used as the decision threshold
pub const DEFAULT_PERCENTILE: f32 = 95.0;

/// Epochs without validation improvement before the learning rate is halved
pub const DEFAULT_PLATEAU_PATIENCE: usize = 10;

/// Learning rate multiplier on plateau
pub const PLATEAU_FACTOR: f32 = 0.5;

/// Gradient norm ceiling
pub const DEFAULT_MAX_GRAD_NORM: f32 = 1.0;

/// Fraction of windows used for training (rest = validation)
pub const TRAIN_SPLIT: f32 = 0.8;

/// Default RNG seed for weight init / shuffling
pub const DEFAULT_SEED: u64 = 42;

/// Floor for calibrated thresholds (score divides by threshold)
pub const MIN_THRESHOLD: f32 = 1e-8;

/// Heuristic verdict cutoff
pub const HEURISTIC_ANOMALY_SCORE: f32 = 0.6;

/// Model package file name
pub const DEFAULT_MODEL_FILE: &str = "model.osae";

/// App name
pub const APP_NAME: &str = "One-Shield";

/// Engine version
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Default model directory (per-user data dir)
pub fn default_model_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ai-security")
        .join("models")
}

/// Get model package path from environment or use default
pub fn get_model_path() -> PathBuf {
    std::env::var("AI_ENGINE_MODEL_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_model_dir().join(DEFAULT_MODEL_FILE))
}

/// Get RNG seed from environment or use default
pub fn get_seed() -> u64 {
    std::env::var("AI_ENGINE_SEED")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_SEED)
}

/// Get training epochs from environment or use default
pub fn get_epochs() -> usize {
    std::env::var("AI_ENGINE_EPOCHS")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_EPOCHS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model_path_has_file_name() {
        let dir = default_model_dir();
        assert!(dir.ends_with("models"));
        assert_eq!(
            dir.join(DEFAULT_MODEL_FILE).file_name().and_then(|n| n.to_str()),
            Some(DEFAULT_MODEL_FILE)
        );
    }

    #[test]
    fn test_bottleneck_defaults() {
        // latent < hidden < L*F
        assert!(DEFAULT_LATENT_DIM < DEFAULT_HIDDEN_DIM);
        assert!(DEFAULT_HIDDEN_DIM < DEFAULT_SEQUENCE_LENGTH * FEATURE_COUNT);
    }
}
