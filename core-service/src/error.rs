//! Engine Errors
//!
//! Một enum lỗi duy nhất cho toàn bộ engine (train / export / inference).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias cho engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur inside the anomaly engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Not enough vectors/windows to do the requested work.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Input tensor has the wrong feature count or rank.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Package config disagrees with the requested architecture (or is absent).
    #[error("config mismatch: {0}")]
    ConfigMismatch(String),

    /// Package path absent or unreadable.
    #[error("model not found: {path}")]
    MissingModel { path: PathBuf },

    /// Package bytes are corrupt or malformed.
    #[error("invalid model package: {0}")]
    InvalidPackage(String),

    /// Caller passed an out-of-range parameter.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Raw input values are unusable (NaN, infinite, malformed JSON payload).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Loss became NaN/inf during training.
    #[error("numeric instability at epoch {epoch}: loss = {loss}")]
    NumericInstability { epoch: usize, loss: f32 },

    /// Exported graph does not reproduce the source model.
    #[error("export verification failed: max abs diff {max_diff:e} > {tolerance:e}")]
    ExportVerification { max_diff: f32, tolerance: f32 },

    /// Package was trained against a different feature layout.
    #[error("feature layout mismatch: expected v{expected_version} ({expected_hash:08x}), got v{actual_version} ({actual_hash:08x})")]
    LayoutMismatch {
        expected_version: u8,
        expected_hash: u32,
        actual_version: u8,
        actual_hash: u32,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn shape(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// `MissingModel` là lỗi duy nhất được phép fallback sang heuristic.
    pub fn is_missing_model(&self) -> bool {
        matches!(self, Self::MissingModel { .. })
    }
}
