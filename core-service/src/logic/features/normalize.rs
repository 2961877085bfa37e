//! Min-Max Normalizer
//!
//! Stats được fit một lần trên training corpus và đi kèm model package.
//! Inference luôn dùng stats của package truyền vào - không có global state.

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Per-feature min/max từ training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub min_vals: Vec<f32>,
    pub max_vals: Vec<f32>,
}

impl NormalizationStats {
    /// Identity stats: min 0, max 1 for every feature
    pub fn identity(feature_count: usize) -> Self {
        Self {
            min_vals: vec![0.0; feature_count],
            max_vals: vec![1.0; feature_count],
        }
    }

    pub fn feature_count(&self) -> usize {
        self.min_vals.len()
    }

    /// Range per feature; zero range → 1 (feature becomes a no-op offset)
    pub fn ranges(&self) -> Vec<f32> {
        self.min_vals
            .iter()
            .zip(&self.max_vals)
            .map(|(min, max)| {
                let range = max - min;
                if range == 0.0 {
                    1.0
                } else {
                    range
                }
            })
            .collect()
    }

    /// Check invariants: equal lengths, finite values, max >= min
    pub fn validate(&self) -> Result<()> {
        if self.min_vals.len() != self.max_vals.len() {
            return Err(EngineError::shape(
                format!("{} max values", self.min_vals.len()),
                format!("{} max values", self.max_vals.len()),
            ));
        }
        for (i, (min, max)) in self.min_vals.iter().zip(&self.max_vals).enumerate() {
            if !min.is_finite() || !max.is_finite() || max < min {
                return Err(EngineError::InvalidInput(format!(
                    "normalization feature {}: min={} max={}",
                    i, min, max
                )));
            }
        }
        Ok(())
    }
}

/// Fit per-feature min/max over an (N, F) matrix
pub fn fit(raw: ArrayView2<f32>) -> Result<NormalizationStats> {
    if raw.nrows() == 0 || raw.ncols() == 0 {
        return Err(EngineError::InsufficientData(
            "cannot fit normalization on an empty corpus".to_string(),
        ));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::InvalidInput(
            "training corpus contains non-finite values".to_string(),
        ));
    }

    let min_vals = raw
        .axis_iter(Axis(1))
        .map(|col| col.iter().copied().fold(f32::INFINITY, f32::min))
        .collect();
    let max_vals = raw
        .axis_iter(Axis(1))
        .map(|col| col.iter().copied().fold(f32::NEG_INFINITY, f32::max))
        .collect();

    Ok(NormalizationStats { min_vals, max_vals })
}

/// Scale every value to [0, 1] with the given stats
pub fn apply(stats: &NormalizationStats, vectors: ArrayView2<f32>) -> Result<Array2<f32>> {
    if vectors.ncols() != stats.feature_count() {
        return Err(EngineError::shape(
            format!("{} features", stats.feature_count()),
            format!("{} features", vectors.ncols()),
        ));
    }

    let ranges = stats.ranges();
    let mut normalized = vectors.to_owned();
    for mut row in normalized.axis_iter_mut(Axis(0)) {
        for (j, value) in row.iter_mut().enumerate() {
            *value = ((*value - stats.min_vals[j]) / ranges[j]).clamp(0.0, 1.0);
        }
    }

    Ok(normalized)
}
