//! Inference - Autoencoder Scoring
//!
//! Stateless: mọi thông tin (config, stats, threshold) lấy từ package truyền vào.
//! Live window → shape check → pad/truncate → normalize → reconstruction error → verdict.

use std::sync::Arc;
use std::time::Instant;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::package::ModelPackage;
use crate::error::{EngineError, Result};
use crate::logic::features::{normalize, prepare_inference_window, stack_rows};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Which scorer produced a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMethod {
    Autoencoder,
    Heuristic,
}

/// Scoring output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub score: f32,              // 0.0 - 1.0
    pub is_anomaly: bool,
    pub confidence: f32,         // 0.0 - 1.0
    pub raw_mse: Option<f32>,    // None for heuristic
    pub threshold: Option<f32>,  // None for heuristic
    pub method: ScoringMethod,
    pub inference_time_us: u64,
}

// ============================================================================
// SCORING
// ============================================================================

/// Map a reconstruction error to a verdict.
///
/// score = min(1, e / 2t), confidence = min(1, 0.5 + 0.5·|e − t| / t), anomaly iff e > t.
pub fn verdict_from_error(error: f32, threshold: f32) -> AnomalyVerdict {
    let score = (error / (threshold * 2.0)).min(1.0);
    let distance = (error - threshold).abs() / threshold;
    let confidence = (0.5 + distance * 0.5).min(1.0);

    AnomalyVerdict {
        score,
        is_anomaly: error > threshold,
        confidence,
        raw_mse: Some(error),
        threshold: Some(threshold),
        method: ScoringMethod::Autoencoder,
        inference_time_us: 0,
    }
}

/// Score a live history (N, F) with a trained package
pub fn score(package: &ModelPackage, history: ArrayView2<f32>) -> Result<AnomalyVerdict> {
    let start_time = Instant::now();
    let config = package.config();

    if history.ncols() != config.input_dim {
        return Err(EngineError::shape(
            format!("{} features", config.input_dim),
            format!("{} features", history.ncols()),
        ));
    }
    if history.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::InvalidInput(
            "sequence contains non-finite values".to_string(),
        ));
    }

    let window = prepare_inference_window(history, config.sequence_length)?;
    let normalized = normalize::apply(package.normalization(), window.view())?;
    let error = package.model().reconstruction_error(normalized.view())?;

    let mut verdict = verdict_from_error(error, package.threshold());
    verdict.inference_time_us = start_time.elapsed().as_micros() as u64;

    log::debug!(
        "Scored window: mse={:.6} threshold={:.6} score={:.3} anomaly={}",
        error,
        package.threshold(),
        verdict.score,
        verdict.is_anomaly
    );

    Ok(verdict)
}

/// `score` over JSON-style rows
pub fn score_rows(package: &ModelPackage, rows: &[Vec<f32>]) -> Result<AnomalyVerdict> {
    let history = stack_rows(rows)?;
    score(package, history.view())
}

/// Run `score` on tokio's blocking pool
pub async fn score_async(package: Arc<ModelPackage>, history: Array2<f32>) -> Result<AnomalyVerdict> {
    tokio::task::spawn_blocking(move || score(&package, history.view()))
        .await
        .map_err(|e| EngineError::Io(std::io::Error::new(std::io::ErrorKind::Other, format!("Task failed: {}", e))))?
}
