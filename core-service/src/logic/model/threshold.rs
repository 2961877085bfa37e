//! Threshold Calibration
//!
//! Ngưỡng = percentile của reconstruction error trên windows "normal".
//! Percentile dùng nội suy tuyến tính giữa hai rank gần nhất.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::autoencoder::SequenceAutoencoder;
use crate::constants::MIN_THRESHOLD;
use crate::error::{EngineError, Result};

/// Summary of a calibration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdStats {
    pub threshold: f32,
    pub percentile: f32,
    pub mean_error: f32,
    pub max_error: f32,
    pub sample_count: usize,
}

/// Linear-interpolation percentile (rank = p/100 * (n-1))
pub fn percentile(values: &[f32], pct: f32) -> Result<f32> {
    if values.is_empty() {
        return Err(EngineError::InsufficientData(
            "percentile of an empty set".to_string(),
        ));
    }
    if !(0.0..=100.0).contains(&pct) {
        return Err(EngineError::InvalidParameter(format!(
            "percentile must be in [0, 100], got {}",
            pct
        )));
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = pct as f64 / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = (rank - lower as f64) as f32;

    Ok(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// Per-window reconstruction errors
pub fn reconstruction_errors(model: &SequenceAutoencoder, windows: &[Array2<f32>]) -> Result<Vec<f32>> {
    windows
        .iter()
        .map(|w| model.reconstruction_error(w.view()))
        .collect()
}

/// Calibrate the decision threshold on normal windows
pub fn calibrate(model: &SequenceAutoencoder, windows: &[Array2<f32>], pct: f32) -> Result<f32> {
    Ok(calibrate_with_stats(model, windows, pct)?.threshold)
}

/// `calibrate` plus the error distribution it was taken from
pub fn calibrate_with_stats(
    model: &SequenceAutoencoder,
    windows: &[Array2<f32>],
    pct: f32,
) -> Result<ThresholdStats> {
    if windows.is_empty() {
        return Err(EngineError::InsufficientData(
            "no windows to calibrate on".to_string(),
        ));
    }

    let errors = reconstruction_errors(model, windows)?;
    let raw = percentile(&errors, pct)?;
    if !raw.is_finite() {
        return Err(EngineError::InvalidInput(format!(
            "calibrated threshold is not finite: {}",
            raw
        )));
    }
    let threshold = raw.max(MIN_THRESHOLD);

    let stats = ThresholdStats {
        threshold,
        percentile: pct,
        mean_error: errors.iter().sum::<f32>() / errors.len() as f32,
        max_error: errors.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        sample_count: errors.len(),
    };

    log::info!(
        "Threshold p{} = {:.6} over {} windows (mean {:.6}, max {:.6})",
        pct,
        stats.threshold,
        stats.sample_count,
        stats.mean_error,
        stats.max_error
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::model::config::{ModelConfig, ModelVariant};

    #[test]
    fn test_percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 0.0).unwrap(), 1.0);
        assert_eq!(percentile(&values, 100.0).unwrap(), 5.0);
        assert_eq!(percentile(&values, 50.0).unwrap(), 3.0);
        // rank 0.95 * 4 = 3.8 → 4 + 0.8
        assert!((percentile(&values, 95.0).unwrap() - 4.8).abs() < 1e-5);
    }

    #[test]
    fn test_percentile_unsorted_input() {
        let values = [5.0, 1.0, 4.0, 2.0, 3.0];
        assert_eq!(percentile(&values, 25.0).unwrap(), 2.0);
    }

    #[test]
    fn test_percentile_errors() {
        assert!(matches!(percentile(&[], 95.0), Err(EngineError::InsufficientData(_))));
        assert!(matches!(
            percentile(&[1.0], 101.0),
            Err(EngineError::InvalidParameter(_))
        ));
        assert!(matches!(
            percentile(&[1.0], -1.0),
            Err(EngineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_calibrate_monotone_in_percentile() {
        let config = ModelConfig {
            input_dim: 3,
            hidden_dim: 4,
            latent_dim: 2,
            num_layers: 1,
            sequence_length: 3,
        };
        let model = SequenceAutoencoder::new(ModelVariant::GatedSimple, config, 4).unwrap();
        let windows: Vec<Array2<f32>> = (0..10)
            .map(|i| Array2::from_elem((3, 3), i as f32 * 0.1))
            .collect();

        let p50 = calibrate(&model, &windows, 50.0).unwrap();
        let p95 = calibrate(&model, &windows, 95.0).unwrap();
        assert!(p50 <= p95);
        assert!(p50 >= MIN_THRESHOLD);

        let stats = calibrate_with_stats(&model, &windows, 95.0).unwrap();
        assert_eq!(stats.sample_count, 10);
        assert!(stats.max_error >= stats.threshold);
    }

    #[test]
    fn test_calibrate_empty_rejected() {
        let model = SequenceAutoencoder::new(ModelVariant::GatedSimple, ModelConfig::default(), 4).unwrap();
        assert!(matches!(
            calibrate(&model, &[], 95.0),
            Err(EngineError::InsufficientData(_))
        ));
    }
}
