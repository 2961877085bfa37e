//! Heuristic Fallback - Scoring without a trained model
//!
//! Dùng khi chưa có model package: so sánh vector cuối với ngưỡng tĩnh
//! từng feature + luật xu hướng tăng trên toàn window.

use std::time::Instant;

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use super::inference::{AnomalyVerdict, ScoringMethod};
use crate::constants::{FEATURE_COUNT, HEURISTIC_ANOMALY_SCORE};
use crate::error::{EngineError, Result};

/// Static per-feature ceilings, in FEATURE_LAYOUT order
pub const HEURISTIC_THRESHOLDS: [f32; FEATURE_COUNT] = [
    50.0, 80.0, 500.0, 1000.0,  // cpu / memory
    15.0, 15.0, 10.0, 10.0,     // net / disk
    100.0, 0.9,                 // processes, network ratio
    0.2, 0.2, 0.3, 10.0, 1.0,   // rates
];

/// Fixed confidence of heuristic verdicts
pub const HEURISTIC_CONFIDENCE: f32 = 0.5;

/// Added to the exceedance count when most features trend upward
pub const TREND_PENALTY: usize = 2;

/// Fraction of features that must rise first → last to trigger the trend rule
const TREND_FRACTION: f32 = 0.7;

/// Rule-by-rule result of the heuristic
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleBreakdown {
    /// Features of the last vector above their ceiling
    pub anomaly_count: usize,
    /// Largest (value - ceiling) / ceiling among exceedances
    pub max_excess: f32,
    /// 0 or TREND_PENALTY
    pub trend_penalty: usize,
}

impl RuleBreakdown {
    pub fn score(&self) -> f32 {
        let count = (self.anomaly_count + self.trend_penalty) as f32;
        (count / 10.0 + self.max_excess * 0.3).min(1.0)
    }
}

/// Evaluate the static rules on a raw (unnormalized, unpadded) sequence
pub fn evaluate_rules(sequence: ArrayView2<f32>) -> Result<RuleBreakdown> {
    if sequence.nrows() == 0 {
        return Err(EngineError::InsufficientData("empty sequence".to_string()));
    }
    if sequence.ncols() != FEATURE_COUNT {
        return Err(EngineError::shape(
            format!("{} features", FEATURE_COUNT),
            format!("{} features", sequence.ncols()),
        ));
    }

    let last = sequence.row(sequence.nrows() - 1);
    let mut anomaly_count = 0;
    let mut max_excess = 0.0f32;

    for (&value, &ceiling) in last.iter().zip(HEURISTIC_THRESHOLDS.iter()) {
        if value > ceiling {
            anomaly_count += 1;
            max_excess = max_excess.max((value - ceiling) / ceiling);
        }
    }

    let mut trend_penalty = 0;
    if sequence.nrows() > 1 {
        let first = sequence.row(0);
        let increasing = last.iter().zip(first.iter()).filter(|(l, f)| l > f).count();
        if increasing as f32 > FEATURE_COUNT as f32 * TREND_FRACTION {
            trend_penalty = TREND_PENALTY;
        }
    }

    Ok(RuleBreakdown {
        anomaly_count,
        max_excess,
        trend_penalty,
    })
}

/// Heuristic verdict; raw_mse / threshold are absent
pub fn heuristic_score(sequence: ArrayView2<f32>) -> Result<AnomalyVerdict> {
    let start_time = Instant::now();
    let rules = evaluate_rules(sequence)?;
    let score = rules.score();

    log::debug!(
        "Heuristic: {} exceedances, max excess {:.3}, trend +{} → {:.3}",
        rules.anomaly_count,
        rules.max_excess,
        rules.trend_penalty,
        score
    );

    Ok(AnomalyVerdict {
        score,
        is_anomaly: score > HEURISTIC_ANOMALY_SCORE,
        confidence: HEURISTIC_CONFIDENCE,
        raw_mse: None,
        threshold: None,
        method: ScoringMethod::Heuristic,
        inference_time_us: start_time.elapsed().as_micros() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn calm() -> Array2<f32> {
        Array2::from_shape_fn((5, FEATURE_COUNT), |(_, j)| HEURISTIC_THRESHOLDS[j] * 0.5)
    }

    #[test]
    fn test_calm_sequence_is_normal() {
        let verdict = heuristic_score(calm().view()).unwrap();
        assert_eq!(verdict.score, 0.0);
        assert!(!verdict.is_anomaly);
        assert_eq!(verdict.confidence, 0.5);
        assert_eq!(verdict.method, ScoringMethod::Heuristic);
        assert_eq!(verdict.raw_mse, None);
        assert_eq!(verdict.threshold, None);
    }

    #[test]
    fn test_exceedances_raise_score() {
        let mut seq = calm();
        // 4 features at 3x ceiling → 0.4 + 0.3 * 2.0 = 1.0
        for j in 0..4 {
            seq[[4, j]] = HEURISTIC_THRESHOLDS[j] * 3.0;
        }
        let rules = evaluate_rules(seq.view()).unwrap();
        assert_eq!(rules.anomaly_count, 4);
        assert!((rules.max_excess - 2.0).abs() < 1e-5);
        assert_eq!(rules.trend_penalty, 0);

        let verdict = heuristic_score(seq.view()).unwrap();
        assert_eq!(verdict.score, 1.0);
        assert!(verdict.is_anomaly);
    }

    #[test]
    fn test_all_zero_window_scores_zero() {
        let seq = Array2::<f32>::zeros((5, FEATURE_COUNT));
        let rules = evaluate_rules(seq.view()).unwrap();
        assert_eq!(rules.anomaly_count, 0);
        assert_eq!(rules.max_excess, 0.0);
        assert_eq!(rules.trend_penalty, 0);

        let verdict = heuristic_score(seq.view()).unwrap();
        assert_eq!(verdict.score, 0.0);
        assert!(!verdict.is_anomaly);
    }

    #[test]
    fn test_every_feature_exceeded_saturates() {
        // Flat window so only the exceedance count contributes
        let seq = Array2::from_shape_fn((5, FEATURE_COUNT), |(_, j)| HEURISTIC_THRESHOLDS[j] + 1.0);
        let rules = evaluate_rules(seq.view()).unwrap();
        assert_eq!(rules.anomaly_count, FEATURE_COUNT);
        assert_eq!(rules.anomaly_count, 15);
        assert_eq!(rules.trend_penalty, 0);
        assert_eq!(rules.score(), 1.0);

        let verdict = heuristic_score(seq.view()).unwrap();
        assert_eq!(verdict.score, 1.0);
        assert!(verdict.is_anomaly);

        // Rising into the exceedance adds the trend penalty; still capped
        let mut rising = seq.clone();
        rising.row_mut(0).fill(0.0);
        let rules = evaluate_rules(rising.view()).unwrap();
        assert_eq!(rules.anomaly_count, 15);
        assert_eq!(rules.trend_penalty, TREND_PENALTY);
        assert_eq!(rules.score(), 1.0);
    }

    #[test]
    fn test_trend_rule() {
        // Every feature rises first → last, no ceilings crossed
        let seq = Array2::from_shape_fn((3, FEATURE_COUNT), |(t, j)| {
            HEURISTIC_THRESHOLDS[j] * (0.1 + 0.1 * t as f32)
        });
        let rules = evaluate_rules(seq.view()).unwrap();
        assert_eq!(rules.anomaly_count, 0);
        assert_eq!(rules.trend_penalty, TREND_PENALTY);
        assert!((rules.score() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_trend_needs_more_than_seventy_percent() {
        // 10 of 15 rising = 66% → no penalty
        let seq = Array2::from_shape_fn((2, FEATURE_COUNT), |(t, j)| {
            if j < 10 { t as f32 * 0.01 } else { 0.0 }
        });
        assert_eq!(evaluate_rules(seq.view()).unwrap().trend_penalty, 0);

        let seq = Array2::from_shape_fn((2, FEATURE_COUNT), |(t, j)| {
            if j < 11 { t as f32 * 0.01 } else { 0.0 }
        });
        assert_eq!(evaluate_rules(seq.view()).unwrap().trend_penalty, TREND_PENALTY);
    }

    #[test]
    fn test_single_vector_skips_trend() {
        let seq = Array2::from_elem((1, FEATURE_COUNT), 0.0f32);
        assert_eq!(evaluate_rules(seq.view()).unwrap().trend_penalty, 0);
    }

    #[test]
    fn test_bad_input_rejected() {
        assert!(evaluate_rules(Array2::<f32>::zeros((0, FEATURE_COUNT)).view()).is_err());
        assert!(matches!(
            evaluate_rules(Array2::<f32>::zeros((3, 4)).view()),
            Err(EngineError::ShapeMismatch { .. })
        ));
    }
}
