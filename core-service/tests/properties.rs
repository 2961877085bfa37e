//! Property tests: windowing, normalization, percentile, scoring formula

use ndarray::Array2;
use proptest::prelude::*;

use ai_security_engine::constants::FEATURE_COUNT;
use ai_security_engine::logic::features::{
    build_training_windows, normalize, prepare_inference_window,
};
use ai_security_engine::logic::model::inference::verdict_from_error;
use ai_security_engine::logic::model::{evaluate_rules, percentile};

fn matrix(rows: usize, cols: usize) -> impl Strategy<Value = Array2<f32>> {
    proptest::collection::vec(-1000.0f32..1000.0, rows * cols)
        .prop_map(move |data| Array2::from_shape_vec((rows, cols), data).unwrap())
}

proptest! {
    #[test]
    fn prop_window_count_and_last_row(
        (data, l) in (1usize..8).prop_flat_map(|l| ((l + 1)..(l + 30)).prop_flat_map(move |n| (matrix(n, FEATURE_COUNT), Just(l))))
    ) {
        let windows = build_training_windows(data.view(), l).unwrap();
        prop_assert_eq!(windows.len(), data.nrows() - l + 1);
        for (i, w) in windows.iter().enumerate() {
            prop_assert_eq!(w.dim(), (l, FEATURE_COUNT));
            prop_assert_eq!(w.row(l - 1), data.row(i + l - 1));
        }
    }

    #[test]
    fn prop_normalized_values_in_unit_range(
        fit_data in (1usize..20).prop_flat_map(|n| matrix(n, 4)),
        sample in (1usize..10).prop_flat_map(|n| matrix(n, 4)),
    ) {
        let stats = normalize::fit(fit_data.view()).unwrap();
        let normalized = normalize::apply(&stats, sample.view()).unwrap();
        prop_assert!(normalized.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn prop_constant_feature_normalizes_to_zero(value in -1e6f32..1e6, other in -1e6f32..1e6) {
        let fit_data = Array2::from_elem((6, 3), value);
        let stats = normalize::fit(fit_data.view()).unwrap();
        let at_value = normalize::apply(&stats, fit_data.view()).unwrap();
        prop_assert!(at_value.iter().all(|v| *v == 0.0));

        // Anything at or below the constant clamps to 0
        if other <= value {
            let clamped = normalize::apply(&stats, Array2::from_elem((1, 3), other).view()).unwrap();
            prop_assert!(clamped.iter().all(|v| *v == 0.0));
        }
    }

    #[test]
    fn prop_inference_window_has_length_l(n in 1usize..20, l in 1usize..10) {
        let history = Array2::from_shape_fn((n, FEATURE_COUNT), |(i, j)| (i * FEATURE_COUNT + j) as f32);
        let window = prepare_inference_window(history.view(), l).unwrap();
        prop_assert_eq!(window.dim(), (l, FEATURE_COUNT));
        // Newest vector always ends the window
        prop_assert_eq!(window.row(l - 1), history.row(n - 1));
    }

    #[test]
    fn prop_percentile_monotone(
        values in proptest::collection::vec(0.0f32..10.0, 1..200),
        low in 0.0f32..100.0,
        high in 0.0f32..100.0,
    ) {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        let p_low = percentile(&values, low).unwrap();
        let p_high = percentile(&values, high).unwrap();
        prop_assert!(p_high >= p_low);

        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        prop_assert!(p_low >= min && p_high <= max);
    }

    #[test]
    fn prop_score_monotone_and_bounded(threshold in 1e-4f32..10.0, a in 0.0f32..50.0, b in 0.0f32..50.0) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let v_low = verdict_from_error(low, threshold);
        let v_high = verdict_from_error(high, threshold);

        prop_assert!(v_low.score <= v_high.score);
        prop_assert!((0.0..=1.0).contains(&v_high.score));
        prop_assert!((0.5..=1.0).contains(&v_high.confidence));
        prop_assert_eq!(v_high.is_anomaly, high > threshold);
    }

    #[test]
    fn prop_heuristic_score_bounded(data in (1usize..6).prop_flat_map(|n| matrix(n, FEATURE_COUNT))) {
        let rules = evaluate_rules(data.view()).unwrap();
        prop_assert!(rules.anomaly_count <= FEATURE_COUNT);
        prop_assert!((0.0..=1.0).contains(&rules.score()));
    }
}

#[test]
fn test_scoring_boundaries() {
    let at = verdict_from_error(0.1, 0.1);
    assert_eq!(at.score, 0.5);
    assert_eq!(at.confidence, 0.5);
    assert!(!at.is_anomaly);

    assert_eq!(verdict_from_error(0.2, 0.1).score, 1.0);
    assert_eq!(verdict_from_error(0.05, 0.1).score, 0.25);
}

#[test]
fn test_inference_window_pad_and_truncate() {
    let short = Array2::from_shape_fn((2, FEATURE_COUNT), |(i, _)| i as f32);
    let padded = prepare_inference_window(short.view(), 5).unwrap();
    for r in 1..5 {
        assert_eq!(padded.row(r), short.row(1));
    }

    let long = Array2::from_shape_fn((8, FEATURE_COUNT), |(i, _)| i as f32);
    let truncated = prepare_inference_window(long.view(), 5).unwrap();
    assert_eq!(truncated.column(0).to_vec(), vec![3.0, 4.0, 5.0, 6.0, 7.0]);
}
