//! Integration Tests for Normalizer + Windower
//!
//! Kiểm tra thứ tự normalize → window cho cả training và inference.

#[cfg(test)]
mod integration_tests {
    use ndarray::{s, Array2};

    use crate::logic::features::{
        normalize, prepare_inference_window, build_training_windows, FEATURE_COUNT,
    };

    fn telemetry(n: usize) -> Array2<f32> {
        Array2::from_shape_fn((n, FEATURE_COUNT), |(i, j)| {
            10.0 * j as f32 + (i as f32 * 0.3).sin() * 5.0
        })
    }

    /// Training windows từ stream đã normalize đều nằm trong [0, 1]
    #[test]
    fn test_training_windows_are_normalized() {
        let raw = telemetry(40);
        let stats = normalize::fit(raw.view()).unwrap();
        let normalized = normalize::apply(&stats, raw.view()).unwrap();
        let windows = build_training_windows(normalized.view(), 5).unwrap();

        assert_eq!(windows.len(), 36);
        for w in &windows {
            assert!(w.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    /// Normalize-then-window và window-then-normalize cho cùng kết quả
    #[test]
    fn test_live_window_order_independent() {
        let raw = telemetry(40);
        let stats = normalize::fit(raw.view()).unwrap();
        let live = raw.slice(s![30.., ..]).to_owned();

        let a = prepare_inference_window(
            normalize::apply(&stats, live.view()).unwrap().view(),
            5,
        )
        .unwrap();
        let b = normalize::apply(
            &stats,
            prepare_inference_window(live.view(), 5).unwrap().view(),
        )
        .unwrap();

        assert_eq!(a, b);
    }
}
