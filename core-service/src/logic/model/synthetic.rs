//! Synthetic Telemetry - Training data khi chưa có dữ liệu thật
//!
//! Gaussian base (σ 0.3) + xu hướng sin chậm + noise (σ 0.1), min-max về [0, 1].

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

use crate::constants::FEATURE_COUNT;

/// Default corpus size when no data source is given
pub const DEFAULT_SYNTHETIC_SAMPLES: usize = 1000;

/// Generate `num_samples` normal-behavior Summary Vectors, already in [0, 1]
pub fn generate_synthetic(num_samples: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut gaussian = || -> f32 { StandardNormal.sample(&mut rng) };

    let mut data = Array2::<f32>::zeros((num_samples, FEATURE_COUNT));
    for (i, mut row) in data.axis_iter_mut(Axis(0)).enumerate() {
        let time_effect = (i as f32 / 50.0).sin() * 0.2;
        for value in row.iter_mut() {
            let base = gaussian() * 0.3 + time_effect;
            *value = base + gaussian() * 0.1;
        }
    }

    for mut column in data.axis_iter_mut(Axis(1)) {
        let min = column.iter().copied().fold(f32::INFINITY, f32::min);
        let max = column.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let range = max - min + 1e-8;
        column.mapv_inplace(|v| (v - min) / range);
    }

    log::info!("Generated {} synthetic samples", num_samples);
    data
}
