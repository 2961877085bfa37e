//! End-to-end: train → calibrate → package → reload → score / export

use ndarray::{s, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tempfile::TempDir;

use ai_security_engine::constants::FEATURE_COUNT;
use ai_security_engine::logic::ai_bridge::{handle_request, InferenceRequest, ModelStore, SequenceInput};
use ai_security_engine::logic::model::{
    export, score, verify_export, ModelPackage, ModelVariant, ScoringMethod, TrainerOptions,
};
use ai_security_engine::logic::training::{train_package, TrainingRequest};

const L: usize = 5;

/// Near-periodic telemetry stream (period 20) with small Gaussian noise
fn periodic_stream(start: usize, n: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0f32, 0.02).unwrap();
    Array2::from_shape_fn((n, FEATURE_COUNT), |(i, j)| {
        let t = (start + i) as f32;
        let phase = t * std::f32::consts::TAU / 20.0 + j as f32 * 0.4;
        50.0 + 30.0 * phase.sin() + noise.sample(&mut rng) * 30.0
    })
}

fn request(variant: ModelVariant) -> TrainingRequest {
    TrainingRequest {
        variant,
        sequence_length: L,
        hidden_dim: 16,
        latent_dim: 8,
        num_layers: 1,
        trainer: TrainerOptions {
            epochs: 60,
            batch_size: 16,
            learning_rate: 0.01,
            seed: 7,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_held_out_normal_windows_are_not_anomalous() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.osae");

    // 204 vectors → 200 training windows
    let raw = periodic_stream(0, 200 + L - 1, 1);
    let package = train_package(&raw, &request(ModelVariant::GatedWithCell)).unwrap();
    package.save(&path).unwrap();
    let package = ModelPackage::load(&path).unwrap();
    assert!(package.threshold() > 0.0);

    let held_out = periodic_stream(400, 60 + L - 1, 99);
    let trials = held_out.nrows() - L + 1;
    let mut normal = 0;
    for i in 0..trials {
        let verdict = score(&package, held_out.slice(s![i..i + L, ..])).unwrap();
        assert_eq!(verdict.method, ScoringMethod::Autoencoder);
        if !verdict.is_anomaly && verdict.score < 0.6 {
            normal += 1;
        }
    }
    assert!(
        normal * 10 >= trials * 8,
        "only {}/{} held-out windows scored normal",
        normal,
        trials
    );

    // Oscillation between extremes reconstructs badly
    let burst = Array2::from_shape_fn((L, FEATURE_COUNT), |(i, _)| if i % 2 == 0 { 500.0 } else { -500.0 });
    let verdict = score(&package, burst.view()).unwrap();
    assert!(verdict.raw_mse.unwrap() > package.threshold());
}

#[test]
fn test_protocol_and_export_agree_with_package() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.osae");

    let raw = periodic_stream(0, 60, 3);
    let mut short = request(ModelVariant::GatedSimple);
    short.trainer.epochs = 5;
    let package = train_package(&raw, &short).unwrap();
    package.save(&path).unwrap();

    let window = raw.slice(s![10..10 + L, ..]);
    let direct = score(&package, window).unwrap();

    let rows: Vec<Vec<f32>> = window.rows().into_iter().map(|r| r.to_vec()).collect();
    let response = handle_request(
        &ModelStore::new(),
        InferenceRequest {
            model_path: Some(path.clone()),
            sequence: SequenceInput::Many(rows),
        },
    );
    assert!(response.error.is_none());
    assert_eq!(response.raw_mse, direct.raw_mse);
    assert_eq!(response.score, direct.score);

    let reloaded = ModelPackage::load(&path).unwrap();
    let graph = export(&reloaded, Some(package.config())).unwrap();
    assert!(verify_export(&graph, &reloaded, 4, 11).unwrap() <= 1e-5);
}
