//! Trainer - Mini-batch Adam over sequence windows
//!
//! Vòng lặp tuần tự: shuffle (seeded) → batch → BPTT → clip → Adam.
//! LR giảm theo plateau của validation loss (chỉ khi có validation).

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::autoencoder::{AutoencoderParams, SequenceAutoencoder};
use super::optim::{clip_grad_norm, Adam, PlateauScheduler};
use crate::constants::{
    get_epochs, get_seed, DEFAULT_BATCH_SIZE, DEFAULT_LEARNING_RATE, DEFAULT_MAX_GRAD_NORM,
    DEFAULT_PLATEAU_PATIENCE, PLATEAU_FACTOR,
};
use crate::error::{EngineError, Result};

/// Training hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub max_grad_norm: f32,
    pub patience: usize,
    pub plateau_factor: f32,
    pub seed: u64,
}

impl Default for TrainerOptions {
    fn default() -> Self {
        Self {
            epochs: get_epochs(),
            batch_size: DEFAULT_BATCH_SIZE,
            learning_rate: DEFAULT_LEARNING_RATE,
            max_grad_norm: DEFAULT_MAX_GRAD_NORM,
            patience: DEFAULT_PLATEAU_PATIENCE,
            plateau_factor: PLATEAU_FACTOR,
            seed: get_seed(),
        }
    }
}

impl TrainerOptions {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 || self.batch_size == 0 {
            return Err(EngineError::InvalidParameter(
                "epochs and batch_size must be > 0".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(EngineError::InvalidParameter(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.max_grad_norm > 0.0) {
            return Err(EngineError::InvalidParameter(format!(
                "max_grad_norm must be positive, got {}",
                self.max_grad_norm
            )));
        }
        if !(self.plateau_factor > 0.0 && self.plateau_factor < 1.0) {
            return Err(EngineError::InvalidParameter(format!(
                "plateau_factor must be in (0, 1), got {}",
                self.plateau_factor
            )));
        }
        Ok(())
    }
}

/// Per-epoch record of a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_loss: Vec<f32>,
    pub val_loss: Vec<f32>,
    pub learning_rates: Vec<f32>,
    /// Lowest monitored loss (validation if present, else training)
    pub best_loss: f32,
    /// 1-based epoch of `best_loss`; earliest wins ties
    pub best_epoch: usize,
    pub epochs_run: usize,
}

/// Train `model` in place.
///
/// An empty validation slice is treated as no validation.
pub fn train(
    model: &mut SequenceAutoencoder,
    train_windows: &[Array2<f32>],
    validation: Option<&[Array2<f32>]>,
    options: &TrainerOptions,
) -> Result<TrainingHistory> {
    options.validate()?;
    if train_windows.is_empty() {
        return Err(EngineError::InsufficientData(
            "no training windows".to_string(),
        ));
    }
    let validation = validation.filter(|v| !v.is_empty());

    log::info!(
        "Training {} autoencoder: {} windows, {} validation, {} epochs, {} params",
        model.variant(),
        train_windows.len(),
        validation.map(|v| v.len()).unwrap_or(0),
        options.epochs,
        model.parameter_count()
    );

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut optimizer = Adam::new(model.params(), options.learning_rate);
    let mut scheduler = PlateauScheduler::new(options.plateau_factor, options.patience);
    let mut history = TrainingHistory {
        best_loss: f32::INFINITY,
        ..Default::default()
    };

    let mut order: Vec<usize> = (0..train_windows.len()).collect();

    for epoch in 1..=options.epochs {
        order.shuffle(&mut rng);

        let mut batch_losses = Vec::with_capacity(order.len() / options.batch_size + 1);
        for chunk in order.chunks(options.batch_size) {
            let mut grads = AutoencoderParams::zeros(model.variant(), model.config());
            let scale = 1.0 / chunk.len() as f32;

            let mut batch_loss = 0.0f32;
            for &index in chunk {
                let loss = model.accumulate_gradients(train_windows[index].view(), &mut grads, scale)?;
                batch_loss += loss * scale;
            }
            if !batch_loss.is_finite() {
                return Err(EngineError::NumericInstability { epoch, loss: batch_loss });
            }

            clip_grad_norm(&mut grads, options.max_grad_norm);
            optimizer.step(model.params_mut(), &grads);
            batch_losses.push(batch_loss);
        }
        let train_loss = mean(&batch_losses);
        history.train_loss.push(train_loss);

        let monitored = match validation {
            Some(windows) => {
                let val_loss = evaluate(model, windows, options.batch_size)?;
                if !val_loss.is_finite() {
                    return Err(EngineError::NumericInstability { epoch, loss: val_loss });
                }
                history.val_loss.push(val_loss);

                let lr = scheduler.step(val_loss, optimizer.learning_rate());
                optimizer.set_learning_rate(lr);
                val_loss
            }
            None => train_loss,
        };
        history.learning_rates.push(optimizer.learning_rate());

        if monitored < history.best_loss {
            history.best_loss = monitored;
            history.best_epoch = epoch;
        }
        history.epochs_run = epoch;

        if epoch == 1 || epoch % 10 == 0 {
            match history.val_loss.last() {
                Some(val) => log::info!(
                    "Epoch {}/{} - loss {:.6} - val_loss {:.6} - lr {:.2e}",
                    epoch,
                    options.epochs,
                    train_loss,
                    val,
                    optimizer.learning_rate()
                ),
                None => log::info!(
                    "Epoch {}/{} - loss {:.6} - lr {:.2e}",
                    epoch,
                    options.epochs,
                    train_loss,
                    optimizer.learning_rate()
                ),
            }
        }
    }

    log::info!(
        "Training done: best loss {:.6} at epoch {}",
        history.best_loss,
        history.best_epoch
    );

    Ok(history)
}

/// Mean of per-batch mean reconstruction errors
pub fn evaluate(model: &SequenceAutoencoder, windows: &[Array2<f32>], batch_size: usize) -> Result<f32> {
    let mut batch_losses = Vec::new();
    for chunk in windows.chunks(batch_size.max(1)) {
        let mut sum = 0.0f32;
        for window in chunk {
            sum += model.reconstruction_error(window.view())?;
        }
        batch_losses.push(sum / chunk.len() as f32);
    }
    Ok(mean(&batch_losses))
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}
