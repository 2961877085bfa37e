//! Optimizer - Adam + Gradient Clipping + Plateau Schedule

use ndarray::{ArrayD, Zip};

use super::autoencoder::AutoencoderParams;
use crate::constants::{DEFAULT_PLATEAU_PATIENCE, PLATEAU_FACTOR};

// ============================================================================
// ADAM
// ============================================================================

/// Adam with bias correction (β1 0.9, β2 0.999, ε 1e-8)
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    step: i32,
    m: Vec<ArrayD<f32>>,
    v: Vec<ArrayD<f32>>,
}

impl Adam {
    pub fn new(params: &AutoencoderParams, learning_rate: f32) -> Self {
        let zeros: Vec<ArrayD<f32>> = params
            .tensors()
            .iter()
            .map(|(_, t)| ArrayD::zeros(t.raw_dim()))
            .collect();
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            step: 0,
            m: zeros.clone(),
            v: zeros,
        }
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    /// One update: params -= lr * m̂ / (√v̂ + ε)
    pub fn step(&mut self, params: &mut AutoencoderParams, grads: &AutoencoderParams) {
        self.step += 1;
        let (b1, b2, eps, lr) = (self.beta1, self.beta2, self.epsilon, self.learning_rate);
        let bias1 = 1.0 - b1.powi(self.step);
        let bias2 = 1.0 - b2.powi(self.step);

        let grads = grads.tensors();
        for (((_, param), (_, grad)), (m, v)) in params
            .tensors_mut()
            .into_iter()
            .zip(grads.iter())
            .zip(self.m.iter_mut().zip(self.v.iter_mut()))
        {
            Zip::from(param)
                .and(grad)
                .and(m)
                .and(v)
                .for_each(|p, &g, m, v| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    let m_hat = *m / bias1;
                    let v_hat = *v / bias2;
                    *p -= lr * m_hat / (v_hat.sqrt() + eps);
                });
        }
    }
}

// ============================================================================
// CLIPPING
// ============================================================================

/// Scale all gradients so their global L2 norm is at most `max_norm`.
///
/// Returns the norm before clipping.
pub fn clip_grad_norm(grads: &mut AutoencoderParams, max_norm: f32) -> f32 {
    let total = grads.squared_norm().sqrt();
    let coef = max_norm / (total + 1e-6);
    if coef < 1.0 {
        grads.scale(coef);
    }
    total
}

// ============================================================================
// PLATEAU SCHEDULE
// ============================================================================

/// Reduce learning rate when the monitored loss stops improving
#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    factor: f32,
    patience: usize,
    threshold: f32,
    best: f32,
    bad_epochs: usize,
}

impl Default for PlateauScheduler {
    fn default() -> Self {
        Self::new(PLATEAU_FACTOR, DEFAULT_PLATEAU_PATIENCE)
    }
}

impl PlateauScheduler {
    pub fn new(factor: f32, patience: usize) -> Self {
        Self {
            factor,
            patience,
            threshold: 1e-4,
            best: f32::INFINITY,
            bad_epochs: 0,
        }
    }

    /// Feed one epoch's metric; returns the learning rate to use next
    pub fn step(&mut self, metric: f32, learning_rate: f32) -> f32 {
        // Relative improvement
        if metric < self.best * (1.0 - self.threshold) {
            self.best = metric;
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
        }

        if self.bad_epochs > self.patience {
            self.bad_epochs = 0;
            let reduced = learning_rate * self.factor;
            log::info!("Plateau: learning rate {:.2e} -> {:.2e}", learning_rate, reduced);
            return reduced;
        }

        learning_rate
    }
}
