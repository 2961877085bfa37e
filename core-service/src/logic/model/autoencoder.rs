//! Sequence Autoencoder - LSTM / GRU Encoder-Decoder
//!
//! Một implementation duy nhất cho cả hai variant, chọn bằng ModelConfig + ModelVariant.
//!
//! Encoder: stacked recurrent → final hidden của layer cuối → fc_latent
//! Decoder: latent → fc_hidden (+ fc_cell cho LSTM) → initial state từng layer,
//!          latent lặp lại ở mọi timestep → stacked recurrent → fc_output

use std::collections::HashMap;

use ndarray::{s, Array1, Array2, ArrayD, ArrayView1, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::config::{ModelConfig, ModelVariant};
use super::layers::{stack_backward, stack_forward, InitialState, LayerTrace, Linear, RecurrentLayer};
use crate::error::{EngineError, Result};

// ============================================================================
// PARAMETERS
// ============================================================================

/// Every trainable tensor of the autoencoder.
///
/// Also used as the gradient accumulator (same shapes, zero-initialized).
#[derive(Debug, Clone, PartialEq)]
pub struct AutoencoderParams {
    pub encoder: Vec<RecurrentLayer>,
    pub fc_latent: Linear,
    pub fc_hidden: Linear,
    pub fc_cell: Option<Linear>,
    pub decoder: Vec<RecurrentLayer>,
    pub fc_output: Linear,
}

impl AutoencoderParams {
    fn init(variant: ModelVariant, config: &ModelConfig, rng: &mut StdRng) -> Self {
        let h = config.hidden_dim;
        let encoder = (0..config.num_layers)
            .map(|l| {
                let input = if l == 0 { config.input_dim } else { h };
                RecurrentLayer::new(variant, input, h, rng)
            })
            .collect();
        let fc_latent = Linear::new(h, config.latent_dim, rng);
        let fc_hidden = Linear::new(config.latent_dim, h * config.num_layers, rng);
        let fc_cell = variant
            .has_cell_state()
            .then(|| Linear::new(config.latent_dim, h * config.num_layers, rng));
        let decoder = (0..config.num_layers)
            .map(|l| {
                let input = if l == 0 { config.latent_dim } else { h };
                RecurrentLayer::new(variant, input, h, rng)
            })
            .collect();
        let fc_output = Linear::new(h, config.input_dim, rng);

        Self {
            encoder,
            fc_latent,
            fc_hidden,
            fc_cell,
            decoder,
            fc_output,
        }
    }

    /// Zero tensors with the architecture's shapes
    pub fn zeros(variant: ModelVariant, config: &ModelConfig) -> Self {
        let h = config.hidden_dim;
        let layer_input = |l: usize, first: usize| if l == 0 { first } else { h };
        Self {
            encoder: (0..config.num_layers)
                .map(|l| RecurrentLayer::zeros(variant, layer_input(l, config.input_dim), h))
                .collect(),
            fc_latent: Linear::zeros(h, config.latent_dim),
            fc_hidden: Linear::zeros(config.latent_dim, h * config.num_layers),
            fc_cell: variant
                .has_cell_state()
                .then(|| Linear::zeros(config.latent_dim, h * config.num_layers)),
            decoder: (0..config.num_layers)
                .map(|l| RecurrentLayer::zeros(variant, layer_input(l, config.latent_dim), h))
                .collect(),
            fc_output: Linear::zeros(h, config.input_dim),
        }
    }

    /// Named tensors in stable order (persistence + export rely on it)
    pub fn tensors(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        let mut out = Vec::new();
        for (l, layer) in self.encoder.iter().enumerate() {
            out.extend(layer.tensors(&format!("encoder.{}", l)));
        }
        out.extend(self.fc_latent.tensors("fc_latent"));
        out.extend(self.fc_hidden.tensors("fc_hidden"));
        if let Some(fc_cell) = &self.fc_cell {
            out.extend(fc_cell.tensors("fc_cell"));
        }
        for (l, layer) in self.decoder.iter().enumerate() {
            out.extend(layer.tensors(&format!("decoder.{}", l)));
        }
        out.extend(self.fc_output.tensors("fc_output"));
        out
    }

    /// Mutable counterpart of `tensors`, same order
    pub fn tensors_mut(&mut self) -> Vec<(String, ArrayViewMutD<'_, f32>)> {
        let mut out = Vec::new();
        for (l, layer) in self.encoder.iter_mut().enumerate() {
            out.extend(layer.tensors_mut(&format!("encoder.{}", l)));
        }
        out.extend(self.fc_latent.tensors_mut("fc_latent"));
        out.extend(self.fc_hidden.tensors_mut("fc_hidden"));
        if let Some(fc_cell) = &mut self.fc_cell {
            out.extend(fc_cell.tensors_mut("fc_cell"));
        }
        for (l, layer) in self.decoder.iter_mut().enumerate() {
            out.extend(layer.tensors_mut(&format!("decoder.{}", l)));
        }
        out.extend(self.fc_output.tensors_mut("fc_output"));
        out
    }

    pub fn parameter_count(&self) -> usize {
        self.tensors().iter().map(|(_, t)| t.len()).sum()
    }

    pub fn squared_norm(&self) -> f32 {
        self.tensors()
            .iter()
            .map(|(_, t)| t.iter().map(|v| v * v).sum::<f32>())
            .sum()
    }

    pub fn scale(&mut self, factor: f32) {
        for (_, mut tensor) in self.tensors_mut() {
            tensor.mapv_inplace(|v| v * factor);
        }
    }
}

// ============================================================================
// AUTOENCODER
// ============================================================================

/// Values from one forward pass, kept for backward
struct ForwardTrace {
    encoder: Vec<LayerTrace>,
    last_hidden: Array1<f32>,
    latent: Array1<f32>,
    decoder: Vec<LayerTrace>,
    reconstruction: Array2<f32>,
}

/// Encoder-decoder over (L, F) windows
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceAutoencoder {
    variant: ModelVariant,
    config: ModelConfig,
    params: AutoencoderParams,
}

impl SequenceAutoencoder {
    /// Fresh model with seeded uniform initialization
    pub fn new(variant: ModelVariant, config: ModelConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let params = AutoencoderParams::init(variant, &config, &mut rng);

        log::debug!(
            "Built {} autoencoder: {:?}, {} params",
            variant,
            config,
            params.parameter_count()
        );

        Ok(Self {
            variant,
            config,
            params,
        })
    }

    /// All-zero model, weights are filled by `load_tensors`
    pub fn zeroed(variant: ModelVariant, config: ModelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            variant,
            config,
            params: AutoencoderParams::zeros(variant, &config),
        })
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn params(&self) -> &AutoencoderParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut AutoencoderParams {
        &mut self.params
    }

    pub fn parameter_count(&self) -> usize {
        self.params.parameter_count()
    }

    fn check_window(&self, window: &ArrayView2<f32>) -> Result<()> {
        if window.ncols() != self.config.input_dim {
            return Err(EngineError::shape(
                format!("{} features", self.config.input_dim),
                format!("{} features", window.ncols()),
            ));
        }
        if window.nrows() == 0 {
            return Err(EngineError::InsufficientData("window has no timesteps".to_string()));
        }
        Ok(())
    }

    /// Window (T, F) → latent vector
    pub fn encode(&self, window: ArrayView2<f32>) -> Result<Array1<f32>> {
        self.check_window(&window)?;
        let traces = stack_forward(&self.params.encoder, self.variant, window, None);
        let last_hidden = traces
            .last()
            .map(LayerTrace::final_hidden)
            .ok_or_else(|| EngineError::InvalidParameter("num_layers must be > 0".to_string()))?;
        Ok(self.params.fc_latent.forward(last_hidden.view()))
    }

    /// Latent → (target_length, F)
    pub fn decode(&self, latent: ArrayView1<f32>, target_length: usize) -> Result<Array2<f32>> {
        if latent.len() != self.config.latent_dim {
            return Err(EngineError::shape(
                format!("latent of {}", self.config.latent_dim),
                format!("latent of {}", latent.len()),
            ));
        }
        if target_length == 0 {
            return Err(EngineError::InvalidParameter("target_length must be > 0".to_string()));
        }
        let (_, reconstruction) = self.run_decoder(latent, target_length);
        Ok(reconstruction)
    }

    /// decode(encode(window), window length)
    pub fn reconstruct(&self, window: ArrayView2<f32>) -> Result<Array2<f32>> {
        Ok(self.forward(window)?.reconstruction)
    }

    /// MSE over time and feature axes
    pub fn reconstruction_error(&self, window: ArrayView2<f32>) -> Result<f32> {
        let reconstruction = self.reconstruct(window)?;
        Ok(mean_squared_error(&reconstruction, window))
    }

    /// Initial decoder states from the latent vector; layer l takes slice l
    fn decoder_initial_states(&self, latent: ArrayView1<f32>) -> Vec<InitialState> {
        let h = self.config.hidden_dim;
        let hidden = self.params.fc_hidden.forward(latent);
        let cell = self.params.fc_cell.as_ref().map(|fc| fc.forward(latent));

        (0..self.config.num_layers)
            .map(|l| {
                let range = s![l * h..(l + 1) * h];
                (
                    hidden.slice(range).to_owned(),
                    cell.as_ref().map(|c| c.slice(range).to_owned()),
                )
            })
            .collect()
    }

    fn run_decoder(&self, latent: ArrayView1<f32>, target_length: usize) -> (Vec<LayerTrace>, Array2<f32>) {
        let initial = self.decoder_initial_states(latent);
        let inputs = repeat_rows(latent, target_length);
        let traces = stack_forward(&self.params.decoder, self.variant, inputs.view(), Some(initial.as_slice()));
        let top = traces.last().map(|t| t.outputs.view());
        let reconstruction = match top {
            Some(outputs) => self.params.fc_output.forward_rows(outputs),
            None => Array2::zeros((target_length, self.config.input_dim)),
        };
        (traces, reconstruction)
    }

    fn forward(&self, window: ArrayView2<f32>) -> Result<ForwardTrace> {
        self.check_window(&window)?;
        let encoder = stack_forward(&self.params.encoder, self.variant, window, None);
        let last_hidden = encoder
            .last()
            .map(LayerTrace::final_hidden)
            .ok_or_else(|| EngineError::InvalidParameter("num_layers must be > 0".to_string()))?;
        let latent = self.params.fc_latent.forward(last_hidden.view());
        let (decoder, reconstruction) = self.run_decoder(latent.view(), window.nrows());

        Ok(ForwardTrace {
            encoder,
            last_hidden,
            latent,
            decoder,
            reconstruction,
        })
    }

    /// Forward + BPTT for one window.
    ///
    /// Gradients of `scale * MSE` are accumulated into `grads`; the unscaled
    /// MSE is returned.
    pub fn accumulate_gradients(
        &self,
        window: ArrayView2<f32>,
        grads: &mut AutoencoderParams,
        scale: f32,
    ) -> Result<f32> {
        let trace = self.forward(window)?;
        let loss = mean_squared_error(&trace.reconstruction, window);

        let (t, f) = window.dim();
        let h = self.config.hidden_dim;
        let d_recon = (&trace.reconstruction - &window) * (2.0 * scale / (t * f) as f32);

        // fc_output
        let top = trace
            .decoder
            .last()
            .ok_or_else(|| EngineError::InvalidParameter("num_layers must be > 0".to_string()))?;
        let d_dec_top = self
            .params
            .fc_output
            .backward_rows(top.outputs.view(), &d_recon, &mut grads.fc_output);

        // decoder stack
        let (d_dec_inputs, d_initial) =
            stack_backward(&self.params.decoder, &trace.decoder, d_dec_top, &mut grads.decoder);

        // latent: repeated input + initial state projections
        let mut d_latent = d_dec_inputs.sum_axis(Axis(0));

        let mut d_hidden = Array1::<f32>::zeros(h * self.config.num_layers);
        let mut d_cell = Array1::<f32>::zeros(h * self.config.num_layers);
        for (l, (d_h0, d_c0)) in d_initial.iter().enumerate() {
            d_hidden.slice_mut(s![l * h..(l + 1) * h]).assign(d_h0);
            if let Some(d_c0) = d_c0 {
                d_cell.slice_mut(s![l * h..(l + 1) * h]).assign(d_c0);
            }
        }
        d_latent += &self
            .params
            .fc_hidden
            .backward(trace.latent.view(), &d_hidden, &mut grads.fc_hidden);
        if let (Some(fc_cell), Some(grad_cell)) = (&self.params.fc_cell, &mut grads.fc_cell) {
            d_latent += &fc_cell.backward(trace.latent.view(), &d_cell, grad_cell);
        }

        // fc_latent → final hidden of the top encoder layer
        let d_last_hidden =
            self.params
                .fc_latent
                .backward(trace.last_hidden.view(), &d_latent, &mut grads.fc_latent);
        let mut d_enc_top = Array2::<f32>::zeros((t, h));
        d_enc_top.row_mut(t - 1).assign(&d_last_hidden);

        stack_backward(&self.params.encoder, &trace.encoder, d_enc_top, &mut grads.encoder);

        Ok(loss)
    }

    /// Overwrite every parameter from a named tensor set.
    ///
    /// Names and shapes must match this architecture exactly.
    pub fn load_tensors(&mut self, tensors: &HashMap<String, ArrayD<f32>>) -> Result<()> {
        let expected = self.params.tensors().len();
        if tensors.len() != expected {
            return Err(EngineError::ConfigMismatch(format!(
                "package has {} tensors, {} architecture needs {}",
                tensors.len(),
                self.variant,
                expected
            )));
        }

        for (name, mut target) in self.params.tensors_mut() {
            let source = tensors
                .get(&name)
                .ok_or_else(|| EngineError::ConfigMismatch(format!("missing tensor {}", name)))?;
            if source.shape() != target.shape() {
                return Err(EngineError::ConfigMismatch(format!(
                    "tensor {}: expected shape {:?}, got {:?}",
                    name,
                    target.shape(),
                    source.shape()
                )));
            }
            target.assign(source);
        }

        Ok(())
    }
}

// ============================================================================
// TENSOR LAYOUT
// ============================================================================

/// Number of named tensors a config produces; None on overflow
pub fn tensor_count(variant: ModelVariant, config: &ModelConfig) -> Option<usize> {
    let heads = if variant.has_cell_state() { 4 } else { 3 };
    config.num_layers.checked_mul(8)?.checked_add(heads * 2)
}

/// Names and shapes of every tensor for `config`, in `tensors()` order.
///
/// Computed without allocating weights; dimensions that overflow are a `ConfigMismatch`.
pub fn tensor_layout(variant: ModelVariant, config: &ModelConfig) -> Result<Vec<(String, Vec<usize>)>> {
    let overflow = || EngineError::ConfigMismatch(format!("config dimensions overflow: {:?}", config));
    let count = tensor_count(variant, config).ok_or_else(overflow)?;
    let h = config.hidden_dim;
    let gates = variant.gate_count().checked_mul(h).ok_or_else(overflow)?;
    let stacked = h.checked_mul(config.num_layers).ok_or_else(overflow)?;

    let mut layout = Vec::with_capacity(count);
    let recurrent = |layout: &mut Vec<(String, Vec<usize>)>, prefix: String, input: usize| {
        layout.push((format!("{}.w_ih", prefix), vec![gates, input]));
        layout.push((format!("{}.w_hh", prefix), vec![gates, h]));
        layout.push((format!("{}.b_ih", prefix), vec![gates]));
        layout.push((format!("{}.b_hh", prefix), vec![gates]));
    };
    let linear = |layout: &mut Vec<(String, Vec<usize>)>, prefix: &str, input: usize, output: usize| {
        layout.push((format!("{}.weight", prefix), vec![output, input]));
        layout.push((format!("{}.bias", prefix), vec![output]));
    };

    for l in 0..config.num_layers {
        recurrent(&mut layout, format!("encoder.{}", l), if l == 0 { config.input_dim } else { h });
    }
    linear(&mut layout, "fc_latent", h, config.latent_dim);
    linear(&mut layout, "fc_hidden", config.latent_dim, stacked);
    if variant.has_cell_state() {
        linear(&mut layout, "fc_cell", config.latent_dim, stacked);
    }
    for l in 0..config.num_layers {
        recurrent(&mut layout, format!("decoder.{}", l), if l == 0 { config.latent_dim } else { h });
    }
    linear(&mut layout, "fc_output", h, config.input_dim);

    // Every tensor (and the whole model) must be addressable as f32 bytes
    let mut total: usize = 0;
    for (_, shape) in &layout {
        let len = shape
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(*d))
            .ok_or_else(overflow)?;
        total = total.checked_add(len).ok_or_else(overflow)?;
    }
    if total > isize::MAX as usize / std::mem::size_of::<f32>() {
        return Err(overflow());
    }

    Ok(layout)
}

/// Latent (D) → (T, D), same row at every timestep
pub fn repeat_rows(row: ArrayView1<f32>, times: usize) -> Array2<f32> {
    let mut out = Array2::zeros((times, row.len()));
    for mut r in out.axis_iter_mut(Axis(0)) {
        r.assign(&row);
    }
    out
}

fn mean_squared_error(reconstruction: &Array2<f32>, window: ArrayView2<f32>) -> f32 {
    let diff = reconstruction - &window;
    diff.mapv(|d| d * d).mean().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ModelConfig {
        ModelConfig {
            input_dim: 3,
            hidden_dim: 4,
            latent_dim: 2,
            num_layers: 2,
            sequence_length: 3,
        }
    }

    fn window() -> Array2<f32> {
        Array2::from_shape_fn((3, 3), |(t, j)| 0.1 + 0.2 * t as f32 + 0.15 * j as f32)
    }

    #[test]
    fn test_reconstruct_shape() {
        for variant in [ModelVariant::GatedWithCell, ModelVariant::GatedSimple] {
            let model = SequenceAutoencoder::new(variant, small_config(), 1).unwrap();
            let w = window();
            let latent = model.encode(w.view()).unwrap();
            assert_eq!(latent.len(), 2);
            assert_eq!(model.reconstruct(w.view()).unwrap().dim(), (3, 3));
            assert_eq!(model.decode(latent.view(), 7).unwrap().dim(), (7, 3));
        }
    }

    #[test]
    fn test_tensor_layout_matches_params() {
        for variant in [ModelVariant::GatedWithCell, ModelVariant::GatedSimple] {
            let model = SequenceAutoencoder::new(variant, small_config(), 2).unwrap();
            let actual: Vec<(String, Vec<usize>)> = model
                .params()
                .tensors()
                .into_iter()
                .map(|(name, t)| (name, t.shape().to_vec()))
                .collect();
            assert_eq!(tensor_layout(variant, &small_config()).unwrap(), actual);
            assert_eq!(tensor_count(variant, &small_config()), Some(actual.len()));
        }
    }

    #[test]
    fn test_tensor_layout_rejects_overflow() {
        let huge = ModelConfig {
            hidden_dim: 1 << 62,
            ..small_config()
        };
        assert!(matches!(
            tensor_layout(ModelVariant::GatedWithCell, &huge),
            Err(EngineError::ConfigMismatch(_))
        ));
        let many_layers = ModelConfig {
            num_layers: usize::MAX,
            ..small_config()
        };
        assert_eq!(tensor_count(ModelVariant::GatedSimple, &many_layers), None);
    }

    #[test]
    fn test_reconstruction_error_deterministic() {
        let model = SequenceAutoencoder::new(ModelVariant::GatedWithCell, small_config(), 5).unwrap();
        let w = window();
        let a = model.reconstruction_error(w.view()).unwrap();
        let b = model.reconstruction_error(w.view()).unwrap();
        assert_eq!(a, b);
        assert!(a >= 0.0);
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a = SequenceAutoencoder::new(ModelVariant::GatedSimple, small_config(), 9).unwrap();
        let b = SequenceAutoencoder::new(ModelVariant::GatedSimple, small_config(), 9).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_feature_count_rejected() {
        let model = SequenceAutoencoder::new(ModelVariant::GatedWithCell, small_config(), 1).unwrap();
        let bad = Array2::<f32>::zeros((3, 4));
        assert!(matches!(
            model.reconstruct(bad.view()),
            Err(EngineError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_gru_fewer_parameters() {
        let config = ModelConfig::default();
        let lstm = SequenceAutoencoder::new(ModelVariant::GatedWithCell, config, 0).unwrap();
        let gru = SequenceAutoencoder::new(ModelVariant::GatedSimple, config, 0).unwrap();
        assert!(gru.parameter_count() < lstm.parameter_count());
    }

    #[test]
    fn test_tensor_names_stable() {
        let model = SequenceAutoencoder::new(ModelVariant::GatedWithCell, small_config(), 1).unwrap();
        let names: Vec<String> = model.params().tensors().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names.first().map(String::as_str), Some("encoder.0.w_ih"));
        assert_eq!(names.last().map(String::as_str), Some("fc_output.bias"));
        assert!(names.iter().any(|n| n == "fc_cell.weight"));

        let gru = SequenceAutoencoder::new(ModelVariant::GatedSimple, small_config(), 1).unwrap();
        assert!(!gru.params().tensors().iter().any(|(n, _)| n.starts_with("fc_cell")));
    }

    #[test]
    fn test_load_tensors_roundtrip_and_mismatch() {
        let source = SequenceAutoencoder::new(ModelVariant::GatedWithCell, small_config(), 3).unwrap();
        let named: HashMap<String, ArrayD<f32>> = source
            .params()
            .tensors()
            .into_iter()
            .map(|(n, t)| (n, t.to_owned()))
            .collect();

        let mut target = SequenceAutoencoder::zeroed(ModelVariant::GatedWithCell, small_config()).unwrap();
        target.load_tensors(&named).unwrap();
        assert_eq!(target, source);

        let wider = ModelConfig {
            hidden_dim: 5,
            ..small_config()
        };
        let mut other = SequenceAutoencoder::zeroed(ModelVariant::GatedWithCell, wider).unwrap();
        assert!(matches!(
            other.load_tensors(&named),
            Err(EngineError::ConfigMismatch(_))
        ));
    }

    /// Analytic gradients vs central finite differences
    #[test]
    fn test_gradients_match_finite_differences() {
        for variant in [ModelVariant::GatedWithCell, ModelVariant::GatedSimple] {
            let model = SequenceAutoencoder::new(variant, small_config(), 11).unwrap();
            let w = window();

            let mut grads = AutoencoderParams::zeros(variant, model.config());
            model.accumulate_gradients(w.view(), &mut grads, 1.0).unwrap();
            let analytic: Vec<(String, ArrayD<f32>)> = grads
                .tensors()
                .into_iter()
                .map(|(n, t)| (n, t.to_owned()))
                .collect();

            let eps = 1e-2f32;
            for (index, (name, grad)) in analytic.iter().enumerate() {
                // a few coordinates per tensor keeps the test fast
                for flat in [0usize, grad.len() / 2, grad.len() - 1] {
                    let loss_at = |delta: f32| {
                        let mut perturbed = model.clone();
                        let mut tensors = perturbed.params_mut().tensors_mut();
                        let (_, tensor) = &mut tensors[index];
                        if let Some(v) = tensor.iter_mut().nth(flat) {
                            *v += delta;
                        }
                        drop(tensors);
                        perturbed.reconstruction_error(w.view()).unwrap()
                    };
                    let numeric = (loss_at(eps) - loss_at(-eps)) / (2.0 * eps);
                    let exact = grad.iter().nth(flat).copied().unwrap();
                    let tol = 1e-3 + 0.05 * exact.abs().max(numeric.abs());
                    assert!(
                        (numeric - exact).abs() <= tol,
                        "{} {}[{}]: numeric {} vs analytic {}",
                        variant,
                        name,
                        flat,
                        numeric,
                        exact
                    );
                }
            }
        }
    }
}
