//! Layers - Linear + Recurrent (LSTM / GRU) cells
//!
//! Forward lưu cache từng timestep để backward (BPTT) dùng lại.
//! Gate blocks xếp theo hàng: LSTM = i, f, g, o; GRU = r, z, n.
//! Đây là implementation DUY NHẤT - trainer, scorer và graph executor đều gọi vào đây.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;

use super::config::ModelVariant;

#[inline]
fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}

/// a ⊗ b
fn outer(a: &Array1<f32>, b: ArrayView1<f32>) -> Array2<f32> {
    a.view().insert_axis(Axis(1)).dot(&b.insert_axis(Axis(0)))
}

fn uniform<R: Rng>(rng: &mut R, shape: (usize, usize), bound: f32) -> Array2<f32> {
    Array2::from_shape_fn(shape, |_| rng.gen_range(-bound..bound))
}

fn uniform_vec<R: Rng>(rng: &mut R, len: usize, bound: f32) -> Array1<f32> {
    Array1::from_shape_fn(len, |_| rng.gen_range(-bound..bound))
}

// ============================================================================
// LINEAR
// ============================================================================

/// y = W x + b, W: (out, in)
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

impl Linear {
    pub fn new<R: Rng>(input_dim: usize, output_dim: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (input_dim as f32).sqrt();
        Self {
            weight: uniform(rng, (output_dim, input_dim), bound),
            bias: uniform_vec(rng, output_dim, bound),
        }
    }

    pub fn zeros(input_dim: usize, output_dim: usize) -> Self {
        Self {
            weight: Array2::zeros((output_dim, input_dim)),
            bias: Array1::zeros(output_dim),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, x: ArrayView1<f32>) -> Array1<f32> {
        self.weight.dot(&x) + &self.bias
    }

    /// Apply to every row of (T, in) → (T, out)
    pub fn forward_rows(&self, xs: ArrayView2<f32>) -> Array2<f32> {
        xs.dot(&self.weight.t()) + &self.bias
    }

    /// Accumulate dW, db into `grad`; return dx
    pub fn backward(&self, x: ArrayView1<f32>, dy: &Array1<f32>, grad: &mut Linear) -> Array1<f32> {
        grad.weight += &outer(dy, x);
        grad.bias += dy;
        self.weight.t().dot(dy)
    }

    /// Row-wise backward for `forward_rows`
    pub fn backward_rows(
        &self,
        xs: ArrayView2<f32>,
        dys: &Array2<f32>,
        grad: &mut Linear,
    ) -> Array2<f32> {
        grad.weight += &dys.t().dot(&xs);
        grad.bias += &dys.sum_axis(Axis(0));
        dys.dot(&self.weight)
    }

    pub fn tensors(&self, prefix: &str) -> Vec<(String, ArrayViewD<'_, f32>)> {
        vec![
            (format!("{}.weight", prefix), self.weight.view().into_dyn()),
            (format!("{}.bias", prefix), self.bias.view().into_dyn()),
        ]
    }

    pub fn tensors_mut(&mut self, prefix: &str) -> Vec<(String, ArrayViewMutD<'_, f32>)> {
        vec![
            (format!("{}.weight", prefix), self.weight.view_mut().into_dyn()),
            (format!("{}.bias", prefix), self.bias.view_mut().into_dyn()),
        ]
    }
}

// ============================================================================
// RECURRENT LAYER
// ============================================================================

/// One recurrent layer. Gate blocks are stacked along rows:
/// w_ih: (G*H, in), w_hh: (G*H, H), G = 4 (LSTM) or 3 (GRU).
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentLayer {
    pub w_ih: Array2<f32>,
    pub w_hh: Array2<f32>,
    pub b_ih: Array1<f32>,
    pub b_hh: Array1<f32>,
}

/// Per-timestep values kept for backward
#[derive(Debug, Clone)]
enum StepCache {
    Lstm {
        x: Array1<f32>,
        h_prev: Array1<f32>,
        c_prev: Array1<f32>,
        i: Array1<f32>,
        f: Array1<f32>,
        g: Array1<f32>,
        o: Array1<f32>,
        c: Array1<f32>,
    },
    Gru {
        x: Array1<f32>,
        h_prev: Array1<f32>,
        r: Array1<f32>,
        z: Array1<f32>,
        n: Array1<f32>,
        gh_n: Array1<f32>,
    },
}

/// Forward result of one layer over a whole sequence
#[derive(Debug, Clone)]
pub struct LayerTrace {
    /// Hidden state at every timestep: (T, H)
    pub outputs: Array2<f32>,
    steps: Vec<StepCache>,
}

impl LayerTrace {
    /// Hidden state after the last timestep
    pub fn final_hidden(&self) -> Array1<f32> {
        self.outputs.row(self.outputs.nrows() - 1).to_owned()
    }
}

/// Gradients w.r.t. layer inputs and initial state
#[derive(Debug, Clone)]
pub struct LayerGrads {
    pub d_inputs: Array2<f32>,
    pub d_h0: Array1<f32>,
    pub d_c0: Option<Array1<f32>>,
}

/// Initial (h0, c0) for one layer; c0 only for LSTM
pub type InitialState = (Array1<f32>, Option<Array1<f32>>);

impl RecurrentLayer {
    pub fn new<R: Rng>(variant: ModelVariant, input_dim: usize, hidden_dim: usize, rng: &mut R) -> Self {
        let gates = variant.gate_count() * hidden_dim;
        let bound = 1.0 / (hidden_dim as f32).sqrt();
        Self {
            w_ih: uniform(rng, (gates, input_dim), bound),
            w_hh: uniform(rng, (gates, hidden_dim), bound),
            b_ih: uniform_vec(rng, gates, bound),
            b_hh: uniform_vec(rng, gates, bound),
        }
    }

    pub fn zeros(variant: ModelVariant, input_dim: usize, hidden_dim: usize) -> Self {
        let gates = variant.gate_count() * hidden_dim;
        Self {
            w_ih: Array2::zeros((gates, input_dim)),
            w_hh: Array2::zeros((gates, hidden_dim)),
            b_ih: Array1::zeros(gates),
            b_hh: Array1::zeros(gates),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.w_ih.ncols()
    }

    pub fn hidden_dim(&self) -> usize {
        self.w_hh.ncols()
    }

    /// Run the layer over (T, in) starting from `initial` (zeros when None)
    pub fn forward(
        &self,
        variant: ModelVariant,
        inputs: ArrayView2<f32>,
        initial: Option<&InitialState>,
    ) -> LayerTrace {
        let hd = self.hidden_dim();
        let mut h = initial
            .map(|(h0, _)| h0.clone())
            .unwrap_or_else(|| Array1::zeros(hd));
        let mut c = initial
            .and_then(|(_, c0)| c0.clone())
            .unwrap_or_else(|| Array1::zeros(hd));

        let mut outputs = Array2::zeros((inputs.nrows(), hd));
        let mut steps = Vec::with_capacity(inputs.nrows());

        for (t, x) in inputs.axis_iter(Axis(0)).enumerate() {
            let step = match variant {
                ModelVariant::GatedWithCell => self.lstm_step(x, &h, &c),
                ModelVariant::GatedSimple => self.gru_step(x, &h),
            };
            match &step {
                StepCache::Lstm { o, c: c_new, .. } => {
                    h = o * &c_new.mapv(f32::tanh);
                    c = c_new.clone();
                }
                StepCache::Gru { z, n, h_prev, .. } => {
                    h = &z.mapv(|v| 1.0 - v) * n + &(z * h_prev);
                }
            }
            outputs.row_mut(t).assign(&h);
            steps.push(step);
        }

        LayerTrace { outputs, steps }
    }

    fn lstm_step(&self, x: ArrayView1<f32>, h_prev: &Array1<f32>, c_prev: &Array1<f32>) -> StepCache {
        let hd = self.hidden_dim();
        let gates = self.w_ih.dot(&x) + &self.b_ih + self.w_hh.dot(h_prev) + &self.b_hh;

        let i = gates.slice(s![0..hd]).mapv(sigmoid);
        let f = gates.slice(s![hd..2 * hd]).mapv(sigmoid);
        let g = gates.slice(s![2 * hd..3 * hd]).mapv(f32::tanh);
        let o = gates.slice(s![3 * hd..4 * hd]).mapv(sigmoid);
        let c = &f * c_prev + &(&i * &g);

        StepCache::Lstm {
            x: x.to_owned(),
            h_prev: h_prev.clone(),
            c_prev: c_prev.clone(),
            i,
            f,
            g,
            o,
            c,
        }
    }

    fn gru_step(&self, x: ArrayView1<f32>, h_prev: &Array1<f32>) -> StepCache {
        let hd = self.hidden_dim();
        let gi = self.w_ih.dot(&x) + &self.b_ih;
        let gh = self.w_hh.dot(h_prev) + &self.b_hh;

        let r = (&gi.slice(s![0..hd]) + &gh.slice(s![0..hd])).mapv(sigmoid);
        let z = (&gi.slice(s![hd..2 * hd]) + &gh.slice(s![hd..2 * hd])).mapv(sigmoid);
        let gh_n = gh.slice(s![2 * hd..3 * hd]).to_owned();
        let n = (&gi.slice(s![2 * hd..3 * hd]) + &(&r * &gh_n)).mapv(f32::tanh);

        StepCache::Gru {
            x: x.to_owned(),
            h_prev: h_prev.clone(),
            r,
            z,
            n,
            gh_n,
        }
    }

    /// BPTT over a trace produced by `forward`. `d_outputs` is dL/dh_t for
    /// every timestep (T, H). Parameter gradients are accumulated into `grad`.
    pub fn backward(&self, trace: &LayerTrace, d_outputs: ArrayView2<f32>, grad: &mut RecurrentLayer) -> LayerGrads {
        let hd = self.hidden_dim();
        let steps = trace.steps.len();

        let mut d_inputs = Array2::zeros((steps, self.input_dim()));
        let mut dh_next = Array1::<f32>::zeros(hd);
        let mut dc_next = Array1::<f32>::zeros(hd);
        let mut has_cell = false;

        for t in (0..steps).rev() {
            let dh = &d_outputs.row(t) + &dh_next;

            let (x, h_prev, d_gi, d_gh, dh_direct) = match &trace.steps[t] {
                StepCache::Lstm { x, h_prev, c_prev, i, f, g, o, c } => {
                    has_cell = true;
                    let tanh_c = c.mapv(f32::tanh);
                    let d_o = &dh * &tanh_c;
                    let dc = &dh * o * &tanh_c.mapv(|v| 1.0 - v * v) + &dc_next;
                    let d_i = &dc * g;
                    let d_f = &dc * c_prev;
                    let d_g = &dc * i;
                    dc_next = &dc * f;

                    let mut da = Array1::<f32>::zeros(4 * hd);
                    da.slice_mut(s![0..hd]).assign(&(&d_i * &i.mapv(|v| v * (1.0 - v))));
                    da.slice_mut(s![hd..2 * hd]).assign(&(&d_f * &f.mapv(|v| v * (1.0 - v))));
                    da.slice_mut(s![2 * hd..3 * hd]).assign(&(&d_g * &g.mapv(|v| 1.0 - v * v)));
                    da.slice_mut(s![3 * hd..4 * hd]).assign(&(&d_o * &o.mapv(|v| v * (1.0 - v))));

                    // LSTM: cùng pre-activation cho cả hai nhánh ih / hh
                    (x, h_prev, da.clone(), da, None)
                }
                StepCache::Gru { x, h_prev, r, z, n, gh_n } => {
                    let dn = &dh * &z.mapv(|v| 1.0 - v);
                    let dz = &dh * &(h_prev - n);
                    let dan = &dn * &n.mapv(|v| 1.0 - v * v);
                    let dr = &dan * gh_n;
                    let daz = &dz * &z.mapv(|v| v * (1.0 - v));
                    let dar = &dr * &r.mapv(|v| v * (1.0 - v));

                    let mut d_gi = Array1::<f32>::zeros(3 * hd);
                    d_gi.slice_mut(s![0..hd]).assign(&dar);
                    d_gi.slice_mut(s![hd..2 * hd]).assign(&daz);
                    d_gi.slice_mut(s![2 * hd..3 * hd]).assign(&dan);

                    let mut d_gh = d_gi.clone();
                    d_gh.slice_mut(s![2 * hd..3 * hd]).assign(&(&dan * r));

                    (x, h_prev, d_gi, d_gh, Some(&dh * z))
                }
            };

            grad.w_ih += &outer(&d_gi, x.view());
            grad.b_ih += &d_gi;
            grad.w_hh += &outer(&d_gh, h_prev.view());
            grad.b_hh += &d_gh;

            d_inputs.row_mut(t).assign(&self.w_ih.t().dot(&d_gi));
            let mut dh_prev = self.w_hh.t().dot(&d_gh);
            if let Some(direct) = dh_direct {
                dh_prev += &direct;
            }
            dh_next = dh_prev;
        }

        LayerGrads {
            d_inputs,
            d_h0: dh_next,
            d_c0: has_cell.then_some(dc_next),
        }
    }

    pub fn tensors(&self, prefix: &str) -> Vec<(String, ArrayViewD<'_, f32>)> {
        vec![
            (format!("{}.w_ih", prefix), self.w_ih.view().into_dyn()),
            (format!("{}.w_hh", prefix), self.w_hh.view().into_dyn()),
            (format!("{}.b_ih", prefix), self.b_ih.view().into_dyn()),
            (format!("{}.b_hh", prefix), self.b_hh.view().into_dyn()),
        ]
    }

    pub fn tensors_mut(&mut self, prefix: &str) -> Vec<(String, ArrayViewMutD<'_, f32>)> {
        vec![
            (format!("{}.w_ih", prefix), self.w_ih.view_mut().into_dyn()),
            (format!("{}.w_hh", prefix), self.w_hh.view_mut().into_dyn()),
            (format!("{}.b_ih", prefix), self.b_ih.view_mut().into_dyn()),
            (format!("{}.b_hh", prefix), self.b_hh.view_mut().into_dyn()),
        ]
    }
}

// ============================================================================
// STACK
// ============================================================================

/// Forward through stacked layers; layer l+1 consumes layer l's outputs
pub fn stack_forward(
    layers: &[RecurrentLayer],
    variant: ModelVariant,
    inputs: ArrayView2<f32>,
    initial: Option<&[InitialState]>,
) -> Vec<LayerTrace> {
    let mut traces: Vec<LayerTrace> = Vec::with_capacity(layers.len());
    for (l, layer) in layers.iter().enumerate() {
        let init = initial.and_then(|states| states.get(l));
        let trace = match traces.last() {
            Some(below) => layer.forward(variant, below.outputs.view(), init),
            None => layer.forward(variant, inputs, init),
        };
        traces.push(trace);
    }
    traces
}

/// Backward through stacked layers. `d_top` is dL/d(outputs of the top layer).
/// Returns dL/d(stack inputs) and the initial-state gradient of every layer.
pub fn stack_backward(
    layers: &[RecurrentLayer],
    traces: &[LayerTrace],
    d_top: Array2<f32>,
    grads: &mut [RecurrentLayer],
) -> (Array2<f32>, Vec<InitialState>) {
    let mut d = d_top;
    let mut d_initial = vec![(Array1::zeros(0), None); layers.len()];

    for l in (0..layers.len()).rev() {
        let g = layers[l].backward(&traces[l], d.view(), &mut grads[l]);
        d_initial[l] = (g.d_h0, g.d_c0);
        d = g.d_inputs;
    }

    (d, d_initial)
}
