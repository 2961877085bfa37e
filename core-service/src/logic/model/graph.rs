//! Portable Inference Graph
//!
//! JSON document tự chứa: initializers (weights có tên) + danh sách op nhỏ.
//! Chạy được độc lập với SequenceAutoencoder - chỉ cần file graph.
//!
//! Ops:
//! - `Recurrent`   (T, in) → (T, H), optional initial h / c
//! - `Gemm`        y = W x + b trên trục cuối (vector hoặc từng hàng)
//! - `LastStep`    (T, D) → (D)
//! - `SplitLayers` (P·H) → P vectors (H)
//! - `RepeatTime`  (D) → (T, D), T = độ dài thời gian của input

use std::collections::HashMap;
use std::path::Path;

use ndarray::{s, Array1, Array2, Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use super::autoencoder::repeat_rows;
use super::config::{ModelConfig, ModelVariant};
use super::layers::{InitialState, Linear, RecurrentLayer};
use crate::error::{EngineError, Result};

pub const GRAPH_FORMAT: &str = "oneshield-graph";
pub const GRAPH_FORMAT_VERSION: u32 = 1;
pub const INPUT_NAME: &str = "input_sequence";
pub const OUTPUT_NAME: &str = "reconstructed_sequence";

// ============================================================================
// DOCUMENT
// ============================================================================

/// Dimension of a graph input/output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    Fixed(usize),
    /// Symbolic dimension, e.g. "batch"
    Dynamic(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<Dim>,
}

impl TensorSpec {
    /// [batch, L, F] with dynamic batch
    pub fn sequence(name: &str, config: &ModelConfig) -> Self {
        Self {
            name: name.to_string(),
            shape: vec![
                Dim::Dynamic("batch".to_string()),
                Dim::Fixed(config.sequence_length),
                Dim::Fixed(config.input_dim),
            ],
        }
    }
}

/// Named weight tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initializer {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum GraphOp {
    Recurrent {
        cell: ModelVariant,
        input: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_h: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_c: Option<String>,
        w_ih: String,
        w_hh: String,
        b_ih: String,
        b_hh: String,
        output: String,
    },
    Gemm {
        input: String,
        weight: String,
        bias: String,
        output: String,
    },
    LastStep {
        input: String,
        output: String,
    },
    SplitLayers {
        input: String,
        outputs: Vec<String>,
    },
    RepeatTime {
        input: String,
        output: String,
    },
}

/// Self-contained inference graph for the sequence autoencoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortableGraph {
    pub format: String,
    pub format_version: u32,
    pub variant: ModelVariant,
    pub config: ModelConfig,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
    pub initializers: Vec<Initializer>,
    pub nodes: Vec<GraphOp>,
}

// ============================================================================
// EXECUTOR
// ============================================================================

#[derive(Debug, Clone)]
enum Value {
    Vector(Array1<f32>),
    Matrix(Array2<f32>),
}

/// Ops with their weights materialized
enum CompiledOp<'g> {
    Recurrent {
        cell: ModelVariant,
        layer: RecurrentLayer,
        input: &'g str,
        initial_h: Option<&'g str>,
        initial_c: Option<&'g str>,
        output: &'g str,
    },
    Gemm {
        linear: Linear,
        input: &'g str,
        output: &'g str,
    },
    LastStep {
        input: &'g str,
        output: &'g str,
    },
    SplitLayers {
        input: &'g str,
        outputs: &'g [String],
    },
    RepeatTime {
        input: &'g str,
        output: &'g str,
    },
}

struct Weights<'g> {
    by_name: HashMap<&'g str, &'g Initializer>,
}

impl<'g> Weights<'g> {
    fn get(&self, name: &str) -> Result<&'g Initializer> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::InvalidPackage(format!("graph: unknown initializer {}", name)))
    }

    fn matrix(&self, name: &str) -> Result<Array2<f32>> {
        let init = self.get(name)?;
        match init.shape.as_slice() {
            [rows, cols] => Array2::from_shape_vec((*rows, *cols), init.data.clone())
                .map_err(|e| EngineError::InvalidPackage(format!("graph: {}: {}", name, e))),
            other => Err(EngineError::InvalidPackage(format!(
                "graph: {} must be rank 2, got {:?}",
                name, other
            ))),
        }
    }

    fn vector(&self, name: &str) -> Result<Array1<f32>> {
        let init = self.get(name)?;
        match init.shape.as_slice() {
            [len] if *len == init.data.len() => Ok(Array1::from_vec(init.data.clone())),
            other => Err(EngineError::InvalidPackage(format!(
                "graph: {} must be rank 1 with {} values, got {:?}",
                name,
                init.data.len(),
                other
            ))),
        }
    }
}

/// Static shape of a graph value; matrices always have one row per timestep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Vector(usize),
    Matrix(usize),
}

fn shape_of(shapes: &HashMap<&str, Shape>, name: &str) -> Result<Shape> {
    shapes
        .get(name)
        .copied()
        .ok_or_else(|| EngineError::InvalidPackage(format!("graph: value {} used before defined", name)))
}

fn expect_shape(shapes: &HashMap<&str, Shape>, name: &str, expected: Shape) -> Result<()> {
    let actual = shape_of(shapes, name)?;
    if actual != expected {
        return Err(EngineError::InvalidPackage(format!(
            "graph: {} is {:?}, expected {:?}",
            name, actual, expected
        )));
    }
    Ok(())
}

fn not_a(kind: &str, name: &str) -> EngineError {
    EngineError::InvalidPackage(format!("graph: {} is not a {}", name, kind))
}

fn take<'e>(env: &'e HashMap<&str, Value>, name: &str) -> Result<&'e Value> {
    env.get(name)
        .ok_or_else(|| EngineError::InvalidPackage(format!("graph: value {} used before defined", name)))
}

fn take_vector<'e>(env: &'e HashMap<&str, Value>, name: &str) -> Result<&'e Array1<f32>> {
    match take(env, name)? {
        Value::Vector(v) => Ok(v),
        Value::Matrix(_) => Err(EngineError::InvalidPackage(format!("graph: {} is not a vector", name))),
    }
}

fn take_matrix<'e>(env: &'e HashMap<&str, Value>, name: &str) -> Result<&'e Array2<f32>> {
    match take(env, name)? {
        Value::Matrix(m) => Ok(m),
        Value::Vector(_) => Err(EngineError::InvalidPackage(format!("graph: {} is not a matrix", name))),
    }
}

impl PortableGraph {
    /// Parse and check format / version
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let graph: PortableGraph = serde_json::from_slice(bytes)?;
        if graph.format != GRAPH_FORMAT || graph.format_version != GRAPH_FORMAT_VERSION {
            return Err(EngineError::InvalidPackage(format!(
                "unsupported graph format {} v{}",
                graph.format, graph.format_version
            )));
        }
        Ok(graph)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes)
    }

    /// Materialize weights and check that every op's shapes chain together
    fn compile(&self) -> Result<Vec<CompiledOp<'_>>> {
        let weights = Weights {
            by_name: self.initializers.iter().map(|i| (i.name.as_str(), i)).collect(),
        };
        let mut shapes: HashMap<&str, Shape> = HashMap::new();
        shapes.insert(INPUT_NAME, Shape::Matrix(self.config.input_dim));

        let mut ops = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let op = match node {
                GraphOp::Recurrent {
                    cell,
                    input,
                    initial_h,
                    initial_c,
                    w_ih,
                    w_hh,
                    b_ih,
                    b_hh,
                    output,
                } => {
                    let layer = RecurrentLayer {
                        w_ih: weights.matrix(w_ih)?,
                        w_hh: weights.matrix(w_hh)?,
                        b_ih: weights.vector(b_ih)?,
                        b_hh: weights.vector(b_hh)?,
                    };
                    let hidden = layer.w_hh.ncols();
                    let gates = cell.gate_count().checked_mul(hidden);
                    if gates != Some(layer.w_ih.nrows())
                        || layer.w_hh.nrows() != layer.w_ih.nrows()
                        || layer.b_ih.len() != layer.w_ih.nrows()
                        || layer.b_hh.len() != layer.w_ih.nrows()
                    {
                        return Err(EngineError::InvalidPackage(format!(
                            "graph: {} weights do not form a {} layer (w_ih {:?}, w_hh {:?}, b_ih {}, b_hh {})",
                            output,
                            cell,
                            layer.w_ih.dim(),
                            layer.w_hh.dim(),
                            layer.b_ih.len(),
                            layer.b_hh.len()
                        )));
                    }
                    expect_shape(&shapes, input, Shape::Matrix(layer.w_ih.ncols()))?;
                    if let Some(h) = initial_h {
                        expect_shape(&shapes, h, Shape::Vector(hidden))?;
                    }
                    if let Some(c) = initial_c {
                        expect_shape(&shapes, c, Shape::Vector(hidden))?;
                    }
                    shapes.insert(output, Shape::Matrix(hidden));
                    CompiledOp::Recurrent {
                        cell: *cell,
                        layer,
                        input,
                        initial_h: initial_h.as_deref(),
                        initial_c: initial_c.as_deref(),
                        output,
                    }
                }
                GraphOp::Gemm {
                    input,
                    weight,
                    bias,
                    output,
                } => {
                    let linear = Linear {
                        weight: weights.matrix(weight)?,
                        bias: weights.vector(bias)?,
                    };
                    if linear.bias.len() != linear.output_dim() {
                        return Err(EngineError::InvalidPackage(format!(
                            "graph: {} bias has {} values for {} outputs",
                            bias,
                            linear.bias.len(),
                            linear.output_dim()
                        )));
                    }
                    let produced = match shape_of(&shapes, input)? {
                        Shape::Vector(width) | Shape::Matrix(width) if width != linear.input_dim() => {
                            return Err(EngineError::InvalidPackage(format!(
                                "graph: {} is {} wide, {} expects {}",
                                input,
                                width,
                                weight,
                                linear.input_dim()
                            )));
                        }
                        Shape::Vector(_) => Shape::Vector(linear.output_dim()),
                        Shape::Matrix(_) => Shape::Matrix(linear.output_dim()),
                    };
                    shapes.insert(output, produced);
                    CompiledOp::Gemm { linear, input, output }
                }
                GraphOp::LastStep { input, output } => {
                    let width = match shape_of(&shapes, input)? {
                        Shape::Matrix(width) => width,
                        Shape::Vector(_) => return Err(not_a("matrix", input)),
                    };
                    shapes.insert(output, Shape::Vector(width));
                    CompiledOp::LastStep { input, output }
                }
                GraphOp::SplitLayers { input, outputs } => {
                    let len = match shape_of(&shapes, input)? {
                        Shape::Vector(len) => len,
                        Shape::Matrix(_) => return Err(not_a("vector", input)),
                    };
                    let parts = outputs.len();
                    if parts == 0 || len % parts != 0 {
                        return Err(EngineError::InvalidPackage(format!(
                            "graph: cannot split {} values into {} parts",
                            len, parts
                        )));
                    }
                    for name in outputs {
                        shapes.insert(name.as_str(), Shape::Vector(len / parts));
                    }
                    CompiledOp::SplitLayers { input, outputs }
                }
                GraphOp::RepeatTime { input, output } => {
                    let width = match shape_of(&shapes, input)? {
                        Shape::Vector(width) => width,
                        Shape::Matrix(_) => return Err(not_a("vector", input)),
                    };
                    shapes.insert(output, Shape::Matrix(width));
                    CompiledOp::RepeatTime { input, output }
                }
            };
            ops.push(op);
        }

        expect_shape(&shapes, OUTPUT_NAME, Shape::Matrix(self.config.input_dim))?;
        Ok(ops)
    }

    /// Execute on (batch, L, F) → (batch, L, F)
    pub fn run(&self, input: ArrayView3<f32>) -> Result<Array3<f32>> {
        let (batch, steps, features) = input.dim();
        if steps != self.config.sequence_length || features != self.config.input_dim {
            return Err(EngineError::shape(
                format!("[batch, {}, {}]", self.config.sequence_length, self.config.input_dim),
                format!("[{}, {}, {}]", batch, steps, features),
            ));
        }

        let ops = self.compile()?;
        let mut output = Array3::zeros((batch, steps, features));

        for (b, sample) in input.axis_iter(Axis(0)).enumerate() {
            let mut env: HashMap<&str, Value> = HashMap::new();
            env.insert(INPUT_NAME, Value::Matrix(sample.to_owned()));

            for op in &ops {
                match op {
                    CompiledOp::Recurrent {
                        cell,
                        layer,
                        input,
                        initial_h,
                        initial_c,
                        output,
                    } => {
                        let initial: Option<InitialState> = match initial_h {
                            Some(h) => Some((
                                take_vector(&env, h)?.clone(),
                                initial_c.map(|c| take_vector(&env, c).cloned()).transpose()?,
                            )),
                            None => None,
                        };
                        let trace = layer.forward(*cell, take_matrix(&env, input)?.view(), initial.as_ref());
                        env.insert(*output, Value::Matrix(trace.outputs));
                    }
                    CompiledOp::Gemm { linear, input, output } => {
                        let value = match take(&env, input)? {
                            Value::Vector(v) => Value::Vector(linear.forward(v.view())),
                            Value::Matrix(m) => Value::Matrix(linear.forward_rows(m.view())),
                        };
                        env.insert(*output, value);
                    }
                    CompiledOp::LastStep { input, output } => {
                        let m = take_matrix(&env, input)?;
                        if m.nrows() == 0 {
                            return Err(EngineError::InsufficientData("graph: empty sequence".to_string()));
                        }
                        let last = m.row(m.nrows() - 1).to_owned();
                        env.insert(*output, Value::Vector(last));
                    }
                    CompiledOp::SplitLayers { input, outputs } => {
                        let v = take_vector(&env, input)?;
                        let parts = outputs.len();
                        if parts == 0 || v.len() % parts != 0 {
                            return Err(EngineError::InvalidPackage(format!(
                                "graph: cannot split {} values into {} parts",
                                v.len(),
                                parts
                            )));
                        }
                        let width = v.len() / parts;
                        let pieces: Vec<Array1<f32>> = (0..parts)
                            .map(|l| v.slice(s![l * width..(l + 1) * width]).to_owned())
                            .collect();
                        for (name, piece) in outputs.iter().zip(pieces) {
                            env.insert(name.as_str(), Value::Vector(piece));
                        }
                    }
                    CompiledOp::RepeatTime { input, output } => {
                        let repeated = repeat_rows(take_vector(&env, input)?.view(), steps);
                        env.insert(*output, Value::Matrix(repeated));
                    }
                }
            }

            let result = take_matrix(&env, OUTPUT_NAME)?;
            if result.dim() != (steps, features) {
                return Err(EngineError::shape(
                    format!("({}, {}) output", steps, features),
                    format!("{:?} output", result.dim()),
                ));
            }
            output.index_axis_mut(Axis(0), b).assign(result);
        }

        Ok(output)
    }
}
