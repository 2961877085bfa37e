//! Export Adapter - Model Package → Portable Graph
//!
//! Rebuild kiến trúc từ config của package, kiểm tra config trước khi emit,
//! rồi verify graph cho ra cùng output với model gốc.

use std::path::{Path, PathBuf};

use ndarray::{Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::autoencoder::{tensor_layout, SequenceAutoencoder};
use super::config::{ModelConfig, ModelVariant};
use super::graph::{
    GraphOp, Initializer, PortableGraph, TensorSpec, GRAPH_FORMAT, GRAPH_FORMAT_VERSION,
    INPUT_NAME, OUTPUT_NAME,
};
use super::package::{sidecar_path, write_atomic, ModelPackage};
use crate::error::{EngineError, Result};
use crate::logic::features::NormalizationStats;

/// Max abs difference allowed between graph and source model
pub const EXPORT_TOLERANCE: f32 = 1e-5;

/// Sample batch used by the export entry's parity check
pub const VERIFY_BATCH: usize = 2;

/// Export entry request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub model_path: PathBuf,
    /// Defaults to `<model_path>` with extension `graph.json`
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub expected_config: Option<ModelConfig>,
}

impl ExportRequest {
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.model_path.with_extension("graph.json"))
    }
}

/// Printed after `[RESULT]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub success: bool,
    pub output: PathBuf,
    pub max_diff: f32,
}

/// Metadata written next to an exported graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSidecar {
    pub source_model: String,
    pub format: String,
    pub format_version: u32,
    pub variant: ModelVariant,
    pub config: ModelConfig,
    pub threshold: f32,
    pub normalization: NormalizationStats,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

/// Build the portable graph for a package.
///
/// The architecture is rebuilt from the package config; it must equal the
/// package's own config and `expected` (when given) before anything is emitted.
pub fn export(package: &ModelPackage, expected: Option<&ModelConfig>) -> Result<PortableGraph> {
    let config = *package.config();
    if let Some(expected) = expected {
        config.ensure_matches(expected)?;
    }

    let expected_tensors = tensor_layout(package.variant(), &config)?;
    let actual_tensors: Vec<(String, Vec<usize>)> = package
        .model()
        .params()
        .tensors()
        .into_iter()
        .map(|(name, tensor)| (name, tensor.shape().to_vec()))
        .collect();
    if expected_tensors != actual_tensors {
        return Err(EngineError::ConfigMismatch(
            "package tensors do not match the architecture rebuilt from its config".to_string(),
        ));
    }

    let graph = build_graph(package.model());
    log::info!(
        "Exported {} graph: {} initializers, {} nodes",
        graph.variant,
        graph.initializers.len(),
        graph.nodes.len()
    );
    Ok(graph)
}

fn build_graph(model: &SequenceAutoencoder) -> PortableGraph {
    let variant = model.variant();
    let config = *model.config();
    let layers = config.num_layers;

    let initializers = model
        .params()
        .tensors()
        .into_iter()
        .map(|(name, tensor)| Initializer {
            name,
            shape: tensor.shape().to_vec(),
            data: tensor.iter().copied().collect(),
        })
        .collect();

    let recurrent = |prefix: &str, l: usize, input: String, h0: Option<String>, c0: Option<String>| {
        GraphOp::Recurrent {
            cell: variant,
            input,
            initial_h: h0,
            initial_c: c0,
            w_ih: format!("{}.{}.w_ih", prefix, l),
            w_hh: format!("{}.{}.w_hh", prefix, l),
            b_ih: format!("{}.{}.b_ih", prefix, l),
            b_hh: format!("{}.{}.b_hh", prefix, l),
            output: format!("{}.{}.out", prefix, l),
        }
    };
    let gemm = |input: &str, layer: &str, output: &str| GraphOp::Gemm {
        input: input.to_string(),
        weight: format!("{}.weight", layer),
        bias: format!("{}.bias", layer),
        output: output.to_string(),
    };

    let mut nodes = Vec::new();

    // Encoder
    for l in 0..layers {
        let input = if l == 0 {
            INPUT_NAME.to_string()
        } else {
            format!("encoder.{}.out", l - 1)
        };
        nodes.push(recurrent("encoder", l, input, None, None));
    }
    nodes.push(GraphOp::LastStep {
        input: format!("encoder.{}.out", layers - 1),
        output: "encoder.last_hidden".to_string(),
    });
    nodes.push(gemm("encoder.last_hidden", "fc_latent", "latent"));

    // Decoder initial states
    nodes.push(gemm("latent", "fc_hidden", "decoder.h0"));
    nodes.push(GraphOp::SplitLayers {
        input: "decoder.h0".to_string(),
        outputs: (0..layers).map(|l| format!("decoder.{}.h0", l)).collect(),
    });
    if variant.has_cell_state() {
        nodes.push(gemm("latent", "fc_cell", "decoder.c0"));
        nodes.push(GraphOp::SplitLayers {
            input: "decoder.c0".to_string(),
            outputs: (0..layers).map(|l| format!("decoder.{}.c0", l)).collect(),
        });
    }
    nodes.push(GraphOp::RepeatTime {
        input: "latent".to_string(),
        output: "decoder.input".to_string(),
    });

    // Decoder
    for l in 0..layers {
        let input = if l == 0 {
            "decoder.input".to_string()
        } else {
            format!("decoder.{}.out", l - 1)
        };
        let c0 = variant
            .has_cell_state()
            .then(|| format!("decoder.{}.c0", l));
        nodes.push(recurrent("decoder", l, input, Some(format!("decoder.{}.h0", l)), c0));
    }
    nodes.push(gemm(&format!("decoder.{}.out", layers - 1), "fc_output", OUTPUT_NAME));

    PortableGraph {
        format: GRAPH_FORMAT.to_string(),
        format_version: GRAPH_FORMAT_VERSION,
        variant,
        config,
        inputs: vec![TensorSpec::sequence(INPUT_NAME, &config)],
        outputs: vec![TensorSpec::sequence(OUTPUT_NAME, &config)],
        initializers,
        nodes,
    }
}

/// Run graph and source model on a seeded random batch; fail if they diverge
pub fn verify_export(graph: &PortableGraph, package: &ModelPackage, batch: usize, seed: u64) -> Result<f32> {
    let config = package.config();
    let mut rng = StdRng::seed_from_u64(seed);
    let inputs = Array3::from_shape_fn(
        (batch.max(1), config.sequence_length, config.input_dim),
        |_| rng.gen_range(0.0f32..1.0),
    );

    let from_graph = graph.run(inputs.view())?;
    let mut max_diff = 0.0f32;
    for (sample, produced) in inputs.axis_iter(Axis(0)).zip(from_graph.axis_iter(Axis(0))) {
        let reference = package.model().reconstruct(sample)?;
        for (a, b) in reference.iter().zip(produced.iter()) {
            max_diff = max_diff.max((a - b).abs());
        }
    }

    if !(max_diff <= EXPORT_TOLERANCE) {
        return Err(EngineError::ExportVerification {
            max_diff,
            tolerance: EXPORT_TOLERANCE,
        });
    }

    log::info!("Export verified: max abs diff {:.2e}", max_diff);
    Ok(max_diff)
}

/// Write graph + `<path>.json` sidecar
pub fn write_export(graph: &PortableGraph, package: &ModelPackage, source: &Path, path: &Path) -> Result<PathBuf> {
    write_atomic(path, &serde_json::to_vec(graph)?)?;

    let sidecar = ExportSidecar {
        source_model: source.display().to_string(),
        format: graph.format.clone(),
        format_version: graph.format_version,
        variant: graph.variant,
        config: graph.config,
        threshold: package.threshold(),
        normalization: package.normalization().clone(),
        inputs: graph.inputs.clone(),
        outputs: graph.outputs.clone(),
    };
    let sidecar_file = sidecar_path(path);
    write_atomic(&sidecar_file, &serde_json::to_vec_pretty(&sidecar)?)?;

    log::info!("Graph written: {} (+ {})", path.display(), sidecar_file.display());
    Ok(sidecar_file)
}

/// Export entry: load → export → verify → write
pub fn run_export(request: &ExportRequest) -> Result<ExportSummary> {
    let package = ModelPackage::load(&request.model_path)?;
    let graph = export(&package, request.expected_config.as_ref())?;
    let max_diff = verify_export(&graph, &package, VERIFY_BATCH, package.provenance().package_id.as_u128() as u64)?;

    let output = request.output_path();
    write_export(&graph, &package, &request.model_path, &output)?;
    Ok(ExportSummary {
        success: true,
        output,
        max_diff,
    })
}
