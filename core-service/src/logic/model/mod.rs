//! Model Module - Sequence Autoencoder Engine
//!
//! Train → calibrate → package → {export | score}.
//! Một kiến trúc dùng chung cho training, export và inference.

pub mod config;
pub mod layers;
pub mod autoencoder;
pub mod optim;
pub mod trainer;
pub mod threshold;
pub mod package;
pub mod inference;
pub mod fallback;
pub mod buffer;
pub mod graph;
pub mod export;
pub mod synthetic;

// Re-export common types
pub use config::{ModelConfig, ModelVariant};
pub use autoencoder::SequenceAutoencoder;
pub use trainer::{train, TrainerOptions, TrainingHistory};
pub use threshold::{calibrate, percentile, ThresholdStats};
pub use package::{ModelPackage, Provenance};
pub use inference::{score, score_async, AnomalyVerdict, ScoringMethod};
pub use fallback::{evaluate_rules, heuristic_score, RuleBreakdown};
pub use buffer::{BufferStatus, SequenceBuffer};
pub use graph::PortableGraph;
pub use export::{export, run_export, verify_export, write_export, ExportRequest, ExportSummary};
