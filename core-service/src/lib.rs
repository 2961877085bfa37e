//! AI Security Engine - Sequence Anomaly Detection
//!
//! Summary Vectors → normalize → window → LSTM/GRU autoencoder → threshold
//! → model package → {portable graph | anomaly verdict}.

pub mod constants;
pub mod error;
pub mod logic;

pub use error::{EngineError, Result};
pub use logic::ai_bridge::{handle_json, handle_request, InferenceRequest, InferenceResponse, ModelStore};
pub use logic::model::{ModelConfig, ModelPackage, ModelVariant, SequenceAutoencoder};
pub use logic::training::{run_training, TrainingRequest, TrainingSummary};
