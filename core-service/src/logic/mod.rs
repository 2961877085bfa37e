//! Logic Module - Anomaly Engine
//!
//! - `features/` - Feature layout, normalization, windowing
//! - `model/` - Autoencoder, training, package, export, scoring
//! - `ai_bridge` - Inference request/response protocol
//! - `training` - Training entry pipeline
//! - `classifier` - Labeled dataset boundary cho classifier

pub mod features;
pub mod model;
pub mod ai_bridge;
pub mod training;
pub mod classifier;
