//! Features Module - Summary Vector Preparation
//!
//! Layout của Summary Vector, min-max normalization và windowing.
//! Không chứa logic model - chỉ chuẩn bị tensor (L, F) cho autoencoder.

pub mod layout;
pub mod normalize;
pub mod window;

#[cfg(test)]
mod tests;

// Re-export common types
pub use layout::{FEATURE_COUNT, FEATURE_LAYOUT, LayoutStamp};
pub use normalize::NormalizationStats;
pub use window::{build_training_windows, prepare_inference_window, stack_rows};
