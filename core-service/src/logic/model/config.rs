//! Model Config & Variant
//!
//! ModelConfig phải giống hệt nhau giữa train, export và inference.
//! Không có default ngầm khi load - config luôn đọc từ package.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_HIDDEN_DIM, DEFAULT_LATENT_DIM, DEFAULT_NUM_LAYERS, DEFAULT_SEQUENCE_LENGTH,
    FEATURE_COUNT,
};
use crate::error::{EngineError, Result};

/// Recurrent cell family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelVariant {
    /// LSTM: separate cell memory, 4 gates
    #[serde(rename = "gated-with-cell", alias = "lstm")]
    GatedWithCell,
    /// GRU: hidden state only, 3 gates
    #[serde(rename = "gated-simple", alias = "gru")]
    GatedSimple,
}

impl ModelVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::GatedWithCell => "gated-with-cell",
            ModelVariant::GatedSimple => "gated-simple",
        }
    }

    /// Number of stacked gate blocks in W_ih / W_hh
    pub fn gate_count(&self) -> usize {
        match self {
            ModelVariant::GatedWithCell => 4,
            ModelVariant::GatedSimple => 3,
        }
    }

    pub fn has_cell_state(&self) -> bool {
        matches!(self, ModelVariant::GatedWithCell)
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "gated-with-cell" | "lstm" => Some(ModelVariant::GatedWithCell),
            "gated-simple" | "gru" => Some(ModelVariant::GatedSimple),
            _ => None,
        }
    }
}

impl Default for ModelVariant {
    fn default() -> Self {
        ModelVariant::GatedWithCell
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Autoencoder architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub latent_dim: usize,
    pub num_layers: usize,
    pub sequence_length: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_dim: FEATURE_COUNT,
            hidden_dim: DEFAULT_HIDDEN_DIM,
            latent_dim: DEFAULT_LATENT_DIM,
            num_layers: DEFAULT_NUM_LAYERS,
            sequence_length: DEFAULT_SEQUENCE_LENGTH,
        }
    }
}

impl ModelConfig {
    /// All dimensions must be positive
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("input_dim", self.input_dim),
            ("hidden_dim", self.hidden_dim),
            ("latent_dim", self.latent_dim),
            ("num_layers", self.num_layers),
            ("sequence_length", self.sequence_length),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(EngineError::InvalidParameter(format!("{} must be > 0", name)));
            }
        }

        if self.latent_dim >= self.hidden_dim
            || self.hidden_dim >= self.sequence_length * self.input_dim
        {
            log::warn!(
                "Weak bottleneck: latent={} hidden={} L*F={}",
                self.latent_dim,
                self.hidden_dim,
                self.sequence_length * self.input_dim
            );
        }

        Ok(())
    }

    /// Fail with ConfigMismatch unless `other` is identical
    pub fn ensure_matches(&self, other: &ModelConfig) -> Result<()> {
        if self != other {
            return Err(EngineError::ConfigMismatch(format!(
                "package {:?} vs requested {:?}",
                self, other
            )));
        }
        Ok(())
    }
}
