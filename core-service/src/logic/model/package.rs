//! Model Package - Persisted Unit
//!
//! Một file nhị phân chứa mọi thứ inference cần: variant, config, weights,
//! normalization stats, threshold, provenance.
//!
//! Layout:
//! ```text
//! [0-3]   magic "OSAE"
//! [4-5]   format version (u16 LE)
//! [6-7]   reserved
//! [8-11]  header length (u32 LE)
//! [..]    JSON header
//! [..]    f32 LE payload, tensors in header index order
//! [-32..] SHA-256 of everything before it
//! ```
//!
//! Sidecar `<path>.json` mirrors the header (không có weights) cho tooling.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::autoencoder::{tensor_count, tensor_layout, SequenceAutoencoder};
use super::config::{ModelConfig, ModelVariant};
use super::trainer::TrainingHistory;
use crate::constants::{ENGINE_VERSION, FEATURE_COUNT};
use crate::error::{EngineError, Result};
use crate::logic::features::layout::{validate_layout, LayoutStamp};
use crate::logic::features::NormalizationStats;

/// Package magic bytes
pub const PACKAGE_MAGIC: &[u8; 4] = b"OSAE";

/// Current container format version
pub const PACKAGE_FORMAT_VERSION: u16 = 1;

const PREAMBLE_SIZE: usize = 12;
const DIGEST_SIZE: usize = 32;

// ============================================================================
// PROVENANCE
// ============================================================================

/// Where a package came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub package_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub best_loss: f32,
    pub best_epoch: usize,
    pub epochs_run: usize,
    pub layout: LayoutStamp,
    pub engine_version: String,
}

impl Provenance {
    pub fn from_history(history: &TrainingHistory) -> Self {
        Self {
            package_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            best_loss: history.best_loss,
            best_epoch: history.best_epoch,
            epochs_run: history.epochs_run,
            layout: LayoutStamp::current(),
            engine_version: ENGINE_VERSION.to_string(),
        }
    }
}

// ============================================================================
// HEADER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TensorEntry {
    name: String,
    shape: Vec<usize>,
}

impl TensorEntry {
    /// Payload bytes for this tensor; None on overflow
    fn byte_len(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(std::mem::size_of::<f32>(), |acc, d| acc.checked_mul(*d))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PackageHeader {
    variant: ModelVariant,
    /// Optional on the wire so an absent config is reported as a mismatch
    #[serde(default)]
    config: Option<ModelConfig>,
    normalization: NormalizationStats,
    threshold: f32,
    provenance: Provenance,
    tensors: Vec<TensorEntry>,
}

/// Human-readable metadata written next to the package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSidecar {
    pub variant: ModelVariant,
    pub config: ModelConfig,
    pub threshold: f32,
    pub normalization: NormalizationStats,
    pub provenance: Provenance,
}

// ============================================================================
// PACKAGE
// ============================================================================

/// Trained model + everything needed to score with it.
///
/// Immutable once built; shared across threads as `Arc<ModelPackage>`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPackage {
    model: SequenceAutoencoder,
    normalization: NormalizationStats,
    threshold: f32,
    provenance: Provenance,
}

impl ModelPackage {
    pub fn new(
        model: SequenceAutoencoder,
        normalization: NormalizationStats,
        threshold: f32,
        provenance: Provenance,
    ) -> Result<Self> {
        validate_threshold(threshold)?;
        normalization.validate()?;
        if normalization.feature_count() != model.config().input_dim {
            return Err(EngineError::shape(
                format!("normalization for {} features", model.config().input_dim),
                format!("normalization for {} features", normalization.feature_count()),
            ));
        }

        Ok(Self {
            model,
            normalization,
            threshold,
            provenance,
        })
    }

    pub fn model(&self) -> &SequenceAutoencoder {
        &self.model
    }

    pub fn variant(&self) -> ModelVariant {
        self.model.variant()
    }

    pub fn config(&self) -> &ModelConfig {
        self.model.config()
    }

    pub fn normalization(&self) -> &NormalizationStats {
        &self.normalization
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn sidecar(&self) -> PackageSidecar {
        PackageSidecar {
            variant: self.variant(),
            config: *self.config(),
            threshold: self.threshold,
            normalization: self.normalization.clone(),
            provenance: self.provenance.clone(),
        }
    }

    // ========================================================================
    // ENCODE / DECODE
    // ========================================================================

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let tensors = self.model.params().tensors();

        let header = PackageHeader {
            variant: self.variant(),
            config: Some(*self.config()),
            normalization: self.normalization.clone(),
            threshold: self.threshold,
            provenance: self.provenance.clone(),
            tensors: tensors
                .iter()
                .map(|(name, t)| TensorEntry {
                    name: name.clone(),
                    shape: t.shape().to_vec(),
                })
                .collect(),
        };
        let header_json = serde_json::to_vec(&header)?;
        let header_len = u32::try_from(header_json.len())
            .map_err(|_| EngineError::InvalidPackage("header too large".to_string()))?;

        let payload_len: usize = tensors.iter().map(|(_, t)| t.len() * 4).sum();
        let mut bytes = Vec::with_capacity(PREAMBLE_SIZE + header_json.len() + payload_len + DIGEST_SIZE);
        bytes.extend_from_slice(PACKAGE_MAGIC);
        bytes.extend_from_slice(&PACKAGE_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&header_len.to_le_bytes());
        bytes.extend_from_slice(&header_json);

        for (_, tensor) in &tensors {
            for value in tensor.iter() {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }

        let digest = Sha256::digest(&bytes);
        bytes.extend_from_slice(&digest);

        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PREAMBLE_SIZE + DIGEST_SIZE {
            return Err(EngineError::InvalidPackage(format!(
                "data too short: {} bytes",
                bytes.len()
            )));
        }
        if &bytes[0..4] != PACKAGE_MAGIC {
            return Err(EngineError::InvalidPackage(format!(
                "invalid magic bytes: {:?}",
                &bytes[0..4]
            )));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != PACKAGE_FORMAT_VERSION {
            return Err(EngineError::InvalidPackage(format!(
                "unsupported format version {}",
                version
            )));
        }

        let (body, trailer) = bytes.split_at(bytes.len() - DIGEST_SIZE);
        let digest = Sha256::digest(body);
        if digest.as_slice() != trailer {
            return Err(EngineError::InvalidPackage(format!(
                "checksum mismatch: stored {}, computed {}",
                hex::encode(trailer),
                hex::encode(digest)
            )));
        }

        let header_len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let header_end = PREAMBLE_SIZE
            .checked_add(header_len)
            .filter(|end| *end <= body.len())
            .ok_or_else(|| EngineError::InvalidPackage("header length out of range".to_string()))?;
        let header: PackageHeader = serde_json::from_slice(&body[PREAMBLE_SIZE..header_end])
            .map_err(|e| EngineError::InvalidPackage(format!("bad header: {}", e)))?;

        let config = header.config.ok_or_else(|| {
            EngineError::ConfigMismatch("package does not record a model config".to_string())
        })?;

        // Tensor index must be exactly what the config describes
        if tensor_count(header.variant, &config) != Some(header.tensors.len()) {
            return Err(EngineError::ConfigMismatch(format!(
                "package has {} tensors, {} config needs {:?}",
                header.tensors.len(),
                header.variant,
                tensor_count(header.variant, &config)
            )));
        }
        let layout = tensor_layout(header.variant, &config)?;
        for ((name, shape), entry) in layout.iter().zip(&header.tensors) {
            if *name != entry.name || *shape != entry.shape {
                return Err(EngineError::ConfigMismatch(format!(
                    "tensor {} {:?} does not match config ({} {:?})",
                    entry.name, entry.shape, name, shape
                )));
            }
        }

        let payload = &body[header_end..];
        let expected_bytes = header
            .tensors
            .iter()
            .try_fold(0usize, |acc, t| acc.checked_add(t.byte_len()?))
            .ok_or_else(|| EngineError::InvalidPackage("tensor index size overflows".to_string()))?;
        if payload.len() != expected_bytes {
            return Err(EngineError::InvalidPackage(format!(
                "payload is {} bytes, tensor index needs {}",
                payload.len(),
                expected_bytes
            )));
        }

        let mut named = HashMap::with_capacity(header.tensors.len());
        let mut offset = 0;
        for entry in &header.tensors {
            // Sizes were summed without overflow above
            let end = offset + entry.byte_len().unwrap_or(0);
            let values: Vec<f32> = payload[offset..end]
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            let tensor = ArrayD::from_shape_vec(entry.shape.clone(), values)
                .map_err(|e| EngineError::InvalidPackage(format!("tensor {}: {}", entry.name, e)))?;
            named.insert(entry.name.clone(), tensor);
            offset = end;
        }

        let mut model = SequenceAutoencoder::zeroed(header.variant, config)?;
        model.load_tensors(&named)?;

        if config.input_dim == FEATURE_COUNT {
            validate_layout(header.provenance.layout)?;
        }
        if header.normalization.feature_count() != config.input_dim {
            return Err(EngineError::InvalidPackage(format!(
                "normalization has {} features, config has {}",
                header.normalization.feature_count(),
                config.input_dim
            )));
        }
        validate_threshold(header.threshold)
            .map_err(|e| EngineError::InvalidPackage(e.to_string()))?;

        Self::new(model, header.normalization, header.threshold, header.provenance)
    }

    // ========================================================================
    // FILES
    // ========================================================================

    /// Write package + sidecar atomically (tmp sibling → rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_bytes()?)?;
        write_atomic(&sidecar_path(path), &serde_json::to_vec_pretty(&self.sidecar())?)?;

        log::info!(
            "Model package saved: {} ({} variant, threshold {:.6}, id {})",
            path.display(),
            self.variant(),
            self.threshold,
            self.provenance.package_id
        );
        Ok(())
    }

    /// Load and fully validate a package. Absent/unreadable → `MissingModel`.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => EngineError::MissingModel {
                path: path.to_path_buf(),
            },
            _ => EngineError::Io(e),
        })?;

        let package = Self::from_bytes(&bytes)?;
        log::info!(
            "Model package loaded: {} ({}, L={}, threshold {:.6})",
            path.display(),
            package.variant(),
            package.config().sequence_length,
            package.threshold
        );
        Ok(package)
    }
}

fn validate_threshold(threshold: f32) -> Result<()> {
    if !threshold.is_finite() || threshold <= 0.0 {
        return Err(EngineError::InvalidParameter(format!(
            "threshold must be finite and > 0, got {}",
            threshold
        )));
    }
    Ok(())
}

/// `<path>.json`
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

/// Write to `<path>.tmp` then rename into place
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn package(variant: ModelVariant) -> ModelPackage {
        let config = ModelConfig {
            input_dim: FEATURE_COUNT,
            hidden_dim: 6,
            latent_dim: 3,
            num_layers: 2,
            sequence_length: 4,
        };
        let model = SequenceAutoencoder::new(variant, config, 21).unwrap();
        let history = TrainingHistory {
            best_loss: 0.01,
            best_epoch: 3,
            epochs_run: 5,
            ..Default::default()
        };
        ModelPackage::new(
            model,
            NormalizationStats::identity(FEATURE_COUNT),
            0.05,
            Provenance::from_history(&history),
        )
        .unwrap()
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("models").join("model.osae");

        for variant in [ModelVariant::GatedWithCell, ModelVariant::GatedSimple] {
            let original = package(variant);
            original.save(&path).unwrap();

            let loaded = ModelPackage::load(&path).unwrap();
            assert_eq!(loaded, original);
            assert!(sidecar_path(&path).exists());
        }
    }

    #[test]
    fn test_sidecar_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.osae");
        let pkg = package(ModelVariant::GatedSimple);
        pkg.save(&path).unwrap();

        let raw = fs::read(sidecar_path(&path)).unwrap();
        let sidecar: PackageSidecar = serde_json::from_slice(&raw).unwrap();
        assert_eq!(sidecar, pkg.sidecar());

        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["variant"], "gated-simple");
        assert_eq!(value["config"]["sequence_length"], 4);
    }

    #[test]
    fn test_missing_file_is_missing_model() {
        let dir = TempDir::new().unwrap();
        let err = ModelPackage::load(&dir.path().join("nope.osae")).unwrap_err();
        assert!(err.is_missing_model());
    }

    #[test]
    fn test_corruption_detected() {
        let mut bytes = package(ModelVariant::GatedWithCell).to_bytes().unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(matches!(
            ModelPackage::from_bytes(&bytes),
            Err(EngineError::InvalidPackage(_))
        ));

        assert!(matches!(
            ModelPackage::from_bytes(b"OSAE"),
            Err(EngineError::InvalidPackage(_))
        ));
    }

    /// Rewrite the header and re-seal the digest
    fn reseal(bytes: &[u8], edit: impl Fn(&mut serde_json::Value)) -> Vec<u8> {
        let header_len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let mut header: serde_json::Value =
            serde_json::from_slice(&bytes[PREAMBLE_SIZE..PREAMBLE_SIZE + header_len]).unwrap();
        edit(&mut header);
        let new_header = serde_json::to_vec(&header).unwrap();

        let mut out = bytes[..4].to_vec();
        out.extend_from_slice(&bytes[4..8]);
        out.extend_from_slice(&(new_header.len() as u32).to_le_bytes());
        out.extend_from_slice(&new_header);
        out.extend_from_slice(&bytes[PREAMBLE_SIZE + header_len..bytes.len() - DIGEST_SIZE]);
        let digest = Sha256::digest(&out);
        out.extend_from_slice(&digest);
        out
    }

    #[test]
    fn test_missing_config_is_config_mismatch() {
        let bytes = package(ModelVariant::GatedWithCell).to_bytes().unwrap();
        let edited = reseal(&bytes, |h| {
            h.as_object_mut().unwrap().remove("config");
        });
        assert!(matches!(
            ModelPackage::from_bytes(&edited),
            Err(EngineError::ConfigMismatch(_))
        ));
    }

    #[test]
    fn test_wrong_config_is_config_mismatch() {
        let bytes = package(ModelVariant::GatedWithCell).to_bytes().unwrap();
        let edited = reseal(&bytes, |h| {
            h["config"]["hidden_dim"] = serde_json::json!(7);
        });
        assert!(matches!(
            ModelPackage::from_bytes(&edited),
            Err(EngineError::ConfigMismatch(_))
        ));
    }

    #[test]
    fn test_oversized_config_is_error_not_panic() {
        let bytes = package(ModelVariant::GatedWithCell).to_bytes().unwrap();
        for (field, value) in [
            ("hidden_dim", serde_json::json!(1u64 << 62)),
            ("num_layers", serde_json::json!(1u64 << 60)),
            ("latent_dim", serde_json::json!(u64::MAX)),
        ] {
            let edited = reseal(&bytes, |h| {
                h["config"][field] = value.clone();
            });
            assert!(
                matches!(ModelPackage::from_bytes(&edited), Err(EngineError::ConfigMismatch(_))),
                "{} = {}",
                field,
                value
            );
        }
    }

    #[test]
    fn test_tensor_index_disagreeing_with_config() {
        let bytes = package(ModelVariant::GatedSimple).to_bytes().unwrap();
        let edited = reseal(&bytes, |h| {
            h["tensors"][0]["shape"] = serde_json::json!([1u64 << 62, 1u64 << 62]);
        });
        assert!(matches!(
            ModelPackage::from_bytes(&edited),
            Err(EngineError::ConfigMismatch(_))
        ));
    }

    #[test]
    fn test_stale_layout_rejected() {
        let bytes = package(ModelVariant::GatedSimple).to_bytes().unwrap();
        let edited = reseal(&bytes, |h| {
            h["provenance"]["layout"]["version"] = serde_json::json!(99);
        });
        assert!(matches!(
            ModelPackage::from_bytes(&edited),
            Err(EngineError::LayoutMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_threshold_rejected() {
        let pkg = package(ModelVariant::GatedSimple);
        assert!(ModelPackage::new(
            pkg.model().clone(),
            pkg.normalization().clone(),
            0.0,
            pkg.provenance().clone()
        )
        .is_err());
    }
}
