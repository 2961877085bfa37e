//! Feature Layout - Summary Vector Definition
//!
//! **CRITICAL: This file controls the Summary Vector schema**
//!
//! ## Rules (NEVER break these):
//! 1. Add feature → increment FEATURE_VERSION
//! 2. Change order → increment FEATURE_VERSION
//! 3. Remove feature → increment FEATURE_VERSION
//!
//! Model packages record the layout version + hash they were trained on and
//! refuse to load against a different layout.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ============================================================================
// FEATURE VERSION
// ============================================================================

/// Current Summary Vector layout version
pub const FEATURE_VERSION: u8 = 1;

// ============================================================================
// FEATURE LAYOUT (Authoritative source)
// ============================================================================

/// Feature names in exact order they appear in a Summary Vector
pub const FEATURE_LAYOUT: &[&str] = &[
    // === CPU (0-1) ===
    "avg_cpu",            // 0: average CPU percent over the summary period
    "max_cpu",            // 1: peak CPU percent

    // === Memory (2-3) ===
    "avg_memory",         // 2: average memory (MB)
    "max_memory",         // 3: peak memory (MB)

    // === Network / Disk (4-7), log-scaled byte rates ===
    "net_sent",           // 4
    "net_recv",           // 5
    "disk_read",          // 6
    "disk_write",         // 7

    // === Process (8) ===
    "unique_processes",   // 8

    // === Derived rates (9-14) ===
    "network_ratio",      // 9: sent / (sent + recv)
    "cpu_spike_rate",     // 10
    "memory_spike_rate",  // 11
    "new_process_rate",   // 12
    "disk_io_rate",       // 13
    "churn_rate",         // 14: process create+exit per interval
];

/// Total number of features (F)
/// IMPORTANT: Must match FEATURE_LAYOUT.len()!
pub const FEATURE_COUNT: usize = 15;

// ============================================================================
// LAYOUT HASH
// ============================================================================

/// CRC32 of version + ordered feature names
pub fn layout_hash() -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[FEATURE_VERSION]);

    for name in FEATURE_LAYOUT {
        hasher.update(name.as_bytes());
        hasher.update(&[0]); // Separator
    }

    hasher.finalize()
}

/// Layout stamp stored in model packages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutStamp {
    pub version: u8,
    pub hash: u32,
}

impl LayoutStamp {
    pub fn current() -> Self {
        Self {
            version: FEATURE_VERSION,
            hash: layout_hash(),
        }
    }
}

/// Validate that a recorded layout matches the current one
pub fn validate_layout(stamp: LayoutStamp) -> Result<()> {
    let current = LayoutStamp::current();
    if stamp != current {
        return Err(EngineError::LayoutMismatch {
            expected_version: current.version,
            expected_hash: current.hash,
            actual_version: stamp.version,
            actual_hash: stamp.hash,
        });
    }
    Ok(())
}

/// Get feature index by name
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_LAYOUT.iter().position(|&n| n == name)
}

/// Get feature name by index
pub fn feature_name(index: usize) -> Option<&'static str> {
    FEATURE_LAYOUT.get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_count() {
        assert_eq!(FEATURE_LAYOUT.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_layout_hash_stable() {
        assert_eq!(layout_hash(), layout_hash());
        assert_ne!(layout_hash(), 0);
    }

    #[test]
    fn test_validate_layout() {
        assert!(validate_layout(LayoutStamp::current()).is_ok());

        let stale = LayoutStamp {
            version: FEATURE_VERSION + 1,
            hash: layout_hash(),
        };
        assert!(matches!(
            validate_layout(stale),
            Err(EngineError::LayoutMismatch { .. })
        ));
    }

    #[test]
    fn test_feature_lookup() {
        assert_eq!(feature_index("avg_cpu"), Some(0));
        assert_eq!(feature_index("churn_rate"), Some(14));
        assert_eq!(feature_name(9), Some("network_ratio"));
        assert_eq!(feature_name(15), None);
    }
}
