//! Size Classifier Module
//!
//! Buckets objects into small/medium/large so worker concurrency can be split
//! by expected processing cost.

use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Coarse size bucket of a media object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeCategory {
    Small,
    Medium,
    Large,
}

impl SizeCategory {
    pub const ALL: [SizeCategory; 3] = [SizeCategory::Small, SizeCategory::Medium, SizeCategory::Large];

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeCategory::Small => "small",
            SizeCategory::Medium => "medium",
            SizeCategory::Large => "large",
        }
    }
}

impl std::fmt::Display for SizeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an object size in bytes.
///
/// Returns `Small` if `size_bytes < small_threshold_mib`, `Medium` if
/// `size_bytes < medium_threshold_mib`, otherwise `Large`. Each band is
/// inclusive on its lower edge.
///
/// # Arguments
/// * `size_bytes` - Object size in bytes
/// * `small_threshold_mib` - Upper (exclusive) bound of the small band, in MiB
/// * `medium_threshold_mib` - Upper (exclusive) bound of the medium band, in MiB
pub fn classify(size_bytes: u64, small_threshold_mib: u64, medium_threshold_mib: u64) -> SizeCategory {
    let small = small_threshold_mib.saturating_mul(MIB);
    let medium = medium_threshold_mib.saturating_mul(MIB);

    if size_bytes < small {
        SizeCategory::Small
    } else if size_bytes < medium {
        SizeCategory::Medium
    } else {
        SizeCategory::Large
    }
}

/// Threshold pair taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeThresholds {
    pub small_mib: u64,
    pub medium_mib: u64,
}

impl SizeThresholds {
    pub fn classify(&self, size_bytes: u64) -> SizeCategory {
        classify(size_bytes, self.small_mib, self.medium_mib)
    }
}

impl Default for SizeThresholds {
    fn default() -> Self {
        Self {
            small_mib: 50,
            medium_mib: 200,
        }
    }
}

impl From<&crate::config::SizeConfig> for SizeThresholds {
    fn from(cfg: &crate::config::SizeConfig) -> Self {
        Self {
            small_mib: cfg.small_threshold_mib,
            medium_mib: cfg.medium_threshold_mib,
        }
    }
}
