//! Object inventory input
//!
//! A listing tool produces a JSON array of `{path, size}` pairs; each entry
//! becomes a `MediaObject` classified once against the size thresholds.

use crate::size_class::{SizeCategory, SizeThresholds};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One line of listing output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub path: String,
    #[serde(alias = "sizeBytes", alias = "size_bytes")]
    pub size: u64,
}

/// A remote object scheduled for warming. Immutable once classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaObject {
    pub path: String,
    pub size_bytes: u64,
    pub size_category: SizeCategory,
}

impl MediaObject {
    pub fn new(path: impl Into<String>, size_bytes: u64, thresholds: &SizeThresholds) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            size_category: thresholds.classify(size_bytes),
        }
    }
}

pub fn parse_inventory(json: &str) -> Result<Vec<InventoryEntry>, serde_json::Error> {
    serde_json::from_str(json)
}

/// Read a listing file.
pub fn load_inventory(path: &Path) -> Result<Vec<InventoryEntry>, InventoryError> {
    let content = std::fs::read_to_string(path).map_err(|source| InventoryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let entries = parse_inventory(&content).map_err(|source| InventoryError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), entries = entries.len(), "Loaded inventory");
    Ok(entries)
}

/// Classify entries. Entries with an empty path are dropped, and a repeated
/// path keeps its first entry.
pub fn to_media_objects(entries: &[InventoryEntry], thresholds: &SizeThresholds) -> Vec<MediaObject> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter_map(|entry| {
            let path = entry.path.trim().trim_start_matches('/');
            if path.is_empty() {
                warn!("Skipping inventory entry with an empty path");
                return None;
            }
            if !seen.insert(path) {
                warn!(path, size = entry.size, "Skipping duplicate inventory entry");
                return None;
            }
            Some(MediaObject::new(path, entry.size, thresholds))
        })
        .collect()
}
