//! External KV inventory reconciliation
//!
//! The external store lists keys of the form
//! `video:<path>:derivative=<name>[_chunk_<n>]`. Chunked entries are summed
//! under their parent key before comparing against what the run observed.

use crate::scheduler::ObjectResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Relative size difference still considered a match
pub const SIZE_TOLERANCE: f64 = 0.01;

const KEY_PREFIX: &str = "video:";
const DERIVATIVE_MARKER: &str = ":derivative=";
const CHUNK_MARKER: &str = "_chunk_";

#[derive(Debug, Error)]
pub enum KvError {
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

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KvMetadata {
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvKey {
    pub name: String,
    #[serde(default)]
    pub metadata: KvMetadata,
}

/// Raw snapshot as exported from the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KvSnapshot {
    #[serde(default)]
    pub keys: Vec<KvKey>,
}

/// Components of a parsed key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub path: String,
    pub derivative: String,
    pub chunk: Option<u32>,
}

/// Parse `video:<path>:derivative=<name>[_chunk_<n>]`.
///
/// The path may itself contain `:`; the last `:derivative=` wins.
pub fn parse_kv_key(name: &str) -> Option<ParsedKey> {
    let rest = name.strip_prefix(KEY_PREFIX)?;
    let (path, derivative) = rest.rsplit_once(DERIVATIVE_MARKER)?;
    if path.is_empty() || derivative.is_empty() {
        return None;
    }

    let (derivative, chunk) = match derivative.rsplit_once(CHUNK_MARKER) {
        Some((base, n)) if !base.is_empty() => match n.parse::<u32>() {
            Ok(n) => (base, Some(n)),
            Err(_) => (derivative, None),
        },
        _ => (derivative, None),
    };

    Some(ParsedKey {
        path: path.trim_start_matches('/').to_string(),
        derivative: derivative.to_string(),
        chunk,
    })
}

/// Sizes keyed by `(path, derivative)` after chunk aggregation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InventorySnapshot {
    pub entries: BTreeMap<(String, String), u64>,
    /// Key names that did not match the grammar
    pub unparsed: Vec<String>,
}

impl InventorySnapshot {
    /// Summed chunks replace the unchunked entry of the same parent key.
    pub fn from_snapshot(snapshot: &KvSnapshot) -> Self {
        let mut whole: BTreeMap<(String, String), u64> = BTreeMap::new();
        let mut chunked: BTreeMap<(String, String), u64> = BTreeMap::new();
        let mut unparsed = Vec::new();

        for key in &snapshot.keys {
            let Some(parsed) = parse_kv_key(&key.name) else {
                unparsed.push(key.name.clone());
                continue;
            };
            let size = key.metadata.size.unwrap_or(0);
            let id = (parsed.path, parsed.derivative);
            match parsed.chunk {
                Some(_) => *chunked.entry(id).or_insert(0) += size,
                None => {
                    whole.insert(id, size);
                }
            }
        }

        whole.extend(chunked);
        Self {
            entries: whole,
            unparsed,
        }
    }
}

pub fn parse_kv_inventory(json: &str) -> Result<KvSnapshot, serde_json::Error> {
    serde_json::from_str(json)
}

pub fn load_kv_inventory(path: &Path) -> Result<InventorySnapshot, KvError> {
    let content = std::fs::read_to_string(path).map_err(|source| KvError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let snapshot = parse_kv_inventory(&content).map_err(|source| KvError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let inventory = InventorySnapshot::from_snapshot(&snapshot);
    info!(
        path = %path.display(),
        keys = snapshot.keys.len(),
        entries = inventory.entries.len(),
        unparsed = inventory.unparsed.len(),
        "Loaded KV inventory"
    );
    Ok(inventory)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRecord {
    pub key: String,
    pub path: String,
    pub derivative: String,
    pub present_in_local: bool,
    pub present_in_external: bool,
    pub local_size: Option<u64>,
    pub external_size: Option<u64>,
    pub size_diff_percent: Option<f64>,
    pub matched: bool,
}

impl ComparisonRecord {
    pub fn is_size_mismatch(&self) -> bool {
        self.present_in_local && self.present_in_external && !self.matched
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub records: Vec<ComparisonRecord>,
    pub matched: u64,
    pub size_mismatch: u64,
    pub missing_in_external: u64,
    pub missing_in_local: u64,
    pub unparsed_keys: Vec<String>,
}

impl ComparisonReport {
    pub fn mismatches(&self) -> impl Iterator<Item = &ComparisonRecord> {
        self.records.iter().filter(|r| r.is_size_mismatch())
    }

    pub fn only_local(&self) -> impl Iterator<Item = &ComparisonRecord> {
        self.records.iter().filter(|r| r.present_in_local && !r.present_in_external)
    }

    pub fn only_external(&self) -> impl Iterator<Item = &ComparisonRecord> {
        self.records.iter().filter(|r| !r.present_in_local && r.present_in_external)
    }
}

/// `|local - external| / external` as a percentage
pub fn size_diff_percent(local: u64, external: u64) -> Option<f64> {
    if external == 0 {
        return None;
    }
    Some((local as f64 - external as f64).abs() / external as f64 * 100.0)
}

fn sizes_match(local: u64, external: u64) -> bool {
    match size_diff_percent(local, external) {
        Some(diff) => diff <= SIZE_TOLERANCE * 100.0,
        None => local == 0,
    }
}

/// Reconcile successful local attempts against the external snapshot.
pub fn compare(local: &[ObjectResult], external: &InventorySnapshot) -> ComparisonReport {
    let mut observed: BTreeMap<(String, String), u64> = BTreeMap::new();
    for result in local {
        for (derivative, attempt) in &result.attempts {
            if attempt.is_success() {
                observed.insert((result.path.clone(), derivative.clone()), attempt.response_bytes);
            }
        }
    }

    let keys: BTreeSet<&(String, String)> = observed.keys().chain(external.entries.keys()).collect();
    let mut report = ComparisonReport {
        unparsed_keys: external.unparsed.clone(),
        ..ComparisonReport::default()
    };

    for id in keys {
        let local_size = observed.get(id).copied();
        let external_size = external.entries.get(id).copied();
        let (path, derivative) = id;

        let (matched, diff) = match (local_size, external_size) {
            (Some(l), Some(e)) => {
                let matched = sizes_match(l, e);
                if matched {
                    report.matched += 1;
                } else {
                    report.size_mismatch += 1;
                }
                (matched, size_diff_percent(l, e))
            }
            (Some(_), None) => {
                report.missing_in_external += 1;
                (false, None)
            }
            _ => {
                report.missing_in_local += 1;
                (false, None)
            }
        };

        report.records.push(ComparisonRecord {
            key: format!("{}{}{}{}", KEY_PREFIX, path, DERIVATIVE_MARKER, derivative),
            path: path.clone(),
            derivative: derivative.clone(),
            present_in_local: local_size.is_some(),
            present_in_external: external_size.is_some(),
            local_size,
            external_size,
            size_diff_percent: diff,
            matched,
        });
    }

    debug!(
        matched = report.matched,
        mismatched = report.size_mismatch,
        missing_in_external = report.missing_in_external,
        missing_in_local = report.missing_in_local,
        "Comparison complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Outcome, ProcessingAttempt, RequestMethod};
    use crate::size_class::SizeCategory;
    use chrono::Utc;
    use proptest::prelude::*;

    fn attempt(bytes: u64, outcome: Outcome) -> ProcessingAttempt {
        ProcessingAttempt {
            url: "http://edge/x".to_string(),
            attempt_number: 0,
            method: RequestMethod::Get,
            status_code: Some(200),
            ttfb_seconds: Some(0.5),
            total_seconds: Some(1.0),
            response_bytes: bytes,
            original_bytes: 0,
            reduction_percent: None,
            outcome,
            error_kind: None,
            error_detail: None,
        }
    }

    fn object(path: &str, attempts: &[(&str, ProcessingAttempt)]) -> ObjectResult {
        ObjectResult {
            path: path.to_string(),
            size_bytes: 1,
            category: SizeCategory::Small,
            attempts: attempts.iter().map(|(d, a)| (d.to_string(), a.clone())).collect(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    fn snapshot(keys: &[(&str, u64)]) -> InventorySnapshot {
        InventorySnapshot::from_snapshot(&KvSnapshot {
            keys: keys
                .iter()
                .map(|(name, size)| KvKey {
                    name: name.to_string(),
                    metadata: KvMetadata {
                        size: Some(*size),
                        extra: BTreeMap::new(),
                    },
                })
                .collect(),
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_key_grammar_round_trips(
            path in "[a-z0-9/_.-]{1,30}".prop_filter("path must not start with /", |p| !p.starts_with('/')),
            derivative in "[a-z]{1,10}",
            chunk in proptest::option::of(0u32..1000),
        ) {
            let name = match chunk {
                Some(n) => format!("video:{}:derivative={}_chunk_{}", path, derivative, n),
                None => format!("video:{}:derivative={}", path, derivative),
            };
            let parsed = parse_kv_key(&name).unwrap();
            prop_assert_eq!(parsed.path, path);
            prop_assert_eq!(parsed.derivative, derivative);
            prop_assert_eq!(parsed.chunk, chunk);
        }
    }

    #[test]
    fn test_parse_key_edge_cases() {
        assert_eq!(parse_kv_key("image:a.jpg:derivative=x"), None);
        assert_eq!(parse_kv_key("video:a.mp4"), None);
        assert_eq!(parse_kv_key("video::derivative=x"), None);
        let parsed = parse_kv_key("video:a:b.mp4:derivative=mobile_chunk_x").unwrap();
        assert_eq!(parsed.path, "a:b.mp4");
        assert_eq!(parsed.derivative, "mobile_chunk_x");
        assert_eq!(parsed.chunk, None);
    }

    #[test]
    fn test_chunks_are_summed_under_parent() {
        let snapshot = snapshot(&[
            ("video:big.mp4:derivative=desktop", 10),
            ("video:big.mp4:derivative=desktop_chunk_0", 600),
            ("video:big.mp4:derivative=desktop_chunk_1", 400),
            ("garbage", 1),
        ]);
        assert_eq!(
            snapshot.entries.get(&("big.mp4".to_string(), "desktop".to_string())),
            Some(&1000)
        );
        assert_eq!(snapshot.unparsed, vec!["garbage".to_string()]);
    }

    #[test]
    fn test_one_percent_tolerance() {
        let local = vec![
            object("a.mp4", &[("desktop", attempt(1_000_000, Outcome::Success))]),
            object("b.mp4", &[("desktop", attempt(1_000_000, Outcome::Success))]),
        ];
        let external = snapshot(&[
            ("video:a.mp4:derivative=desktop", 1_005_000),
            ("video:b.mp4:derivative=desktop", 1_050_000),
        ]);

        let report = compare(&local, &external);
        assert_eq!(report.matched, 1);
        assert_eq!(report.size_mismatch, 1);
        let a = report.records.iter().find(|r| r.path == "a.mp4").unwrap();
        assert!(a.matched);
        let b = report.mismatches().next().unwrap();
        assert_eq!(b.path, "b.mp4");
        assert!(b.size_diff_percent.unwrap() > 4.0);
    }

    #[test]
    fn test_one_sided_presence() {
        let local = vec![object(
            "a.mp4",
            &[
                ("desktop", attempt(100, Outcome::Success)),
                ("mobile", attempt(0, Outcome::HttpError)),
            ],
        )];
        let external = snapshot(&[
            ("video:a.mp4:derivative=mobile", 50),
            ("video:c.mp4:derivative=desktop", 70),
        ]);

        let report = compare(&local, &external);
        assert_eq!(report.matched, 0);
        assert_eq!(report.missing_in_external, 1);
        assert_eq!(report.missing_in_local, 2);
        assert_eq!(report.only_local().count(), 1);
        assert_eq!(report.only_external().count(), 2);
        assert_eq!(report.records.len(), 3);
    }

    #[test]
    fn test_load_kv_inventory_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("kv.json");
        std::fs::write(
            &file,
            r#"{"keys": [{"name": "video:x.mp4:derivative=desktop", "metadata": {"size": 42, "etag": "abc"}}]}"#,
        )
        .unwrap();
        let inventory = load_kv_inventory(&file).unwrap();
        assert_eq!(inventory.entries.len(), 1);
        assert!(matches!(
            load_kv_inventory(&dir.path().join("missing.json")),
            Err(KvError::Io { .. })
        ));
    }
}
