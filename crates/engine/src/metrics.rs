//! Metrics module
//!
//! Run-wide aggregate of warming results plus host resource sampling. The
//! aggregate is shared behind a lock but has exactly one writer, the
//! scheduler's collector task; everything else only reads it.

use crate::error::{ErrorEntry, ErrorKind};
use crate::scheduler::ObjectResult;
use crate::size_class::SizeCategory;
use crate::stats::{SizeReductionStats, StreamingStats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Request counters for one derivative
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivativeStats {
    pub requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub response_bytes: u64,
}

impl DerivativeStats {
    fn merge(&mut self, other: &DerivativeStats) {
        self.requests += other.requests;
        self.success_count += other.success_count;
        self.error_count += other.error_count;
        self.response_bytes += other.response_bytes;
    }
}

/// Sub-aggregate for one size category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    pub objects: u64,
    pub original_bytes: u64,
    pub requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub ttfb: StreamingStats,
    pub total_time: StreamingStats,
}

impl CategoryStats {
    fn merge(&mut self, other: &CategoryStats) {
        self.objects += other.objects;
        self.original_bytes += other.original_bytes;
        self.requests += other.requests;
        self.success_count += other.success_count;
        self.error_count += other.error_count;
        self.ttfb.merge(&other.ttfb);
        self.total_time.merge(&other.total_time);
    }
}

/// Run-wide aggregate of sealed object results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    /// Objects the run was asked to process
    pub expected_objects: u64,
    /// Objects whose derivatives have all completed
    pub total_processed: u64,
    pub total_original_bytes: u64,
    pub total_response_bytes: u64,
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub by_derivative: BTreeMap<String, DerivativeStats>,
    pub by_category: BTreeMap<SizeCategory, CategoryStats>,
    pub ttfb: StreamingStats,
    pub total_time: StreamingStats,
    pub error_counts: BTreeMap<ErrorKind, u64>,
    pub size_reduction: SizeReductionStats,
    pub errors: Vec<ErrorEntry>,
}

impl AggregateStats {
    pub fn new(expected_objects: u64) -> Self {
        Self {
            expected_objects,
            ..Self::default()
        }
    }

    /// Fold one sealed object into the aggregate.
    pub fn fold(&mut self, result: &ObjectResult) {
        self.total_processed += 1;
        self.total_original_bytes += result.size_bytes;

        let category = self.by_category.entry(result.category).or_default();
        category.objects += 1;
        category.original_bytes += result.size_bytes;

        for (derivative, attempt) in &result.attempts {
            self.total_requests += 1;
            category.requests += 1;
            let per_derivative = self.by_derivative.entry(derivative.clone()).or_default();
            per_derivative.requests += 1;

            if attempt.is_success() {
                self.success_count += 1;
                category.success_count += 1;
                per_derivative.success_count += 1;
                per_derivative.response_bytes += attempt.response_bytes;
                self.total_response_bytes += attempt.response_bytes;

                self.ttfb.add_opt(attempt.ttfb_seconds);
                self.total_time.add_opt(attempt.total_seconds);
                category.ttfb.add_opt(attempt.ttfb_seconds);
                category.total_time.add_opt(attempt.total_seconds);

                if attempt.reduction_percent.is_some() {
                    self.size_reduction
                        .add(attempt.original_bytes as i64, attempt.response_bytes as i64);
                }
            } else {
                self.error_count += 1;
                category.error_count += 1;
                per_derivative.error_count += 1;
                if let Some(entry) = attempt.error_entry(&result.path, derivative) {
                    *self.error_counts.entry(entry.kind).or_insert(0) += 1;
                    self.errors.push(entry);
                }
            }
        }
    }

    /// Combine two partial aggregates. Counters and distributions merge
    /// commutatively; error entries are appended in argument order.
    pub fn merge(&mut self, other: &AggregateStats) {
        self.expected_objects += other.expected_objects;
        self.total_processed += other.total_processed;
        self.total_original_bytes += other.total_original_bytes;
        self.total_response_bytes += other.total_response_bytes;
        self.total_requests += other.total_requests;
        self.success_count += other.success_count;
        self.error_count += other.error_count;
        for (name, stats) in &other.by_derivative {
            self.by_derivative.entry(name.clone()).or_default().merge(stats);
        }
        for (category, stats) in &other.by_category {
            self.by_category.entry(*category).or_default().merge(stats);
        }
        self.ttfb.merge(&other.ttfb);
        self.total_time.merge(&other.total_time);
        for (kind, count) in &other.error_counts {
            *self.error_counts.entry(*kind).or_insert(0) += count;
        }
        self.size_reduction.merge(&other.size_reduction);
        self.errors.extend(other.errors.iter().cloned());
    }

    pub fn percent_complete(&self) -> f64 {
        if self.expected_objects == 0 {
            100.0
        } else {
            self.total_processed as f64 / self.expected_objects as f64 * 100.0
        }
    }
}

/// System-level metrics for resource monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

/// Shared aggregate; written only by the scheduler's collector
pub type SharedStats = Arc<RwLock<AggregateStats>>;

pub fn new_shared_stats(expected_objects: u64) -> SharedStats {
    Arc::new(RwLock::new(AggregateStats::new(expected_objects)))
}

/// Collects current system metrics using sysinfo
pub fn collect_system_metrics() -> SystemMetrics {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu_usage = sys.global_cpu_usage();
    let total_memory = sys.total_memory();
    let used_memory = sys.used_memory();
    let mem_usage = if total_memory > 0 {
        (used_memory as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };

    let load_avg = System::load_average();

    SystemMetrics {
        cpu_usage_percent: cpu_usage,
        mem_usage_percent: mem_usage,
        load_avg_1: load_avg.one as f32,
        load_avg_5: load_avg.five as f32,
        load_avg_15: load_avg.fifteen as f32,
    }
}
