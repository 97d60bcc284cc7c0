//! Streaming statistics with O(1) memory
//!
//! `StreamingStats` keeps count, sum, sum of squares and extremes so that any
//! number of observations can be summarised without retaining them. Partial
//! aggregates built on different workers combine with `merge`.
//!
//! Percentiles are approximate: once at least five samples exist they are
//! interpolated linearly between the observed minimum and maximum. They are a
//! coarse indicator, not an exact quantile.

use serde::{Deserialize, Serialize};

const MIN_SAMPLES_FOR_PERCENTILES: u64 = 5;

/// Running aggregate over a stream of `f64` values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingStats {
    pub count: u64,
    pub sum: f64,
    pub sum_of_squares: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl StreamingStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation. Non-finite values are dropped without being counted.
    pub fn add(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        self.sum += value;
        self.sum_of_squares += value * value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    /// Record an optional observation; `None` is treated as missing.
    pub fn add_opt(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.add(v);
        }
    }

    /// Fold another independently accumulated instance into this one.
    pub fn merge(&mut self, other: &StreamingStats) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_of_squares += other.sum_of_squares;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }

    /// Population variance via `E[x^2] - E[x]^2`, clamped at zero.
    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        let mean_sq = self.sum_of_squares / self.count as f64;
        Some((mean_sq - mean * mean).max(0.0))
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    /// Approximate percentile (`p` in 0..=100), `None` below five samples.
    pub fn approx_percentile(&self, p: f64) -> Option<f64> {
        if self.count < MIN_SAMPLES_FOR_PERCENTILES {
            return None;
        }
        let (min, max) = (self.min?, self.max?);
        let fraction = (p / 100.0).clamp(0.0, 1.0);
        Some(min + (max - min) * fraction)
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            count: self.count,
            mean: self.mean(),
            std_dev: self.std_dev(),
            min: self.min,
            max: self.max,
            p50: self.approx_percentile(50.0),
            p90: self.approx_percentile(90.0),
            p95: self.approx_percentile(95.0),
            p99: self.approx_percentile(99.0),
        }
    }
}

/// Read-only view of a `StreamingStats` for reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub count: u64,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Approximate; see module docs
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

/// Byte-reduction accumulator for (original, transformed) size pairs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeReductionStats {
    pub count: u64,
    pub total_original_bytes: u64,
    pub total_transformed_bytes: u64,
    pub reduction_percent: StreamingStats,
}

impl SizeReductionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one pair. Pairs with a non-positive original (or negative
    /// transformed) size are ignored.
    pub fn add(&mut self, original: i64, transformed: i64) {
        if original <= 0 || transformed < 0 {
            return;
        }
        self.count += 1;
        self.total_original_bytes += original as u64;
        self.total_transformed_bytes += transformed as u64;
        let reduction = (original - transformed) as f64 / original as f64 * 100.0;
        self.reduction_percent.add(reduction);
    }

    pub fn merge(&mut self, other: &SizeReductionStats) {
        self.count += other.count;
        self.total_original_bytes += other.total_original_bytes;
        self.total_transformed_bytes += other.total_transformed_bytes;
        self.reduction_percent.merge(&other.reduction_percent);
    }

    /// Reduction across all bytes seen, weighted by size.
    pub fn overall_reduction_percent(&self) -> Option<f64> {
        if self.total_original_bytes == 0 {
            return None;
        }
        let saved = self.total_original_bytes as f64 - self.total_transformed_bytes as f64;
        Some(saved / self.total_original_bytes as f64 * 100.0)
    }

    pub fn summary(&self) -> ReductionSummary {
        ReductionSummary {
            count: self.count,
            total_original_bytes: self.total_original_bytes,
            total_transformed_bytes: self.total_transformed_bytes,
            overall_reduction_percent: self.overall_reduction_percent(),
            per_item_percent: self.reduction_percent.summary(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReductionSummary {
    pub count: u64,
    pub total_original_bytes: u64,
    pub total_transformed_bytes: u64,
    pub overall_reduction_percent: Option<f64>,
    pub per_item_percent: StatsSummary,
}
