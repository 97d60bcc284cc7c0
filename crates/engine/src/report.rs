//! Report generation
//!
//! The result JSON is the same document for checkpoints and the final write:
//! parameters, summary counters, per-object results, every recorded error and
//! the performance breakdowns. A markdown rendering of the same data and the
//! KV comparison report are written alongside it when configured.

use crate::checkpoint::write_atomic;
use crate::config::Config;
use crate::error::{ErrorEntry, ErrorKind};
use crate::job_executor::TranscodeSummary;
use crate::kv::ComparisonReport;
use crate::metrics::{collect_system_metrics, AggregateStats, CategoryStats, DerivativeStats, SystemMetrics};
use crate::scheduler::{CheckpointSink, ObjectResult};
use crate::size_class::SizeCategory;
use crate::stats::{ReductionSummary, StatsSummary};
use crate::validate::ValidationSummary;
use crate::ConcurrencyPlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Settings the run was started with, echoed into every report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParameters {
    pub run_id: String,
    pub base_url: String,
    pub derivative_param: String,
    pub derivatives: Vec<String>,
    pub pool_size: u32,
    pub small_workers: u32,
    pub medium_workers: u32,
    pub large_workers: u32,
    pub small_threshold_mib: u64,
    pub medium_threshold_mib: u64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub prefer_head: bool,
    pub transcode_enabled: bool,
    pub validation_enabled: bool,
}

impl RunParameters {
    pub fn new(cfg: &Config, plan: &ConcurrencyPlan) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            base_url: cfg.warmup.base_url.clone(),
            derivative_param: cfg.warmup.derivative_param.clone(),
            derivatives: cfg.warmup.derivatives.clone(),
            pool_size: plan.pool_size,
            small_workers: plan.small_workers,
            medium_workers: plan.medium_workers,
            large_workers: plan.large_workers,
            small_threshold_mib: cfg.size.small_threshold_mib,
            medium_threshold_mib: cfg.size.medium_threshold_mib,
            timeout_secs: cfg.warmup.timeout_secs,
            max_retries: cfg.warmup.max_retries,
            prefer_head: cfg.warmup.prefer_head,
            transcode_enabled: cfg.transcode.enabled,
            validation_enabled: cfg.validation.enabled,
        }
    }
}

/// Headline counters; also served live on `/stats`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_processed: u64,
    pub total_count: u64,
    pub percent_complete: f64,
    pub success_count: u64,
    pub error_count: u64,
    pub error_counts: BTreeMap<ErrorKind, u64>,
}

impl RunSummary {
    pub fn from_stats(stats: &AggregateStats) -> Self {
        Self {
            total_processed: stats.total_processed,
            total_count: stats.expected_objects,
            percent_complete: stats.percent_complete(),
            success_count: stats.success_count,
            error_count: stats.error_count,
            error_counts: stats.error_counts.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub objects: u64,
    pub original_bytes: u64,
    pub requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub ttfb: StatsSummary,
    pub total_time: StatsSummary,
}

impl From<&CategoryStats> for CategorySummary {
    fn from(stats: &CategoryStats) -> Self {
        Self {
            objects: stats.objects,
            original_bytes: stats.original_bytes,
            requests: stats.requests,
            success_count: stats.success_count,
            error_count: stats.error_count,
            ttfb: stats.ttfb.summary(),
            total_time: stats.total_time.summary(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub ttfb: StatsSummary,
    pub total_time: StatsSummary,
    pub size_reduction: ReductionSummary,
    pub by_category: BTreeMap<SizeCategory, CategorySummary>,
    pub by_derivative: BTreeMap<String, DerivativeStats>,
    pub system: SystemMetrics,
}

/// Comparison counters embedded in the result JSON; the full record list goes
/// to the comparison report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonCounts {
    pub matched: u64,
    pub size_mismatch: u64,
    pub missing_in_external: u64,
    pub missing_in_local: u64,
    pub unparsed_keys: u64,
}

impl From<&ComparisonReport> for ComparisonCounts {
    fn from(report: &ComparisonReport) -> Self {
        Self {
            matched: report.matched,
            size_mismatch: report.size_mismatch,
            missing_in_external: report.missing_in_external,
            missing_in_local: report.missing_in_local,
            unparsed_keys: report.unparsed_keys.len() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub timestamp: DateTime<Utc>,
    pub parameters: RunParameters,
    pub summary: RunSummary,
    pub results: BTreeMap<String, ObjectResult>,
    pub all_errors: Vec<ErrorEntry>,
    pub performance_metrics: PerformanceMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcode: Option<TranscodeSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonCounts>,
}

impl RunReport {
    /// Errors across all phases
    pub fn error_total(&self) -> usize {
        self.all_errors.len()
    }

    pub fn with_transcode(mut self, summary: TranscodeSummary) -> Self {
        self.all_errors.extend(summary.errors.iter().cloned());
        self.transcode = Some(summary);
        self
    }

    pub fn with_validation(mut self, summary: ValidationSummary) -> Self {
        self.all_errors.extend(summary.errors());
        self.validation = Some(summary);
        self
    }

    pub fn with_comparison(mut self, comparison: &ComparisonReport) -> Self {
        self.comparison = Some(ComparisonCounts::from(comparison));
        self
    }
}

/// Snapshot the aggregate and sealed results into a report document.
pub fn build_run_report(
    parameters: &RunParameters,
    stats: &AggregateStats,
    results: &[ObjectResult],
    system: SystemMetrics,
) -> RunReport {
    RunReport {
        timestamp: Utc::now(),
        parameters: parameters.clone(),
        summary: RunSummary::from_stats(stats),
        results: results.iter().map(|r| (r.path.clone(), r.clone())).collect(),
        all_errors: stats.errors.clone(),
        performance_metrics: PerformanceMetrics {
            ttfb: stats.ttfb.summary(),
            total_time: stats.total_time.summary(),
            size_reduction: stats.size_reduction.summary(),
            by_category: stats
                .by_category
                .iter()
                .map(|(category, s)| (*category, CategorySummary::from(s)))
                .collect(),
            by_derivative: stats.by_derivative.clone(),
            system,
        },
        transcode: None,
        validation: None,
        comparison: None,
    }
}

pub fn render_json(report: &RunReport) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Atomically write a rendered report.
pub fn write_report(path: &Path, contents: &str) -> Result<(), ReportError> {
    write_atomic(path, contents.as_bytes()).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), bytes = contents.len(), "Report written");
    Ok(())
}

fn secs(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.3}s", v))
}

fn pct(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.1}%", v))
}

fn mib(bytes: u64) -> String {
    format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
}

/// Table cells must not break the row
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn more_rows(out: &mut String, total: usize, shown: usize) {
    if total > shown {
        let _ = writeln!(out, "\n_... and {} more_", total - shown);
    }
}

fn timing_row(out: &mut String, label: &str, s: &StatsSummary) {
    let _ = writeln!(
        out,
        "| {} | {} | {} | {} | {} | {} | {} |",
        label,
        s.count,
        secs(s.mean),
        secs(s.p50),
        secs(s.p90),
        secs(s.p95),
        secs(s.p99)
    );
}

/// Markdown summary of the run; every example table is capped at `max_rows`.
pub fn render_markdown(report: &RunReport, max_rows: usize) -> String {
    let mut out = String::new();
    let summary = &report.summary;
    let perf = &report.performance_metrics;

    let _ = writeln!(out, "# Media Pre-warm Report\n");
    let _ = writeln!(out, "- Run: `{}`", report.parameters.run_id);
    let _ = writeln!(out, "- Generated: {}", report.timestamp.to_rfc3339());
    let _ = writeln!(out, "- Base URL: {}", report.parameters.base_url);
    let _ = writeln!(out, "- Pool size: {}\n", report.parameters.pool_size);

    let _ = writeln!(out, "## Summary\n");
    let _ = writeln!(out, "| Metric | Value |\n|---|---|");
    let _ = writeln!(out, "| Objects processed | {} / {} |", summary.total_processed, summary.total_count);
    let _ = writeln!(out, "| Complete | {:.1}% |", summary.percent_complete);
    let _ = writeln!(out, "| Successful requests | {} |", summary.success_count);
    let _ = writeln!(out, "| Failed requests | {} |", summary.error_count);
    let _ = writeln!(out, "| Size reduction | {} |", pct(perf.size_reduction.overall_reduction_percent));

    if !summary.error_counts.is_empty() {
        let _ = writeln!(out, "\n### Errors by kind\n");
        let _ = writeln!(out, "| Kind | Count |\n|---|---|");
        for (kind, count) in &summary.error_counts {
            let _ = writeln!(out, "| {} | {} |", kind, count);
        }
    }

    let _ = writeln!(out, "\n## Performance\n");
    let _ = writeln!(out, "| Timing | Count | Mean | p50 | p90 | p95 | p99 |\n|---|---|---|---|---|---|---|");
    timing_row(&mut out, "TTFB", &perf.ttfb);
    timing_row(&mut out, "Total", &perf.total_time);

    if !perf.by_category.is_empty() {
        let _ = writeln!(out, "\n### By size category\n");
        let _ = writeln!(
            out,
            "| Category | Objects | Bytes | Requests | Errors | Mean TTFB | Mean total |\n|---|---|---|---|---|---|---|"
        );
        for (category, s) in &perf.by_category {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | {} |",
                category,
                s.objects,
                mib(s.original_bytes),
                s.requests,
                s.error_count,
                secs(s.ttfb.mean),
                secs(s.total_time.mean)
            );
        }
    }

    if !perf.by_derivative.is_empty() {
        let _ = writeln!(out, "\n### By derivative\n");
        let _ = writeln!(out, "| Derivative | Requests | Success | Errors | Bytes |\n|---|---|---|---|---|");
        for (name, s) in perf.by_derivative.iter().take(max_rows) {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                cell(name),
                s.requests,
                s.success_count,
                s.error_count,
                mib(s.response_bytes)
            );
        }
        more_rows(&mut out, perf.by_derivative.len(), max_rows);
    }

    let _ = writeln!(
        out,
        "\n### System\n\nCPU {:.1}%, memory {:.1}%, load {:.2} / {:.2} / {:.2}",
        perf.system.cpu_usage_percent,
        perf.system.mem_usage_percent,
        perf.system.load_avg_1,
        perf.system.load_avg_5,
        perf.system.load_avg_15
    );

    if let Some(transcode) = &report.transcode {
        let _ = writeln!(out, "\n## Transcode\n");
        let _ = writeln!(
            out,
            "{} attempted, {} succeeded, {} failed, {} skipped. Overall reduction {}.\n",
            transcode.attempted,
            transcode.succeeded,
            transcode.failed,
            transcode.skipped,
            pct(transcode.size_reduction.overall_reduction_percent())
        );
        if !transcode.results.is_empty() {
            let _ = writeln!(
                out,
                "| Source | Encoder | Resolution | Before | After | Reduction | Time |\n|---|---|---|---|---|---|---|"
            );
            for r in transcode.results.iter().take(max_rows) {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {} | {:.1}% | {:.1}s |",
                    cell(&r.source_path),
                    r.encoder,
                    r.resolution,
                    mib(r.original_size),
                    mib(r.new_size),
                    r.reduction_percent,
                    r.encode_seconds
                );
            }
            more_rows(&mut out, transcode.results.len(), max_rows);
        }
    }

    if let Some(validation) = &report.validation {
        let _ = writeln!(out, "\n## Validation\n");
        let _ = writeln!(
            out,
            "{} checked, {} valid, {} invalid.",
            validation.total, validation.valid, validation.invalid
        );
        let invalid: Vec<_> = validation.results.iter().filter(|r| !r.is_valid).collect();
        if !invalid.is_empty() {
            let _ = writeln!(out, "\n| Target | Kind | Error |\n|---|---|---|");
            for r in invalid.iter().take(max_rows) {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} |",
                    cell(&r.target),
                    r.error_kind.map(|k| k.as_str()).unwrap_or("-"),
                    cell(r.error.as_deref().unwrap_or(""))
                );
            }
            more_rows(&mut out, invalid.len(), max_rows);
        }
    }

    if let Some(comparison) = &report.comparison {
        let _ = writeln!(out, "\n## KV comparison\n");
        comparison_counts_table(&mut out, comparison);
    }

    if !report.all_errors.is_empty() {
        let _ = writeln!(out, "\n## Errors\n");
        let _ = writeln!(out, "| Path | Derivative | Kind | Status | Message |\n|---|---|---|---|---|");
        for e in report.all_errors.iter().take(max_rows) {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                cell(&e.path),
                e.derivative.as_deref().unwrap_or("-"),
                e.kind,
                e.status_code.map_or_else(|| "-".to_string(), |s| s.to_string()),
                cell(&e.message)
            );
        }
        more_rows(&mut out, report.all_errors.len(), max_rows);
    }

    out
}

fn comparison_counts_table(out: &mut String, counts: &ComparisonCounts) {
    let _ = writeln!(out, "| Result | Count |\n|---|---|");
    let _ = writeln!(out, "| Matched | {} |", counts.matched);
    let _ = writeln!(out, "| Size mismatch | {} |", counts.size_mismatch);
    let _ = writeln!(out, "| Missing in KV | {} |", counts.missing_in_external);
    let _ = writeln!(out, "| Missing locally | {} |", counts.missing_in_local);
    let _ = writeln!(out, "| Unparsed keys | {} |", counts.unparsed_keys);
}

pub fn render_comparison_json(comparison: &ComparisonReport) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(comparison)?)
}

/// Markdown comparison report with capped example tables per section.
pub fn render_comparison_markdown(comparison: &ComparisonReport, max_rows: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# KV Comparison Report\n");
    comparison_counts_table(&mut out, &ComparisonCounts::from(comparison));

    let mismatches: Vec<_> = comparison.mismatches().collect();
    if !mismatches.is_empty() {
        let _ = writeln!(out, "\n## Size mismatches\n");
        let _ = writeln!(out, "| Path | Derivative | Local | KV | Diff |\n|---|---|---|---|---|");
        for r in mismatches.iter().take(max_rows) {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                cell(&r.path),
                cell(&r.derivative),
                r.local_size.unwrap_or(0),
                r.external_size.unwrap_or(0),
                pct(r.size_diff_percent)
            );
        }
        more_rows(&mut out, mismatches.len(), max_rows);
    }

    for (title, records) in [
        ("Missing in KV", comparison.only_local().collect::<Vec<_>>()),
        ("Missing locally", comparison.only_external().collect::<Vec<_>>()),
    ] {
        if records.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n## {}\n", title);
        let _ = writeln!(out, "| Path | Derivative | Size |\n|---|---|---|");
        for r in records.iter().take(max_rows) {
            let _ = writeln!(
                out,
                "| {} | {} | {} |",
                cell(&r.path),
                cell(&r.derivative),
                r.local_size.or(r.external_size).unwrap_or(0)
            );
        }
        more_rows(&mut out, records.len(), max_rows);
    }

    if !comparison.unparsed_keys.is_empty() {
        let _ = writeln!(out, "\n## Unparsed keys\n");
        for key in comparison.unparsed_keys.iter().take(max_rows) {
            let _ = writeln!(out, "- `{}`", key);
        }
        more_rows(&mut out, comparison.unparsed_keys.len(), max_rows);
    }

    out
}

/// Comparison output paths: `<base>.json` and `<base>.md`
pub fn comparison_paths(base: &Path) -> (PathBuf, PathBuf) {
    (base.with_extension("json"), base.with_extension("md"))
}

/// Checkpoint sink writing the full result JSON to the results path
pub struct ReportCheckpoint {
    path: PathBuf,
    parameters: RunParameters,
}

impl ReportCheckpoint {
    pub fn new(path: PathBuf, parameters: RunParameters) -> Self {
        Self { path, parameters }
    }
}

impl CheckpointSink for ReportCheckpoint {
    fn write_checkpoint(&self, stats: &AggregateStats, results: &[ObjectResult]) -> Result<(), String> {
        let report = build_run_report(&self.parameters, stats, results, collect_system_metrics());
        let json = render_json(&report).map_err(|e| e.to_string())?;
        write_atomic(&self.path, json.as_bytes()).map_err(|e| e.to_string())?;
        debug!(path = %self.path.display(), processed = stats.total_processed, "Checkpoint written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::ComparisonRecord;
    use crate::request::ProcessingAttempt;

    fn failed_object(i: usize) -> ObjectResult {
        let mut attempts = BTreeMap::new();
        attempts.insert(
            "default".to_string(),
            ProcessingAttempt::rejected("https://cdn.example.com/x", 100, format!("failure {}", i)),
        );
        let now = Utc::now();
        ObjectResult {
            path: format!("videos/clip-{:02}.mp4", i),
            size_bytes: 100,
            category: SizeCategory::Small,
            attempts,
            started_at: now,
            finished_at: now,
        }
    }

    fn report_with_failures(n: usize) -> RunReport {
        let results: Vec<ObjectResult> = (0..n).map(failed_object).collect();
        let mut stats = AggregateStats::new(n as u64);
        results.iter().for_each(|r| stats.fold(r));
        let params = RunParameters::new(&Config::default(), &ConcurrencyPlan::derive(&Config::default()));
        build_run_report(&params, &stats, &results, SystemMetrics::default())
    }

    #[test]
    fn test_report_json_shape() {
        let report = report_with_failures(3);
        let json = render_json(&report).unwrap();
        for key in [
            "\"timestamp\"",
            "\"parameters\"",
            "\"totalProcessed\"",
            "\"percentComplete\"",
            "\"errorCounts\"",
            "\"allErrors\"",
            "\"performanceMetrics\"",
            "\"sizeReduction\"",
            "\"byCategory\"",
            "\"byDerivative\"",
            "\"system\"",
        ] {
            assert!(json.contains(key), "missing {}", key);
        }
        assert!(!json.contains("\"transcode\""));

        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.summary.total_processed, 3);
        assert_eq!(back.summary.error_counts[&ErrorKind::Exception], 3);
        assert_eq!(back.results.len(), 3);
        assert_eq!(back.all_errors.len(), 3);
    }

    #[test]
    fn test_markdown_rows_are_capped() {
        let report = report_with_failures(15);
        let md = render_markdown(&report, 10);
        assert!(md.contains("# Media Pre-warm Report"));
        assert!(md.contains("| exception | 15 |"));
        assert!(md.contains("videos/clip-09.mp4"));
        assert!(!md.contains("videos/clip-10.mp4"));
        assert!(md.contains("_... and 5 more_"));
    }

    #[test]
    fn test_validation_errors_join_all_errors() {
        let validation = ValidationSummary::from_results(Vec::new());
        let report = report_with_failures(1).with_validation(validation.clone());
        assert_eq!(report.error_total(), 1);
        assert_eq!(report.validation, Some(validation));
    }

    #[test]
    fn test_comparison_markdown() {
        let record = |path: &str, local: Option<u64>, external: Option<u64>, matched: bool| ComparisonRecord {
            key: format!("video:{}:derivative=default", path),
            path: path.to_string(),
            derivative: "default".to_string(),
            present_in_local: local.is_some(),
            present_in_external: external.is_some(),
            local_size: local,
            external_size: external,
            size_diff_percent: None,
            matched,
        };
        let comparison = ComparisonReport {
            records: vec![
                record("a.mp4", Some(10), Some(10), true),
                record("b.mp4", Some(10), Some(20), false),
                record("c.mp4", Some(10), None, false),
                record("d.mp4", None, Some(10), false),
            ],
            matched: 1,
            size_mismatch: 1,
            missing_in_external: 1,
            missing_in_local: 1,
            unparsed_keys: vec!["garbage".to_string()],
        };

        let md = render_comparison_markdown(&comparison, 10);
        assert!(md.contains("| Size mismatch | 1 |"));
        assert!(md.contains("## Size mismatches"));
        assert!(md.contains("## Missing in KV"));
        assert!(md.contains("## Missing locally"));
        assert!(md.contains("- `garbage`"));

        let counts = ComparisonCounts::from(&comparison);
        assert_eq!(counts.unparsed_keys, 1);

        let (json_path, md_path) = comparison_paths(Path::new("/tmp/out/compare"));
        assert_eq!(json_path, PathBuf::from("/tmp/out/compare.json"));
        assert_eq!(md_path, PathBuf::from("/tmp/out/compare.md"));
    }

    #[test]
    fn test_checkpoint_sink_writes_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let params = RunParameters::new(&Config::default(), &ConcurrencyPlan::derive(&Config::default()));
        let sink = ReportCheckpoint::new(path.clone(), params);

        let results = vec![failed_object(1)];
        let mut stats = AggregateStats::new(4);
        stats.fold(&results[0]);
        sink.write_checkpoint(&stats, &results).unwrap();

        let back: RunReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.summary.total_processed, 1);
        assert_eq!(back.summary.total_count, 4);
    }
}
