//! Job executor for re-encoding large objects
//!
//! Picks which warmed objects get a local transcode and runs them through the
//! transcode engine with concurrency limited by a semaphore.

use crate::config::TranscodeConfig;
use crate::encode::transcode::{normalize_container, secondary_output_path};
use crate::encode::{TranscodeEngine, TranscodeError, TranscodeResult, TranscodeSpec};
use crate::error::{ErrorEntry, ErrorKind};
use crate::scheduler::ObjectResult;
use crate::size_class::SizeCategory;
use crate::stats::SizeReductionStats;
use crate::ConcurrencyPlan;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// One object selected for a local transcode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeJob {
    /// Inventory path, used as the key in reports
    pub path: String,
    pub source: PathBuf,
    pub output: PathBuf,
    pub original_size: u64,
}

/// Large objects, or with `only_on_error` only large objects with a failed derivative.
///
/// Sources live at `source_root/<path>`; outputs at `output_root/<path>` with
/// the container extension. Paths that would leave either root are skipped.
/// When two sources map to the same output (`clip.mov` and `clip.mp4`), the
/// later one keeps its source extension: `clip.mp4.mp4`.
pub fn select_transcode_jobs(results: &[ObjectResult], cfg: &TranscodeConfig) -> Vec<TranscodeJob> {
    let container = normalize_container(&cfg.container);
    let secondary = cfg
        .create_secondary
        .then(|| normalize_container(&cfg.secondary_container));
    let mut claimed: HashSet<PathBuf> = HashSet::new();

    let mut jobs = Vec::new();
    for r in results
        .iter()
        .filter(|r| r.category == SizeCategory::Large)
        .filter(|r| !cfg.only_on_error || r.has_failures())
    {
        let Some(relative) = contained_path(&r.path) else {
            warn!(path = %r.path, "Path escapes the media roots, not transcoding");
            continue;
        };

        let plain = cfg.output_root.join(&relative).with_extension(&container);
        let candidates = [plain, disambiguated_output(&cfg.output_root, &relative, &container)];
        let chosen = candidates.into_iter().find(|output| {
            let outputs = rendition_outputs(output, secondary.as_deref());
            outputs.iter().all(|o| !claimed.contains(o))
        });
        let Some(output) = chosen else {
            warn!(path = %r.path, "Output path already taken, not transcoding");
            continue;
        };
        claimed.extend(rendition_outputs(&output, secondary.as_deref()));

        jobs.push(TranscodeJob {
            path: r.path.clone(),
            source: cfg.source_root.join(&relative),
            output,
            original_size: r.size_bytes,
        });
    }
    jobs
}

/// Relative form of an inventory path, or `None` if it would leave its root.
fn contained_path(path: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

fn disambiguated_output(output_root: &Path, relative: &Path, container: &str) -> PathBuf {
    let mut name = relative.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(container);
    output_root.join(relative).with_file_name(name)
}

fn rendition_outputs(primary: &Path, secondary: Option<&str>) -> Vec<PathBuf> {
    let mut outputs = vec![primary.to_path_buf()];
    if let Some(container) = secondary {
        outputs.push(secondary_output_path(primary, container));
    }
    outputs
}

/// Everything the transcode phase produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeSummary {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Jobs never started because the run was cancelled
    pub skipped: u64,
    pub results: Vec<TranscodeResult>,
    pub size_reduction: SizeReductionStats,
    pub errors: Vec<ErrorEntry>,
}

impl TranscodeSummary {
    fn record(&mut self, job: &TranscodeJob, outcome: Option<Result<TranscodeResult, TranscodeError>>) {
        let result = match outcome {
            None => {
                self.skipped += 1;
                return;
            }
            Some(result) => result,
        };

        self.attempted += 1;
        match result {
            Ok(result) => {
                self.succeeded += 1;
                self.size_reduction
                    .add(result.original_size as i64, result.new_size as i64);
                if let Some(secondary) = result.secondary.as_ref().filter(|s| !s.succeeded()) {
                    self.errors.push(ErrorEntry {
                        path: job.path.clone(),
                        derivative: Some(format!("secondary:{}", secondary.container)),
                        url: None,
                        kind: ErrorKind::TranscodeFailed,
                        status_code: None,
                        exit_code: None,
                        message: secondary.error.clone().unwrap_or_default(),
                    });
                }
                self.results.push(result);
            }
            Err(e) => {
                self.failed += 1;
                self.errors.push(ErrorEntry {
                    path: job.path.clone(),
                    derivative: None,
                    url: None,
                    kind: e.error_kind(),
                    status_code: None,
                    exit_code: e.exit_code(),
                    message: e.to_string(),
                });
            }
        }
    }

    /// Produced files, primary first then any secondary rendition
    pub fn output_targets(&self) -> Vec<String> {
        let mut targets = Vec::new();
        for result in &self.results {
            targets.push(result.output_path.clone());
            if let Some(secondary) = result.secondary.as_ref().filter(|s| s.succeeded()) {
                targets.push(secondary.output_path.clone());
            }
        }
        targets
    }
}

/// Job executor that runs transcodes with concurrency limiting
///
/// Uses a tokio Semaphore sized to the plan's `transcode_jobs`.
pub struct JobExecutor {
    semaphore: Arc<Semaphore>,
    engine: TranscodeEngine,
    spec: Arc<TranscodeSpec>,
    cancel: CancellationToken,
}

impl JobExecutor {
    /// Create a new JobExecutor
    ///
    /// # Arguments
    /// * `plan` - Concurrency plan determining max concurrent transcodes
    /// * `engine` - Transcode engine shared by every job
    /// * `spec` - Codec, quality and geometry applied to every job
    pub fn new(plan: &ConcurrencyPlan, engine: TranscodeEngine, spec: TranscodeSpec) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(plan.transcode_jobs.max(1) as usize)),
            engine,
            spec: Arc::new(spec),
            cancel: CancellationToken::new(),
        }
    }

    /// Jobs still waiting for a permit are skipped once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Get the number of available permits (slots for concurrent transcodes)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquire a permit, waiting until a slot frees up.
    pub async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.semaphore.clone().acquire_owned().await
    }

    /// Run one job under a permit. `None` means it never started.
    pub async fn execute(&self, job: &TranscodeJob) -> Option<Result<TranscodeResult, TranscodeError>> {
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            permit = self.acquire_permit() => permit.ok()?,
        };
        if self.cancel.is_cancelled() {
            return None;
        }

        let result = self.engine.optimize(&job.source, &job.output, &self.spec).await;
        if let Err(e) = &result {
            error!(path = %job.path, kind = %e.error_kind(), error = %e, "Transcode failed");
        }
        Some(result)
    }

    /// Run every job and fold the outcomes in input order.
    pub async fn run_transcodes(&self, jobs: &[TranscodeJob]) -> TranscodeSummary {
        info!(
            jobs = jobs.len(),
            max_concurrent = self.available_permits(),
            codec = %self.spec.codec,
            "Starting transcodes"
        );

        let outcomes = join_all(jobs.iter().map(|job| self.execute(job))).await;

        let mut summary = TranscodeSummary::default();
        for (job, outcome) in jobs.iter().zip(outcomes) {
            summary.record(job, outcome);
        }

        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            reduction_percent = ?summary.size_reduction.overall_reduction_percent(),
            "Transcodes finished"
        );
        summary
    }
}
