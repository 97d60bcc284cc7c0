//! Run orchestration
//!
//! One run warms the inventory, optionally re-encodes large objects, validates
//! the produced files plus any extra targets, reconciles against a KV snapshot
//! and writes the reports. Only configuration, startup and input/output
//! problems fail the run; unit failures end up in the report.

use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::Config;
use crate::encode::{TranscodeEngine, TranscodeSpec};
use crate::error::PrewarmError;
use crate::hardware::HardwareCapabilities;
use crate::inventory::{load_inventory, to_media_objects};
use crate::job_executor::{select_transcode_jobs, JobExecutor};
use crate::kv::{compare, load_kv_inventory};
use crate::metrics::{collect_system_metrics, new_shared_stats};
use crate::metrics_server::run_stats_server;
use crate::report::{
    build_run_report, comparison_paths, render_comparison_json, render_comparison_markdown,
    render_json, render_markdown, write_report, ReportCheckpoint, RunParameters, RunReport,
};
use crate::request::RequestExecutor;
use crate::scheduler::{WarmupScheduler, WarmupSettings};
use crate::size_class::SizeThresholds;
use crate::startup::run_startup_checks;
use crate::validate::{expand_targets, ValidatorOptions, VideoValidator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Files and targets for one run
#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    pub inventory: PathBuf,
    pub kv_inventory: Option<PathBuf>,
    /// Extra paths, URLs or directories to validate
    pub validate: Vec<String>,
}

pub struct Prewarmer {
    config: Config,
    plan: ConcurrencyPlan,
    hardware: Arc<HardwareCapabilities>,
    cancel: CancellationToken,
}

impl Prewarmer {
    /// Validate the configuration and run the startup checks.
    pub fn new(config: Config) -> Result<Self, PrewarmError> {
        config.validate()?;
        run_startup_checks(&config)?;
        Self::new_without_checks(config)
    }

    /// Skips the media tool checks; configuration is still validated.
    pub fn new_without_checks(config: Config) -> Result<Self, PrewarmError> {
        config.validate()?;
        let plan = derive_plan(&config);
        let hardware = Arc::new(HardwareCapabilities::new(
            config.tools.ffmpeg.clone(),
            Duration::from_secs(config.validation.probe_timeout_secs),
        ));
        info!(
            cores = plan.total_cores,
            pool = plan.pool_size,
            small = plan.small_workers,
            medium = plan.medium_workers,
            large = plan.large_workers,
            transcode_jobs = plan.transcode_jobs,
            validation_workers = plan.validation_workers,
            "Concurrency plan"
        );
        Ok(Self {
            config,
            plan,
            hardware,
            cancel: CancellationToken::new(),
        })
    }

    /// Cancelling stops admission of new work; in-flight units finish.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn plan(&self) -> &ConcurrencyPlan {
        &self.plan
    }

    pub async fn run(&self, inputs: &RunInputs) -> Result<RunReport, PrewarmError> {
        let cfg = &self.config;

        let entries = load_inventory(&inputs.inventory)?;
        let objects = to_media_objects(&entries, &SizeThresholds::from(&cfg.size));
        if !objects.is_empty() {
            cfg.validate_warmup_target()?;
        }
        let external = match &inputs.kv_inventory {
            Some(path) => Some(load_kv_inventory(path)?),
            None => None,
        };

        let stats = new_shared_stats(objects.len() as u64);
        let parameters = RunParameters::new(cfg, &self.plan);
        info!(run_id = %parameters.run_id, objects = objects.len(), "Starting run");

        let server_shutdown = CancellationToken::new();
        if let Some(listen) = cfg.server.listen.clone() {
            let stats = stats.clone();
            let shutdown = server_shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = run_stats_server(&listen, stats, shutdown).await {
                    error!(error = %e, "Stats endpoint stopped");
                }
            });
        }

        let checkpoint = Arc::new(ReportCheckpoint::new(cfg.output.results_path.clone(), parameters.clone()));
        let scheduler = WarmupScheduler::new(
            RequestExecutor::new()?,
            self.plan.clone(),
            WarmupSettings::from_config(&cfg.warmup),
            stats.clone(),
            self.cancel.clone(),
        )
        .with_checkpoint(checkpoint);
        let outcome = scheduler.run(objects).await;
        if outcome.cancelled {
            warn!(processed = outcome.stats.total_processed, "Run interrupted, remaining objects skipped");
        }

        let system = tokio::task::spawn_blocking(collect_system_metrics)
            .await
            .unwrap_or_default();
        let mut report = build_run_report(&parameters, &outcome.stats, &outcome.results, system);

        let mut targets = Vec::new();
        if cfg.transcode.enabled && !self.cancel.is_cancelled() {
            let jobs = select_transcode_jobs(&outcome.results, &cfg.transcode);
            let engine = TranscodeEngine::new(
                cfg.tools.ffmpeg.clone(),
                cfg.tools.ffprobe.clone(),
                Duration::from_secs(cfg.validation.probe_timeout_secs),
                self.hardware.clone(),
            );
            let executor = JobExecutor::new(&self.plan, engine, TranscodeSpec::from_config(&cfg.transcode))
                .with_cancel(self.cancel.clone());
            let summary = executor.run_transcodes(&jobs).await;
            if cfg.validation.enabled {
                targets.extend(summary.output_targets());
            }
            report = report.with_transcode(summary);
        }

        targets.extend(expand_targets(&inputs.validate));
        if !targets.is_empty() && !self.cancel.is_cancelled() {
            let validator = VideoValidator::new(ValidatorOptions::from_config(cfg), reqwest::Client::builder().build()?);
            let summary = validator
                .validate_many(targets, self.plan.validation_workers as usize)
                .await;
            report = report.with_validation(summary);
        }

        if let Some(external) = &external {
            let comparison = compare(&outcome.results, external);
            info!(
                matched = comparison.matched,
                size_mismatch = comparison.size_mismatch,
                missing_in_external = comparison.missing_in_external,
                missing_in_local = comparison.missing_in_local,
                "KV comparison"
            );
            if let Some(base) = &cfg.output.comparison_report {
                let (json_path, md_path) = comparison_paths(base);
                write_report(&json_path, &render_comparison_json(&comparison)?)?;
                write_report(&md_path, &render_comparison_markdown(&comparison, cfg.output.max_report_rows))?;
            }
            report = report.with_comparison(&comparison);
        }

        write_report(&cfg.output.results_path, &render_json(&report)?)?;
        if let Some(path) = &cfg.output.markdown_report {
            write_report(path, &render_markdown(&report, cfg.output.max_report_rows))?;
        }
        server_shutdown.cancel();

        info!(
            processed = report.summary.total_processed,
            successes = report.summary.success_count,
            errors = report.error_total(),
            "Run complete"
        );
        Ok(report)
    }
}
