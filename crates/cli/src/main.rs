//! CLI entry point for the media cache pre-warmer
//!
//! Loads the configuration, runs one warm/transcode/validate pass over the
//! inventory and writes the reports.

use clap::Parser;
use media_prewarmer::{Config, Prewarmer, RunInputs};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Media cache pre-warmer - warm edge derivatives, re-encode and validate media
#[derive(Parser, Debug)]
#[command(name = "media-prewarmer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "prewarm.toml")]
    config: PathBuf,

    /// JSON listing of `{path, size}` objects to warm
    #[arg(short, long)]
    inventory: PathBuf,

    /// KV snapshot to reconcile the warmed results against
    #[arg(long)]
    kv_inventory: Option<PathBuf>,

    /// Extra files, URLs or directories to validate (repeatable)
    #[arg(long = "validate", value_name = "PATH|URL|DIR")]
    validate: Vec<String>,

    /// Skip startup checks (ffmpeg/ffprobe availability). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Debug-level logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Errors only
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!(config = %args.config.display(), inventory = %args.inventory.display(), "Media pre-warmer starting");

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let prewarmer = if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
        Prewarmer::new_without_checks(config)
    } else {
        Prewarmer::new(config)
    };
    let prewarmer = match prewarmer {
        Ok(prewarmer) => prewarmer,
        Err(e) => {
            error!(error = %e, "Failed to initialize");
            return ExitCode::FAILURE;
        }
    };

    let cancel = prewarmer.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work");
            cancel.cancel();
        }
    });

    let inputs = RunInputs {
        inventory: args.inventory,
        kv_inventory: args.kv_inventory,
        validate: args.validate,
    };

    match prewarmer.run(&inputs).await {
        Ok(report) => {
            info!(
                processed = report.summary.total_processed,
                total = report.summary.total_count,
                errors = report.error_total(),
                "Done"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Run failed");
            ExitCode::FAILURE
        }
    }
}
