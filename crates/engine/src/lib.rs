//! Media cache pre-warmer
//!
//! Warms an edge resizing cache for an inventory of media objects, re-encodes
//! oversized sources, validates the results and reconciles them against a KV
//! snapshot.

pub mod checkpoint;
pub mod concurrency;
pub mod encode;
pub mod error;
pub mod hardware;
pub mod inventory;
pub mod job_executor;
pub mod kv;
pub mod metrics;
pub mod metrics_server;
pub mod pipeline;
pub mod probe;
pub mod process;
pub mod report;
pub mod request;
pub mod retry;
pub mod scan;
pub mod scheduler;
pub mod size_class;
pub mod startup;
pub mod stats;
pub mod validate;

#[cfg(test)]
mod test_support;

pub use media_prewarmer_config as config;
pub use media_prewarmer_config::Config;
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use error::{ErrorEntry, ErrorKind, PrewarmError};
pub use hardware::{HardwareCapabilities, HardwareCapabilitySnapshot, Vendor, VideoCodec};
pub use inventory::{load_inventory, to_media_objects, InventoryEntry, MediaObject};
pub use job_executor::{select_transcode_jobs, JobExecutor, TranscodeJob, TranscodeSummary};
pub use kv::{compare, load_kv_inventory, ComparisonRecord, ComparisonReport, InventorySnapshot};
pub use metrics::{collect_system_metrics, new_shared_stats, AggregateStats, SharedStats, SystemMetrics};
pub use metrics_server::{create_stats_router, run_stats_server, ServerError};
pub use pipeline::{Prewarmer, RunInputs};
pub use report::{build_run_report, render_json, render_markdown, RunReport, RunSummary};
pub use request::{ProcessingAttempt, RequestExecutor};
pub use scheduler::{ObjectResult, WarmupOutcome, WarmupScheduler, WarmupSettings};
pub use size_class::{classify, SizeCategory, SizeThresholds};
pub use startup::{run_startup_checks, StartupError};
pub use stats::{SizeReductionStats, StreamingStats};
pub use validate::{ValidationResult, ValidationSummary, VideoValidator};
