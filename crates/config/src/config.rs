//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Values parsed but violate a cross-field constraint
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// CPU-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CpuConfig {
    /// Number of logical cores (auto-detected if None)
    pub logical_cores: Option<u32>,
}

/// Size category thresholds, in MiB
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SizeConfig {
    /// Objects strictly below this size are `small`
    #[serde(default = "default_small_threshold_mib")]
    pub small_threshold_mib: u64,
    /// Objects strictly below this size (and not small) are `medium`
    #[serde(default = "default_medium_threshold_mib")]
    pub medium_threshold_mib: u64,
}

fn default_small_threshold_mib() -> u64 {
    50
}

fn default_medium_threshold_mib() -> u64 {
    200
}

impl Default for SizeConfig {
    fn default() -> Self {
        Self {
            small_threshold_mib: default_small_threshold_mib(),
            medium_threshold_mib: default_medium_threshold_mib(),
        }
    }
}

/// Cache-warming configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarmupConfig {
    /// Base URL of the resizing edge service
    #[serde(default)]
    pub base_url: String,
    /// Derivative names to request per object (empty = single default request)
    #[serde(default)]
    pub derivatives: Vec<String>,
    /// Query parameter carrying the derivative name
    #[serde(default = "default_derivative_param")]
    pub derivative_param: String,
    /// Total concurrent requests (0 = auto-derive)
    #[serde(default)]
    pub pool_size: u32,
    /// Workers reserved for small objects (0 = auto-derive)
    #[serde(default)]
    pub small_workers: u32,
    /// Workers reserved for medium objects (0 = auto-derive)
    #[serde(default)]
    pub medium_workers: u32,
    /// Workers reserved for large objects (0 = auto-derive)
    #[serde(default)]
    pub large_workers: u32,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear backoff step; the wait before retry `i` is `step * i`
    #[serde(default = "default_retry_step_secs")]
    pub retry_step_secs: u64,
    /// Extra hold after a successful request, in milliseconds
    #[serde(default)]
    pub post_success_delay_ms: u64,
    /// Try a HEAD request before streaming a GET
    #[serde(default)]
    pub prefer_head: bool,
    /// Write a checkpoint every N completed objects (0 disables checkpoints)
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,
}

fn default_derivative_param() -> String {
    "derivative".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_step_secs() -> u64 {
    2
}

fn default_checkpoint_interval() -> u32 {
    50
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            derivatives: Vec::new(),
            derivative_param: default_derivative_param(),
            pool_size: 0,
            small_workers: 0,
            medium_workers: 0,
            large_workers: 0,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_step_secs: default_retry_step_secs(),
            post_success_delay_ms: 0,
            prefer_head: false,
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

/// Re-encoding configuration
///
/// Codec, quality and fit names are kept as strings here; the engine resolves
/// them once per run and degrades unknown names to documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_quality")]
    pub quality: String,
    /// Preset (`720p`, `1080p`, ...), explicit `WxH`, or `original`
    #[serde(default = "default_resolution")]
    pub resolution: String,
    /// One of `contain`, `cover`, `pad`, `stretch`
    #[serde(default = "default_fit")]
    pub fit: String,
    /// One of `copy`, `none`, `low`, `medium`, `high`
    #[serde(default = "default_audio")]
    pub audio: String,
    #[serde(default = "default_container")]
    pub container: String,
    /// Also produce a web-friendly fallback rendition
    #[serde(default)]
    pub create_secondary: bool,
    #[serde(default = "default_secondary_codec")]
    pub secondary_codec: String,
    #[serde(default = "default_secondary_container")]
    pub secondary_container: String,
    #[serde(default = "default_quality")]
    pub secondary_quality: String,
    /// `auto`, `none`, or a vendor name (`nvidia`, `intel`, `vaapi`, `apple`, `amd`)
    #[serde(default = "default_hardware")]
    pub hardware: String,
    /// Refuse any hardware encoder even if requested
    #[serde(default)]
    pub disallow_hardware_encoding: bool,
    /// Maximum concurrent transcodes (0 = auto-derive)
    #[serde(default)]
    pub max_concurrent_jobs: u32,
    /// Wall-clock limit for one transcoder process
    #[serde(default = "default_transcode_timeout_secs")]
    pub timeout_secs: u64,
    /// Local directory mirroring the remote object paths
    #[serde(default)]
    pub source_root: PathBuf,
    /// Where optimized renditions are written
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Only re-encode large objects whose warmup had failures
    #[serde(default)]
    pub only_on_error: bool,
}

fn default_codec() -> String {
    "h264".to_string()
}

fn default_quality() -> String {
    "medium".to_string()
}

fn default_resolution() -> String {
    "1080p".to_string()
}

fn default_fit() -> String {
    "contain".to_string()
}

fn default_audio() -> String {
    "medium".to_string()
}

fn default_container() -> String {
    "mp4".to_string()
}

fn default_secondary_codec() -> String {
    "vp9".to_string()
}

fn default_secondary_container() -> String {
    "webm".to_string()
}

fn default_hardware() -> String {
    "auto".to_string()
}

fn default_transcode_timeout_secs() -> u64 {
    3600
}

fn default_output_root() -> PathBuf {
    PathBuf::from("optimized")
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            codec: default_codec(),
            quality: default_quality(),
            resolution: default_resolution(),
            fit: default_fit(),
            audio: default_audio(),
            container: default_container(),
            create_secondary: false,
            secondary_codec: default_secondary_codec(),
            secondary_container: default_secondary_container(),
            secondary_quality: default_quality(),
            hardware: default_hardware(),
            disallow_hardware_encoding: false,
            max_concurrent_jobs: 0,
            timeout_secs: default_transcode_timeout_secs(),
            source_root: PathBuf::new(),
            output_root: default_output_root(),
            only_on_error: false,
        }
    }
}

/// Post-hoc integrity validation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Parallel validations (0 = auto-derive)
    #[serde(default)]
    pub workers: u32,
    /// Limit for each probe/decode subprocess
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Seconds of media decoded by the corruption probe
    #[serde(default = "default_decode_seconds")]
    pub decode_seconds: u32,
    /// Remote files above this size are accepted on header evidence alone
    #[serde(default = "default_remote_header_only_mib")]
    pub remote_header_only_mib: u64,
}

fn default_probe_timeout_secs() -> u64 {
    60
}

fn default_decode_seconds() -> u32 {
    10
}

fn default_remote_header_only_mib() -> u64 {
    100
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            workers: 0,
            probe_timeout_secs: default_probe_timeout_secs(),
            decode_seconds: default_decode_seconds(),
            remote_header_only_mib: default_remote_header_only_mib(),
        }
    }
}

/// Native tool locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

/// Report destinations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    /// Canonical result JSON, also the checkpoint target
    #[serde(default = "default_results_path")]
    pub results_path: PathBuf,
    /// Markdown summary of the run
    pub markdown_report: Option<PathBuf>,
    /// Comparison report base path; `.json` and `.md` are written next to each other
    pub comparison_report: Option<PathBuf>,
    /// Example rows per markdown table
    #[serde(default = "default_max_report_rows")]
    pub max_report_rows: usize,
}

fn default_results_path() -> PathBuf {
    PathBuf::from("prewarm-results.json")
}

fn default_max_report_rows() -> usize {
    10
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_path: default_results_path(),
            markdown_report: None,
            comparison_report: None,
            max_report_rows: default_max_report_rows(),
        }
    }
}

/// Live statistics endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServerConfig {
    /// Address for `GET /stats`, e.g. `127.0.0.1:7878` (disabled if None)
    pub listen: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub cpu: CpuConfig,
    #[serde(default)]
    pub size: SizeConfig,
    #[serde(default)]
    pub warmup: WarmupConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - CPU_LOGICAL_CORES -> cpu.logical_cores
    /// - PREWARM_BASE_URL -> warmup.base_url
    /// - PREWARM_POOL_SIZE -> warmup.pool_size
    /// - PREWARM_MAX_RETRIES -> warmup.max_retries
    /// - PREWARM_TIMEOUT_SECS -> warmup.timeout_secs
    /// - PREWARM_SMALL_THRESHOLD_MIB -> size.small_threshold_mib
    /// - PREWARM_MEDIUM_THRESHOLD_MIB -> size.medium_threshold_mib
    /// - TRANSCODE_HARDWARE -> transcode.hardware
    /// - ENCODER_DISALLOW_HARDWARE_ENCODING -> transcode.disallow_hardware_encoding
    pub fn apply_env_overrides(&mut self) {
        if let Some(cores) = parsed_env::<u32>("CPU_LOGICAL_CORES") {
            self.cpu.logical_cores = Some(cores);
        }

        if let Ok(val) = env::var("PREWARM_BASE_URL") {
            if !val.trim().is_empty() {
                self.warmup.base_url = val;
            }
        }

        if let Some(pool) = parsed_env::<u32>("PREWARM_POOL_SIZE") {
            self.warmup.pool_size = pool;
        }

        if let Some(retries) = parsed_env::<u32>("PREWARM_MAX_RETRIES") {
            self.warmup.max_retries = retries;
        }

        if let Some(timeout) = parsed_env::<u64>("PREWARM_TIMEOUT_SECS") {
            self.warmup.timeout_secs = timeout;
        }

        if let Some(small) = parsed_env::<u64>("PREWARM_SMALL_THRESHOLD_MIB") {
            self.size.small_threshold_mib = small;
        }

        if let Some(medium) = parsed_env::<u64>("PREWARM_MEDIUM_THRESHOLD_MIB") {
            self.size.medium_threshold_mib = medium;
        }

        if let Ok(val) = env::var("TRANSCODE_HARDWARE") {
            if !val.trim().is_empty() {
                self.transcode.hardware = val.trim().to_lowercase();
            }
        }

        // ENCODER_DISALLOW_HARDWARE_ENCODING
        if let Ok(val) = env::var("ENCODER_DISALLOW_HARDWARE_ENCODING") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.transcode.disallow_hardware_encoding = true,
                "false" | "0" | "no" => self.transcode.disallow_hardware_encoding = false,
                _ => {} // Invalid value, keep existing
            }
        }
    }

    /// Check cross-field constraints that TOML parsing cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size.small_threshold_mib >= self.size.medium_threshold_mib {
            return Err(ConfigError::Invalid(format!(
                "size.small_threshold_mib ({}) must be below size.medium_threshold_mib ({})",
                self.size.small_threshold_mib, self.size.medium_threshold_mib
            )));
        }

        if self.warmup.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "warmup.timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.transcode.enabled && self.transcode.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "transcode.timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Warming needs somewhere to send requests; only checked once there is
    /// an inventory to warm.
    pub fn validate_warmup_target(&self) -> Result<(), ConfigError> {
        if self.warmup.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "warmup.base_url must be set to warm an inventory".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse::<T>().ok())
}
