//! Error taxonomy shared by every unit of work
//!
//! Per-unit failures are recorded as data (`ErrorKind` + `ErrorEntry`) and never
//! abort a run. Only configuration, startup and I/O problems at the run level
//! surface as `PrewarmError`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ConnectionError,
    /// HTTP status in [400, 500)
    #[serde(rename = "http_4xx")]
    Http4xx,
    /// HTTP status >= 500
    #[serde(rename = "http_5xx")]
    Http5xx,
    /// Anything that could not be classified further
    Exception,
    ProbeFailed,
    TranscodeFailed,
    CorruptionDetected,
    MissingFile,
}

impl ErrorKind {
    /// Histogram key used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::Http4xx => "http_4xx",
            ErrorKind::Http5xx => "http_5xx",
            ErrorKind::Exception => "exception",
            ErrorKind::ProbeFailed => "probe_failed",
            ErrorKind::TranscodeFailed => "transcode_failed",
            ErrorKind::CorruptionDetected => "corruption_detected",
            ErrorKind::MissingFile => "missing_file",
        }
    }

    /// Map an HTTP error status onto its class.
    pub fn from_status(status: u16) -> Self {
        if status >= 500 {
            ErrorKind::Http5xx
        } else {
            ErrorKind::Http4xx
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded failure with enough context to appear in the error report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub path: String,
    pub derivative: Option<String>,
    pub url: Option<String>,
    pub kind: ErrorKind,
    pub status_code: Option<u16>,
    pub exit_code: Option<i32>,
    pub message: String,
}

/// Run-level error type
#[derive(Debug, Error)]
pub enum PrewarmError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Startup check failed: {0}")]
    Startup(#[from] crate::startup::StartupError),

    #[error("Inventory error: {0}")]
    Inventory(#[from] crate::inventory::InventoryError),

    #[error("KV inventory error: {0}")]
    Kv(#[from] crate::kv::KvError),

    #[error("Report error: {0}")]
    Report(#[from] crate::report::ReportError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
