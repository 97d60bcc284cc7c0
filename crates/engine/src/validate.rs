//! Video validation
//!
//! Checks run in order and stop at the first failure: the file exists and is
//! non-empty, metadata can be probed, a declared duration is positive, a video
//! stream is present, and a bounded prefix decodes without decoder errors.
//! Remote URLs are first checked with a HEAD request; very large remote files
//! are accepted on header evidence alone and never decoded.

use crate::config::Config;
use crate::error::{ErrorEntry, ErrorKind};
use crate::probe::{probe_file, ProbeResult};
use crate::process::{run_with_timeout, stderr_tail, ProcessError};
use crate::request::classify_client_error;
use crate::retry::{retry_with_backoff, RetryAction, RetryPolicy};
use futures::stream::{self, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const MIB: u64 = 1024 * 1024;

/// Individual checks, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationCheck {
    Readable,
    MetadataExtractable,
    DurationValid,
    StreamsValid,
    NoCorruption,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub target: String,
    pub remote: bool,
    pub exists: bool,
    pub size_bytes: Option<u64>,
    pub duration_seconds: Option<f64>,
    pub checks_passed: BTreeSet<ValidationCheck>,
    /// Accepted on HEAD evidence only, no probe or decode
    pub header_only: bool,
    pub is_valid: bool,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
}

impl ValidationResult {
    fn new(target: &str, remote: bool) -> Self {
        Self {
            target: target.to_string(),
            remote,
            exists: false,
            size_bytes: None,
            duration_seconds: None,
            checks_passed: BTreeSet::new(),
            header_only: false,
            is_valid: false,
            error_kind: None,
            error: None,
        }
    }

    fn pass(&mut self, check: ValidationCheck) {
        self.checks_passed.insert(check);
    }

    fn fail(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.is_valid = false;
        self.error_kind = Some(kind);
        self.error = Some(message.into());
        self
    }

    fn accept(mut self) -> Self {
        self.is_valid = true;
        self
    }

    pub fn error_entry(&self) -> Option<ErrorEntry> {
        if self.is_valid {
            return None;
        }
        Some(ErrorEntry {
            path: self.target.clone(),
            derivative: None,
            url: self.remote.then(|| self.target.clone()),
            kind: self.error_kind.unwrap_or(ErrorKind::Exception),
            status_code: None,
            exit_code: None,
            message: self.error.clone().unwrap_or_else(|| "validation failed".to_string()),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub total: u64,
    pub valid: u64,
    pub invalid: u64,
    pub error_counts: BTreeMap<ErrorKind, u64>,
    pub results: Vec<ValidationResult>,
}

impl ValidationSummary {
    pub fn from_results(results: Vec<ValidationResult>) -> Self {
        let mut summary = Self::default();
        for result in &results {
            summary.total += 1;
            if result.is_valid {
                summary.valid += 1;
            } else {
                summary.invalid += 1;
                *summary
                    .error_counts
                    .entry(result.error_kind.unwrap_or(ErrorKind::Exception))
                    .or_insert(0) += 1;
            }
        }
        summary.results = results;
        summary
    }

    pub fn errors(&self) -> Vec<ErrorEntry> {
        self.results.iter().filter_map(ValidationResult::error_entry).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ValidatorOptions {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub probe_timeout: Duration,
    pub decode_seconds: u32,
    pub remote_header_only_bytes: u64,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ValidatorOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            ffmpeg: cfg.tools.ffmpeg.clone(),
            ffprobe: cfg.tools.ffprobe.clone(),
            probe_timeout: Duration::from_secs(cfg.validation.probe_timeout_secs),
            decode_seconds: cfg.validation.decode_seconds,
            remote_header_only_bytes: cfg.validation.remote_header_only_mib.saturating_mul(MIB),
            http_timeout: Duration::from_secs(cfg.warmup.timeout_secs),
            retry: RetryPolicy::linear(cfg.warmup.max_retries, Duration::from_secs(cfg.warmup.retry_step_secs)),
        }
    }
}

/// Outcome of the declared-metadata checks on a probe result
pub fn evaluate_probe(probe: &ProbeResult) -> Result<Vec<ValidationCheck>, (ErrorKind, String)> {
    if let Some(duration) = probe.format.duration_seconds {
        if duration <= 0.0 {
            return Err((ErrorKind::CorruptionDetected, format!("non-positive duration {}", duration)));
        }
    }
    if !probe.video_streams.iter().any(|v| v.width > 0 && v.height > 0) {
        return Err((
            ErrorKind::CorruptionDetected,
            "no video stream present".to_string(),
        ));
    }
    Ok(vec![ValidationCheck::DurationValid, ValidationCheck::StreamsValid])
}

pub fn is_remote(target: &str) -> bool {
    let lower = target.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn acceptable_content_type(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    mime.starts_with("video/") || mime == "application/octet-stream"
}

struct HeadInfo {
    content_type: Option<String>,
    content_length: Option<u64>,
}

pub struct VideoValidator {
    opts: ValidatorOptions,
    client: reqwest::Client,
}

impl VideoValidator {
    pub fn new(opts: ValidatorOptions, client: reqwest::Client) -> Self {
        Self { opts, client }
    }

    /// Validate many targets with at most `workers` in flight; results keep input order.
    pub async fn validate_many(&self, targets: Vec<String>, workers: usize) -> ValidationSummary {
        info!(targets = targets.len(), workers, "Validating media");
        let results: Vec<ValidationResult> = stream::iter(targets)
            .map(|target| async move { self.validate_one(&target).await })
            .buffered(workers.max(1))
            .collect()
            .await;

        let summary = ValidationSummary::from_results(results);
        info!(valid = summary.valid, invalid = summary.invalid, "Validation finished");
        summary
    }

    pub async fn validate_one(&self, target: &str) -> ValidationResult {
        let result = if is_remote(target) {
            self.validate_remote(target).await
        } else {
            self.validate_local(target).await
        };
        match &result.error {
            Some(error) => warn!(target, kind = ?result.error_kind, error = %error, "Validation failed"),
            None => debug!(target, header_only = result.header_only, "Validation passed"),
        }
        result
    }

    async fn validate_local(&self, target: &str) -> ValidationResult {
        let mut result = ValidationResult::new(target, false);
        let meta = match tokio::fs::metadata(Path::new(target)).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return result.fail(ErrorKind::MissingFile, "not a regular file"),
            Err(e) => return result.fail(ErrorKind::MissingFile, e.to_string()),
        };
        result.exists = true;
        result.size_bytes = Some(meta.len());
        if meta.len() == 0 {
            return result.fail(ErrorKind::CorruptionDetected, "file is empty");
        }
        result.pass(ValidationCheck::Readable);

        self.media_checks(result).await
    }

    async fn validate_remote(&self, target: &str) -> ValidationResult {
        let mut result = ValidationResult::new(target, true);
        let head = match self.head(target).await {
            Ok(head) => head,
            Err((kind, message)) => return result.fail(kind, message),
        };
        result.exists = true;
        result.size_bytes = head.content_length;

        if let Some(content_type) = head.content_type.as_deref() {
            if !acceptable_content_type(content_type) {
                return result.fail(
                    ErrorKind::CorruptionDetected,
                    format!("unexpected content type '{}'", content_type),
                );
            }
        }
        result.pass(ValidationCheck::Readable);

        if head.content_length.map_or(false, |len| len > self.opts.remote_header_only_bytes) {
            result.header_only = true;
            return result.accept();
        }

        self.media_checks(result).await
    }

    /// HEAD with retries for 5xx and network errors
    async fn head(&self, url: &str) -> Result<HeadInfo, (ErrorKind, String)> {
        retry_with_backoff(&self.opts.retry, |_| async move {
            let response = match self.client.head(url).timeout(self.opts.http_timeout).send().await {
                Ok(response) => response,
                Err(e) => {
                    let (_, kind) = classify_client_error(&e);
                    return RetryAction::Retry(HeadFailure(kind, e.to_string()));
                }
            };
            let status = response.status().as_u16();
            if status >= 400 {
                let failure = HeadFailure(ErrorKind::from_status(status), format!("HTTP {}", status));
                return if status >= 500 {
                    RetryAction::Retry(failure)
                } else {
                    RetryAction::Fail(failure)
                };
            }
            let headers = response.headers();
            RetryAction::Success(HeadInfo {
                content_type: headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
                content_length: headers
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse().ok()),
            })
        })
        .await
        .map_err(|HeadFailure(kind, message)| (kind, message))
    }

    /// Probe, metadata and decode checks shared by local and remote targets.
    async fn media_checks(&self, mut result: ValidationResult) -> ValidationResult {
        let probe = match probe_file(&self.opts.ffprobe, &result.target, self.opts.probe_timeout).await {
            Ok(probe) => probe,
            Err(e) => return result.fail(ErrorKind::ProbeFailed, e.to_string()),
        };
        result.pass(ValidationCheck::MetadataExtractable);
        result.duration_seconds = probe.format.duration_seconds;

        match evaluate_probe(&probe) {
            Ok(passed) => passed.into_iter().for_each(|check| result.pass(check)),
            Err((kind, message)) => return result.fail(kind, message),
        }

        match self.decode_prefix(&result.target).await {
            Ok(()) => {
                result.pass(ValidationCheck::NoCorruption);
                result.accept()
            }
            Err((kind, message)) => result.fail(kind, message),
        }
    }

    /// Decode the first `decode_seconds`; any decoder output counts as corruption.
    async fn decode_prefix(&self, target: &str) -> Result<(), (ErrorKind, String)> {
        let mut cmd = Command::new(&self.opts.ffmpeg);
        cmd.args(["-hide_banner", "-nostdin", "-v", "error", "-t"])
            .arg(self.opts.decode_seconds.max(1).to_string())
            .arg("-i")
            .arg(target)
            .args(["-f", "null", "-"]);

        let output = run_with_timeout(&mut cmd, self.opts.probe_timeout)
            .await
            .map_err(|e| match e {
                ProcessError::TimedOut { .. } => (ErrorKind::Timeout, e.to_string()),
                ProcessError::Spawn { .. } => (ErrorKind::Exception, e.to_string()),
            })?;

        let diagnostics = stderr_tail(&output.stderr, 10);
        if !output.status.success() || !diagnostics.is_empty() {
            let message = if diagnostics.is_empty() {
                format!("decoder exited with {}", output.status)
            } else {
                diagnostics
            };
            return Err((ErrorKind::CorruptionDetected, message));
        }
        Ok(())
    }
}

struct HeadFailure(ErrorKind, String);

impl std::fmt::Display for HeadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.0, self.1)
    }
}

/// Expand directories into the media files they contain; other targets pass through.
pub fn expand_targets(targets: &[String]) -> Vec<String> {
    let mut expanded = Vec::new();
    for target in targets {
        if !is_remote(target) && Path::new(target).is_dir() {
            expanded.extend(
                crate::scan::scan_media(&[Path::new(target).to_path_buf()])
                    .into_iter()
                    .map(|p| p.to_string_lossy().into_owned()),
            );
        } else {
            expanded.push(target.clone());
        }
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{FormatInfo, VideoStream};
    use crate::test_support::spawn_server;
    use axum::http::{header, StatusCode};
    use axum::routing::get;
    use axum::Router;

    fn validator() -> VideoValidator {
        let mut cfg = Config::default();
        cfg.tools.ffprobe = "definitely-not-ffprobe-b2e0".to_string();
        cfg.tools.ffmpeg = "definitely-not-ffmpeg-b2e0".to_string();
        let mut opts = ValidatorOptions::from_config(&cfg);
        opts.retry = RetryPolicy::no_retries();
        opts.http_timeout = Duration::from_secs(5);
        VideoValidator::new(opts, reqwest::Client::new())
    }

    fn probe(duration: Option<f64>, streams: Vec<VideoStream>) -> ProbeResult {
        ProbeResult {
            video_streams: streams,
            audio_streams: Vec::new(),
            format: FormatInfo {
                duration_seconds: duration,
                size_bytes: Some(1000),
                bitrate: None,
            },
        }
    }

    fn stream() -> VideoStream {
        VideoStream {
            codec_name: "h264".to_string(),
            width: 640,
            height: 360,
            bitrate: None,
        }
    }

    #[test]
    fn test_evaluate_probe() {
        assert_eq!(
            evaluate_probe(&probe(Some(12.0), vec![stream()])).unwrap(),
            vec![ValidationCheck::DurationValid, ValidationCheck::StreamsValid]
        );
        // absent duration is not a failure
        assert!(evaluate_probe(&probe(None, vec![stream()])).is_ok());

        let (kind, message) = evaluate_probe(&probe(Some(0.0), vec![stream()])).unwrap_err();
        assert_eq!(kind, ErrorKind::CorruptionDetected);
        assert!(message.contains("duration"));

        let (_, message) = evaluate_probe(&probe(Some(3.0), Vec::new())).unwrap_err();
        assert!(message.contains("video stream"));
    }

    #[test]
    fn test_content_types() {
        assert!(acceptable_content_type("video/mp4"));
        assert!(acceptable_content_type("Video/WebM; codecs=vp9"));
        assert!(acceptable_content_type("application/octet-stream"));
        assert!(!acceptable_content_type("text/html; charset=utf-8"));
        assert!(is_remote("HTTPS://cdn.example.com/a.mp4"));
        assert!(!is_remote("/srv/media/a.mp4"));
    }

    #[tokio::test]
    async fn test_local_checks_short_circuit() {
        let dir = tempfile::tempdir().unwrap();
        let validator = validator();

        let missing = validator
            .validate_one(&dir.path().join("nope.mp4").to_string_lossy())
            .await;
        assert!(!missing.exists);
        assert_eq!(missing.error_kind, Some(ErrorKind::MissingFile));
        assert!(missing.checks_passed.is_empty());

        let empty_path = dir.path().join("empty.mp4");
        std::fs::write(&empty_path, b"").unwrap();
        let empty = validator.validate_one(&empty_path.to_string_lossy()).await;
        assert!(empty.exists);
        assert_eq!(empty.error_kind, Some(ErrorKind::CorruptionDetected));

        let junk_path = dir.path().join("junk.mp4");
        std::fs::write(&junk_path, b"junk").unwrap();
        let junk = validator.validate_one(&junk_path.to_string_lossy()).await;
        assert_eq!(junk.error_kind, Some(ErrorKind::ProbeFailed));
        assert_eq!(junk.checks_passed, BTreeSet::from([ValidationCheck::Readable]));
        assert!(junk.error_entry().is_some());
    }

    #[tokio::test]
    async fn test_remote_head_checks() {
        let router = Router::new()
            .route(
                "/big.mp4",
                get(|| async { StatusCode::OK }).head(|| async {
                    (
                        [(header::CONTENT_TYPE, "video/mp4"), (header::CONTENT_LENGTH, "209715200")],
                        StatusCode::OK,
                    )
                }),
            )
            .route(
                "/page.mp4",
                get(|| async { StatusCode::OK })
                    .head(|| async { ([(header::CONTENT_TYPE, "text/html")], StatusCode::OK) }),
            );
        let base = spawn_server(router).await;
        let validator = validator();

        let big = validator.validate_one(&format!("{}/big.mp4", base)).await;
        assert!(big.is_valid, "{:?}", big.error);
        assert!(big.header_only);
        assert_eq!(big.size_bytes, Some(200 * MIB));

        let page = validator.validate_one(&format!("{}/page.mp4", base)).await;
        assert!(!page.is_valid);
        assert!(page.error.unwrap().contains("content type"));

        let missing = validator.validate_one(&format!("{}/missing.mp4", base)).await;
        assert!(!missing.exists);
        assert_eq!(missing.error_kind, Some(ErrorKind::Http4xx));
    }

    #[tokio::test]
    async fn test_validate_many_keeps_order_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let targets: Vec<String> = (0..5)
            .map(|i| dir.path().join(format!("missing-{}.mp4", i)).to_string_lossy().into_owned())
            .collect();

        let summary = validator().validate_many(targets.clone(), 2).await;
        assert_eq!(summary.total, 5);
        assert_eq!(summary.invalid, 5);
        assert_eq!(summary.error_counts[&ErrorKind::MissingFile], 5);
        let order: Vec<String> = summary.results.iter().map(|r| r.target.clone()).collect();
        assert_eq!(order, targets);
        assert_eq!(summary.errors().len(), 5);
    }
}
