//! Request Executor Module
//!
//! Performs one warming request for an (object, derivative) pair against the
//! edge service. Bodies are streamed and counted, never buffered; a declared
//! `Content-Length` is compared against the bytes actually read but the read
//! count always wins.

use crate::config::WarmupConfig;
use crate::error::{ErrorEntry, ErrorKind};
use crate::retry::{retry_with_backoff, RetryAction, RetryPolicy};
use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Pseudo-derivative used when no variant set is configured
pub const DEFAULT_DERIVATIVE: &str = "default";

/// HTTP method that produced an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Get,
    Head,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Success,
    HttpError,
    Timeout,
    ConnectionError,
    Exception,
}

/// Terminal record of one (object, derivative) request.
///
/// `attempt_number` is the 0-indexed attempt that produced this record; retries
/// overwrite it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingAttempt {
    pub url: String,
    pub attempt_number: u32,
    pub method: RequestMethod,
    pub status_code: Option<u16>,
    pub ttfb_seconds: Option<f64>,
    pub total_seconds: Option<f64>,
    pub response_bytes: u64,
    pub original_bytes: u64,
    pub reduction_percent: Option<f64>,
    pub outcome: Outcome,
    pub error_kind: Option<ErrorKind>,
    pub error_detail: Option<String>,
}

impl ProcessingAttempt {
    fn new(url: &str, attempt_number: u32, method: RequestMethod, original_bytes: u64) -> Self {
        Self {
            url: url.to_string(),
            attempt_number,
            method,
            status_code: None,
            ttfb_seconds: None,
            total_seconds: None,
            response_bytes: 0,
            original_bytes,
            reduction_percent: None,
            outcome: Outcome::Exception,
            error_kind: None,
            error_detail: None,
        }
    }

    fn succeed(mut self, status: u16, ttfb: Duration, total: Duration, response_bytes: u64) -> Self {
        self.status_code = Some(status);
        self.ttfb_seconds = Some(ttfb.as_secs_f64());
        self.total_seconds = Some(total.as_secs_f64());
        self.response_bytes = response_bytes;
        self.reduction_percent = reduction_percent(self.original_bytes, response_bytes);
        self.outcome = Outcome::Success;
        self
    }

    fn fail(mut self, outcome: Outcome, kind: ErrorKind, detail: impl Into<String>) -> Self {
        self.outcome = outcome;
        self.error_kind = Some(kind);
        self.error_detail = Some(detail.into());
        self
    }

    /// Attempt that never reached the network, e.g. an unbuildable URL.
    pub fn rejected(url: &str, original_bytes: u64, detail: impl Into<String>) -> Self {
        Self::new(url, 0, RequestMethod::Get, original_bytes).fail(Outcome::Exception, ErrorKind::Exception, detail)
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// 5xx, timeouts, connection failures and unclassified errors may be retried.
    pub fn is_retryable(&self) -> bool {
        match self.outcome {
            Outcome::Success => false,
            Outcome::HttpError => self.status_code.map_or(true, |s| s >= 500),
            Outcome::Timeout | Outcome::ConnectionError | Outcome::Exception => true,
        }
    }

    /// Error report entry for a failed attempt.
    pub fn error_entry(&self, path: &str, derivative: &str) -> Option<ErrorEntry> {
        if self.is_success() {
            return None;
        }
        Some(ErrorEntry {
            path: path.to_string(),
            derivative: Some(derivative.to_string()),
            url: Some(self.url.clone()),
            kind: self.error_kind.unwrap_or(ErrorKind::Exception),
            status_code: self.status_code,
            exit_code: None,
            message: self
                .error_detail
                .clone()
                .unwrap_or_else(|| "unclassified failure".to_string()),
        })
    }
}

impl std::fmt::Display for ProcessingAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.error_kind, &self.error_detail) {
            (Some(kind), Some(detail)) => write!(f, "{} ({})", kind, detail),
            (Some(kind), None) => write!(f, "{}", kind),
            _ => write!(f, "{:?}", self.outcome),
        }
    }
}

/// Percentage saved, only when both sizes are positive.
pub fn reduction_percent(original: u64, transformed: u64) -> Option<f64> {
    if original == 0 || transformed == 0 {
        return None;
    }
    Some((original as f64 - transformed as f64) / original as f64 * 100.0)
}

/// Per-request knobs resolved from configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestOptions {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub post_success_delay: Duration,
    pub prefer_head: bool,
}

impl RequestOptions {
    pub fn from_config(cfg: &WarmupConfig) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.timeout_secs),
            retry: RetryPolicy::linear(cfg.max_retries, Duration::from_secs(cfg.retry_step_secs)),
            post_success_delay: Duration::from_millis(cfg.post_success_delay_ms),
            prefer_head: cfg.prefer_head,
        }
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::from_config(&WarmupConfig::default())
    }
}

/// Build the request URL for one object and derivative.
///
/// The derivative travels as a query parameter; the `default` pseudo-derivative
/// requests the plain object.
pub fn build_derivative_url(
    base_url: &str,
    path: &str,
    derivative_param: &str,
    derivative: Option<&str>,
) -> Result<Url, url::ParseError> {
    let mut base = Url::parse(base_url)?;
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    let mut url = base.join(path.trim_start_matches('/'))?;
    if let Some(name) = derivative.filter(|d| *d != DEFAULT_DERIVATIVE) {
        url.query_pairs_mut().append_pair(derivative_param, name);
    }
    Ok(url)
}

/// Shared HTTP client wrapper. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    client: reqwest::Client,
}

impl RequestExecutor {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("media-prewarmer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Run attempts `0..=max_retries` with linear backoff and return the
    /// terminal attempt. Never fails: every error is recorded in the result.
    pub async fn execute(&self, url: &str, original_bytes: u64, opts: &RequestOptions) -> ProcessingAttempt {
        let outcome = retry_with_backoff(&opts.retry, |attempt_number| async move {
            let attempt = self.attempt_once(url, attempt_number, original_bytes, opts).await;
            if attempt.is_success() {
                RetryAction::Success(attempt)
            } else if attempt.is_retryable() {
                RetryAction::Retry(attempt)
            } else {
                RetryAction::Fail(attempt)
            }
        })
        .await;

        match outcome {
            Ok(attempt) => {
                if !opts.post_success_delay.is_zero() {
                    tokio::time::sleep(opts.post_success_delay).await;
                }
                attempt
            }
            Err(attempt) => attempt,
        }
    }

    async fn attempt_once(
        &self,
        url: &str,
        attempt_number: u32,
        original_bytes: u64,
        opts: &RequestOptions,
    ) -> ProcessingAttempt {
        let started = Instant::now();

        if opts.prefer_head {
            if let Some((status, length)) = self.try_head(url, opts.timeout).await {
                let elapsed = started.elapsed();
                debug!(url, status, length, "HEAD satisfied attempt");
                return ProcessingAttempt::new(url, attempt_number, RequestMethod::Head, original_bytes)
                    .succeed(status, elapsed, elapsed, length);
            }
            debug!(url, "HEAD unusable, falling back to GET");
        }

        self.stream_get(url, attempt_number, original_bytes, opts.timeout, started)
            .await
    }

    /// HEAD counts only when it answers below 400 with a usable Content-Length.
    async fn try_head(&self, url: &str, timeout: Duration) -> Option<(u16, u64)> {
        let response = self.client.head(url).timeout(timeout).send().await.ok()?;
        let status = response.status().as_u16();
        if status >= 400 {
            return None;
        }
        let length = declared_length(response.headers())?;
        Some((status, length))
    }

    async fn stream_get(
        &self,
        url: &str,
        attempt_number: u32,
        original_bytes: u64,
        timeout: Duration,
        started: Instant,
    ) -> ProcessingAttempt {
        let attempt = ProcessingAttempt::new(url, attempt_number, RequestMethod::Get, original_bytes);

        let response = match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                let (outcome, kind) = classify_client_error(&e);
                debug!(url, attempt = attempt_number, error = %e, "Request failed");
                return attempt.fail(outcome, kind, e.to_string());
            }
        };

        let ttfb = started.elapsed();
        let status = response.status().as_u16();

        if status >= 400 {
            debug!(url, attempt = attempt_number, status, "HTTP error status");
            let mut failed = attempt.fail(
                Outcome::HttpError,
                ErrorKind::from_status(status),
                format!("HTTP {}", status),
            );
            failed.status_code = Some(status);
            failed.ttfb_seconds = Some(ttfb.as_secs_f64());
            return failed;
        }

        let declared = declared_length(response.headers());
        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => received += bytes.len() as u64,
                Err(e) => {
                    let (outcome, kind) = classify_client_error(&e);
                    let mut failed = attempt.fail(outcome, kind, format!("body read failed: {}", e));
                    failed.status_code = Some(status);
                    failed.ttfb_seconds = Some(ttfb.as_secs_f64());
                    failed.response_bytes = received;
                    return failed;
                }
            }
        }

        if let Some(declared) = declared {
            if declared != received {
                warn!(url, declared, received, "Content-Length mismatch, using bytes read");
            }
        }

        debug!(url, attempt = attempt_number, status, bytes = received, "Request complete");
        attempt.succeed(status, ttfb, started.elapsed(), received)
    }
}

fn declared_length(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Map a client error onto the attempt outcome and error taxonomy.
pub fn classify_client_error(e: &reqwest::Error) -> (Outcome, ErrorKind) {
    if e.is_timeout() {
        (Outcome::Timeout, ErrorKind::Timeout)
    } else if e.is_connect() {
        (Outcome::ConnectionError, ErrorKind::ConnectionError)
    } else {
        (Outcome::Exception, ErrorKind::Exception)
    }
}
