//! Shared retry-with-backoff logic for HTTP attempts and remote validation checks.
//!
//! Backoff is linear: the wait before attempt `i` (1-indexed retries) is
//! `step * i`. With the default 2 second step and two retries a caller sleeps
//! 2s and then 4s.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Wait `step * attempt` before attempt `attempt`
    Linear { step: Duration },
    /// Retry immediately
    None,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt).
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn linear(max_retries: u32, step: Duration) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Linear { step },
        }
    }

    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::None,
        }
    }

    /// Delay slept before the given attempt (0-indexed; attempt 0 never waits).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear { step } => step.checked_mul(attempt).unwrap_or(Duration::MAX),
            Backoff::None => Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(2, Duration::from_secs(2))
    }
}

/// Result of a single attempt, used by the caller to signal retryability.
#[derive(Debug)]
pub enum RetryAction<T, E> {
    /// Operation succeeded.
    Success(T),
    /// Operation failed with a retryable error (network, 5xx, timeout).
    Retry(E),
    /// Operation failed with a non-retryable error (4xx, local input).
    Fail(E),
}

/// Execute an async operation with retry-and-backoff.
///
/// The `operation` closure receives the current attempt number (0-indexed) and
/// returns a [`RetryAction`]. The error of the last attempt is returned once
/// retries are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RetryAction<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => {
                if attempt >= policy.max_retries {
                    return Err(err);
                }
                attempt += 1;
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn delay_is_linear_in_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(10));
    }

    #[test]
    fn delay_without_backoff_is_zero() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Backoff::None,
        };
        assert_eq!(policy.delay_for_attempt(3), Duration::ZERO);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::linear(2, Duration::from_millis(20));
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result: Result<u32, String> = retry_with_backoff(&policy, |attempt| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    RetryAction::Retry(format!("attempt {attempt} failed"))
                } else {
                    RetryAction::Success(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 20ms * 1 + 20ms * 2
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let policy = RetryPolicy::linear(5, Duration::from_millis(1));
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), String> = retry_with_backoff(&policy, |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                RetryAction::Fail("not found".to_string())
            }
        })
        .await;

        assert_eq!(result, Err("not found".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let policy = RetryPolicy::linear(2, Duration::from_millis(1));

        let result: Result<(), String> =
            retry_with_backoff(&policy, |attempt| async move { RetryAction::Retry(format!("boom {attempt}")) })
                .await;

        assert_eq!(result, Err("boom 2".to_string()));
    }
}
