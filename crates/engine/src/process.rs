//! Child process helpers for the probe, transcoder and decoder invocations.

use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not finish within {}s", timeout.as_secs_f64())]
    TimedOut { program: String, timeout: Duration },
}

/// Spawn `cmd` with piped output and wait for it, bounded by `timeout`.
///
/// The child is marked `kill_on_drop`, so when the deadline passes the pending
/// wait is dropped and the process is killed. A non-zero exit is not an error
/// here; callers inspect `Output::status`.
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output, ProcessError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();

    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(source)) => Err(ProcessError::Spawn { program, source }),
        Err(_) => {
            tracing::warn!(program = %program, timeout_secs = timeout.as_secs_f64(), "Child process timed out, killed");
            Err(ProcessError::TimedOut { program, timeout })
        }
    }
}

/// Last `max_lines` lines of captured stderr, for error reports.
pub fn stderr_tail(stderr: &[u8], max_lines: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr = b"line1\nline2\n\nline3\nline4\n";
        assert_eq!(stderr_tail(stderr, 2), "line3\nline4");
        assert_eq!(stderr_tail(stderr, 10), "line1\nline2\nline3\nline4");
        assert_eq!(stderr_tail(b"", 3), "");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let mut cmd = Command::new("definitely-not-a-real-binary-4f1c");
        let err = run_with_timeout(&mut cmd, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_is_returned() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo oops >&2; exit 3"]);
        let output = run_with_timeout(&mut cmd, Duration::from_secs(5)).await.unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(stderr_tail(&output.stderr, 5), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_process_times_out() {
        let mut cmd = Command::new("sleep");
        cmd.arg("10");
        let started = std::time::Instant::now();
        let err = run_with_timeout(&mut cmd, Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
