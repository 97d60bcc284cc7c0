//! Startup checks module
//!
//! Provides preflight checks to verify system requirements before a run:
//! - Software-only encoding assertion (when hardware encoding is disallowed)
//! - FFmpeg availability and version check (requires 4.0+)
//! - FFprobe availability check

use crate::config::Config;
use crate::hardware::Vendor;
use std::process::Command;
use thiserror::Error;

/// Substrings that mark a hardware encoder or hardware acceleration flag
const HARDWARE_MARKERS: &[&str] = &["nvenc", "qsv", "vaapi", "videotoolbox", "amf", "cuda"];

/// Oldest ffmpeg major version whose filter and encoder options we rely on
pub const MIN_FFMPEG_MAJOR: u32 = 4;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("FFmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("FFmpeg version requirement not met: {0}")]
    FfmpegVersion(String),

    #[error("FFprobe not available: {0}")]
    FfprobeUnavailable(String),

    #[error("Hardware encoding detected: {0}")]
    HardwareEncodingDetected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Check if a string contains any hardware encoder marker
///
/// Returns the first detected marker, or None if clean.
pub fn detect_hardware_flag(s: &str) -> Option<&'static str> {
    let lower = s.to_lowercase();
    HARDWARE_MARKERS
        .iter()
        .find(|&&flag| lower.contains(flag))
        .copied()
}

/// Reject a configuration that names a hardware vendor while hardware
/// encoding is disallowed. `auto` is allowed and resolves to software only.
pub fn assert_software_only(cfg: &Config) -> Result<(), StartupError> {
    if !cfg.transcode.disallow_hardware_encoding {
        return Ok(());
    }

    let preference = cfg.transcode.hardware.trim().to_lowercase();
    if Vendor::from_name(&preference).is_some() || detect_hardware_flag(&preference).is_some() {
        return Err(StartupError::HardwareEncodingDetected(format!(
            "transcode.hardware = '{}' but hardware encoding is disabled",
            cfg.transcode.hardware
        )));
    }

    Ok(())
}

/// Check a list of arguments for hardware encoder flags
///
/// Returns an error if any argument contains a hardware marker and
/// `disallow_hardware_encoding` is enabled.
pub fn check_args_for_hardware_flags<S: AsRef<str>>(
    args: &[S],
    disallow_hardware_encoding: bool,
) -> Result<(), StartupError> {
    if !disallow_hardware_encoding {
        return Ok(());
    }

    for arg in args {
        let arg = arg.as_ref();
        if let Some(flag) = detect_hardware_flag(arg) {
            return Err(StartupError::HardwareEncodingDetected(format!(
                "Hardware encoding flag '{}' found in '{}', but hardware encoding is disabled",
                flag, arg
            )));
        }
    }

    Ok(())
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 6.1 ..."
/// - N-prefixed: "ffmpeg version n6.1-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let lower = version_line.to_lowercase();
    let version_part = lower
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?;

    let version_str = version_part.trim_start_matches('n');

    let major_str = version_str.split(|c| c == '.' || c == '-').next()?;

    major_str.parse().ok()
}

/// Check that ffmpeg runs and is at least `MIN_FFMPEG_MAJOR`
pub fn check_ffmpeg_version(ffmpeg: &str) -> Result<u32, StartupError> {
    let output = Command::new(ffmpeg).arg("-version").output().map_err(|e| {
        StartupError::FfmpegUnavailable(format!("Failed to run {} -version: {}", ffmpeg, e))
    })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(format!(
            "{} -version failed",
            ffmpeg
        )));
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let major_version = parse_ffmpeg_version(&version_output).ok_or_else(|| {
        StartupError::FfmpegVersion(format!(
            "Could not parse FFmpeg version from output: {}",
            version_output.lines().next().unwrap_or("(empty)")
        ))
    })?;

    if major_version < MIN_FFMPEG_MAJOR {
        return Err(StartupError::FfmpegVersion(format!(
            "FFmpeg {}.x or newer required, got: {}",
            MIN_FFMPEG_MAJOR, major_version
        )));
    }

    Ok(major_version)
}

/// Check that ffprobe runs
pub fn check_ffprobe_available(ffprobe: &str) -> Result<(), StartupError> {
    let output = Command::new(ffprobe).arg("-version").output().map_err(|e| {
        StartupError::FfprobeUnavailable(format!("Failed to run {} -version: {}", ffprobe, e))
    })?;

    if !output.status.success() {
        return Err(StartupError::FfprobeUnavailable(format!(
            "{} -version failed",
            ffprobe
        )));
    }

    Ok(())
}

/// Run all startup checks in order
///
/// Checks are run in the following order:
/// 1. Software-only assertion
/// 2. FFmpeg version (only when transcoding or validating)
/// 3. FFprobe availability (only when transcoding or validating)
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    assert_software_only(cfg)?;

    if cfg.transcode.enabled || cfg.validation.enabled {
        let major = check_ffmpeg_version(&cfg.tools.ffmpeg)?;
        check_ffprobe_available(&cfg.tools.ffprobe)?;
        tracing::info!(ffmpeg_major = major, "Media tools available");
    }

    Ok(())
}
