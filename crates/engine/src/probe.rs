//! Probe module for reading media metadata with ffprobe.
//!
//! Shared by the transcoder (source dimensions and duration) and the
//! validator (metadata, duration and stream checks).

use crate::process::{run_with_timeout, stderr_tail, ProcessError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe ran but reported failure.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// ffprobe could not be started or did not finish in time.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Information about a video stream from ffprobe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoStream {
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    /// Bitrate in bits per second (if available).
    pub bitrate: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioStream {
    pub codec_name: String,
    pub channels: u32,
}

/// Format information from ffprobe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormatInfo {
    /// Declared duration in seconds, if the container carries one.
    pub duration_seconds: Option<f64>,
    pub size_bytes: Option<u64>,
    pub bitrate: Option<u64>,
}

/// Result of probing a media file or URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub video_streams: Vec<VideoStream>,
    pub audio_streams: Vec<AudioStream>,
    pub format: FormatInfo,
}

/// Source properties the transcoder needs to pick scaling filters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceVideoInfo {
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
    pub bitrate: Option<u64>,
}

impl ProbeResult {
    /// Dimensions of the first video stream plus container duration/bitrate.
    ///
    /// Returns `None` without a video stream with non-zero dimensions.
    pub fn source_video_info(&self) -> Option<SourceVideoInfo> {
        let video = self
            .video_streams
            .iter()
            .find(|v| v.width > 0 && v.height > 0)?;
        Some(SourceVideoInfo {
            width: video.width,
            height: video.height,
            duration_seconds: self.format.duration_seconds.unwrap_or(0.0),
            bitrate: self.format.bitrate.or(video.bitrate),
        })
    }
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub bit_rate: Option<String>,
        pub channels: Option<u32>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub size: Option<String>,
        pub bit_rate: Option<String>,
    }
}

/// Probes a file path or URL using ffprobe.
///
/// Runs `ffprobe -v quiet -print_format json -show_streams -show_format <target>`
/// bounded by `timeout`, and parses the JSON output.
pub async fn probe_file(ffprobe: &str, target: &str, timeout: Duration) -> Result<ProbeResult, ProbeError> {
    let mut cmd = Command::new(ffprobe);
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_streams",
        "-show_format",
    ])
    .arg(target);

    let output = run_with_timeout(&mut cmd, timeout).await?;

    if !output.status.success() {
        return Err(ProbeError::FfprobeFailed(format!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr_tail(&output.stderr, 5)
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ffprobe_output(&stdout)
}

/// Parses ffprobe JSON output into a ProbeResult.
pub fn parse_ffprobe_output(json_str: &str) -> Result<ProbeResult, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let streams = ffprobe.streams.unwrap_or_default();
    let format = ffprobe.format.ok_or_else(|| {
        ProbeError::ParseError("Missing format information in ffprobe output".to_string())
    })?;

    let mut video_streams = Vec::new();
    let mut audio_streams = Vec::new();

    for stream in streams {
        let codec_name = stream.codec_name.clone().unwrap_or_default();
        match stream.codec_type.as_deref().unwrap_or("") {
            "video" => video_streams.push(VideoStream {
                codec_name,
                width: stream.width.unwrap_or(0),
                height: stream.height.unwrap_or(0),
                bitrate: parse_number(stream.bit_rate.as_deref()),
            }),
            "audio" => audio_streams.push(AudioStream {
                codec_name,
                channels: stream.channels.unwrap_or(0),
            }),
            _ => {}
        }
    }

    Ok(ProbeResult {
        video_streams,
        audio_streams,
        format: FormatInfo {
            duration_seconds: format
                .duration
                .as_deref()
                .and_then(|d| d.trim().parse::<f64>().ok())
                .filter(|d| d.is_finite()),
            size_bytes: parse_number(format.size.as_deref()),
            bitrate: parse_number(format.bit_rate.as_deref()),
        },
    })
}

fn parse_number(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse::<u64>().ok())
}
