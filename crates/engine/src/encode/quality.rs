//! Codec and quality lookup tables
//!
//! Quality profiles resolve to a numeric quality parameter plus a speed preset
//! per encoder family. The secondary rendition has its own table tuned for
//! smaller web fallbacks. Unknown names degrade to `h264`/`medium`.

use crate::hardware::{hardware_encoder_name, Vendor, VideoCodec};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityProfile {
    Low,
    Medium,
    High,
    Max,
}

impl QualityProfile {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "low" => Some(QualityProfile::Low),
            "medium" | "default" => Some(QualityProfile::Medium),
            "high" => Some(QualityProfile::High),
            "max" | "maximum" | "best" => Some(QualityProfile::Max),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityProfile::Low => "low",
            QualityProfile::Medium => "medium",
            QualityProfile::High => "high",
            QualityProfile::Max => "max",
        }
    }

    fn index(&self) -> usize {
        match self {
            QualityProfile::Low => 0,
            QualityProfile::Medium => 1,
            QualityProfile::High => 2,
            QualityProfile::Max => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioProfile {
    Copy,
    None,
    Low,
    Medium,
    High,
}

impl AudioProfile {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "copy" => Some(AudioProfile::Copy),
            "none" | "strip" => Some(AudioProfile::None),
            "low" => Some(AudioProfile::Low),
            "medium" => Some(AudioProfile::Medium),
            "high" => Some(AudioProfile::High),
            _ => None,
        }
    }
}

/// Codec name to codec, falling back to h264.
pub fn resolve_codec(name: &str) -> VideoCodec {
    VideoCodec::from_name(name).unwrap_or_else(|| {
        warn!(codec = name, "Unknown codec, using h264");
        VideoCodec::H264
    })
}

/// Profile name to profile, falling back to medium.
pub fn resolve_quality(name: &str) -> QualityProfile {
    QualityProfile::from_name(name).unwrap_or_else(|| {
        warn!(quality = name, "Unknown quality profile, using medium");
        QualityProfile::Medium
    })
}

pub fn resolve_audio(name: &str) -> AudioProfile {
    AudioProfile::from_name(name).unwrap_or_else(|| {
        warn!(audio = name, "Unknown audio profile, using medium");
        AudioProfile::Medium
    })
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Software encoder arguments for the primary rendition
pub fn software_video_args(codec: VideoCodec, quality: QualityProfile) -> Vec<String> {
    let i = quality.index();
    let encoder = codec.software_encoder();
    match codec {
        VideoCodec::H264 => {
            let crf = ["28", "23", "20", "18"][i];
            let preset = ["veryfast", "medium", "slow", "slower"][i];
            strings(&["-c:v", encoder, "-crf", crf, "-preset", preset, "-pix_fmt", "yuv420p"])
        }
        VideoCodec::Hevc => {
            let crf = ["30", "26", "23", "20"][i];
            let preset = ["veryfast", "medium", "slow", "slower"][i];
            strings(&["-c:v", encoder, "-crf", crf, "-preset", preset, "-tag:v", "hvc1", "-pix_fmt", "yuv420p"])
        }
        VideoCodec::Av1 => {
            let crf = ["40", "34", "30", "24"][i];
            let preset = ["10", "8", "6", "4"][i];
            strings(&["-c:v", encoder, "-crf", crf, "-preset", preset, "-pix_fmt", "yuv420p"])
        }
        VideoCodec::Vp9 => {
            let crf = ["40", "33", "31", "24"][i];
            let cpu_used = ["4", "2", "1", "0"][i];
            strings(&[
                "-c:v", encoder, "-crf", crf, "-b:v", "0", "-deadline", "good", "-cpu-used", cpu_used, "-row-mt", "1",
            ])
        }
    }
}

/// Software encoder arguments for the secondary (web fallback) rendition
pub fn secondary_video_args(codec: VideoCodec, quality: QualityProfile) -> Vec<String> {
    let i = quality.index();
    let encoder = codec.software_encoder();
    match codec {
        VideoCodec::H264 => {
            let crf = ["30", "26", "23", "20"][i];
            let preset = ["veryfast", "fast", "medium", "slow"][i];
            strings(&[
                "-c:v", encoder, "-crf", crf, "-preset", preset, "-profile:v", "main", "-pix_fmt", "yuv420p",
            ])
        }
        VideoCodec::Hevc => {
            let crf = ["32", "28", "25", "22"][i];
            let preset = ["veryfast", "fast", "medium", "slow"][i];
            strings(&["-c:v", encoder, "-crf", crf, "-preset", preset, "-tag:v", "hvc1", "-pix_fmt", "yuv420p"])
        }
        VideoCodec::Av1 => {
            let crf = ["45", "38", "34", "28"][i];
            let preset = ["12", "10", "8", "6"][i];
            strings(&["-c:v", encoder, "-crf", crf, "-preset", preset, "-pix_fmt", "yuv420p"])
        }
        VideoCodec::Vp9 => {
            let crf = ["42", "36", "32", "28"][i];
            let cpu_used = ["5", "4", "2", "1"][i];
            strings(&[
                "-c:v", encoder, "-crf", crf, "-b:v", "0", "-deadline", "good", "-cpu-used", cpu_used, "-row-mt", "1",
            ])
        }
    }
}

/// Hardware encoder arguments, `None` when the vendor has no encoder for `codec`
pub fn hardware_video_args(vendor: Vendor, codec: VideoCodec, quality: QualityProfile) -> Option<Vec<String>> {
    let encoder = hardware_encoder_name(vendor, codec)?;
    let i = quality.index();
    let mut args = strings(&["-c:v", encoder]);
    match vendor {
        Vendor::Nvidia => {
            let cq = ["30", "24", "21", "19"][i];
            let preset = ["p2", "p4", "p5", "p7"][i];
            args.extend(strings(&["-rc", "vbr", "-cq", cq, "-b:v", "0", "-preset", preset]));
        }
        Vendor::Intel => {
            let q = ["30", "25", "22", "19"][i];
            let preset = ["veryfast", "medium", "slow", "veryslow"][i];
            args.extend(strings(&["-global_quality", q, "-preset", preset]));
        }
        Vendor::Vaapi => {
            let qp = ["30", "25", "22", "19"][i];
            args.extend(strings(&["-qp", qp]));
        }
        Vendor::Apple => {
            let q = ["50", "60", "70", "80"][i];
            args.extend(strings(&["-q:v", q]));
        }
        Vendor::Amd => {
            let qp_i = ["30", "25", "22", "19"][i];
            let qp_p = ["32", "27", "24", "21"][i];
            args.extend(strings(&["-rc", "cqp", "-qp_i", qp_i, "-qp_p", qp_p]));
        }
    }
    Some(args)
}

fn is_webm(container: &str) -> bool {
    container.eq_ignore_ascii_case("webm")
}

/// Audio arguments for a container
pub fn audio_args(audio: AudioProfile, container: &str) -> Vec<String> {
    let webm = is_webm(container);
    let bitrate = |i: usize| {
        if webm {
            ["64k", "96k", "128k"][i]
        } else {
            ["96k", "128k", "192k"][i]
        }
    };
    let codec = if webm { "libopus" } else { "aac" };
    match audio {
        AudioProfile::None => strings(&["-an"]),
        // webm cannot carry most source audio codecs as-is
        AudioProfile::Copy if webm => strings(&["-c:a", codec, "-b:a", bitrate(1)]),
        AudioProfile::Copy => strings(&["-c:a", "copy"]),
        AudioProfile::Low => strings(&["-c:a", codec, "-b:a", bitrate(0)]),
        AudioProfile::Medium => strings(&["-c:a", codec, "-b:a", bitrate(1)]),
        AudioProfile::High => strings(&["-c:a", codec, "-b:a", bitrate(2)]),
    }
}

/// Muxer flags for a container
pub fn container_args(container: &str) -> Vec<String> {
    match container.to_lowercase().as_str() {
        "mp4" | "mov" | "m4v" => strings(&["-movflags", "+faststart"]),
        _ => Vec::new(),
    }
}
