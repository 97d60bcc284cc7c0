//! Hardware encoder capability detection
//!
//! `HardwareCapabilities` is created once per process and shared by reference.
//! The first `detect()` call runs the probe pass; concurrent first callers wait
//! on the same initialization and every caller observes the same snapshot.

use crate::process::run_with_timeout;
use crate::startup::detect_hardware_flag;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Hardware encoder family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    Nvidia,
    Intel,
    Vaapi,
    Apple,
    Amd,
}

impl Vendor {
    /// Preference order for `auto`
    pub const ALL: [Vendor; 5] = [Vendor::Nvidia, Vendor::Intel, Vendor::Apple, Vendor::Amd, Vendor::Vaapi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Nvidia => "nvidia",
            Vendor::Intel => "intel",
            Vendor::Vaapi => "vaapi",
            Vendor::Apple => "apple",
            Vendor::Amd => "amd",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "nvidia" | "nvenc" | "cuda" => Some(Vendor::Nvidia),
            "intel" | "qsv" => Some(Vendor::Intel),
            "vaapi" => Some(Vendor::Vaapi),
            "apple" | "videotoolbox" => Some(Vendor::Apple),
            "amd" | "amf" => Some(Vendor::Amd),
            _ => None,
        }
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video codec family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    H264,
    Hevc,
    Av1,
    Vp9,
}

impl VideoCodec {
    pub const ALL: [VideoCodec; 4] = [VideoCodec::H264, VideoCodec::Hevc, VideoCodec::Av1, VideoCodec::Vp9];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::Hevc => "hevc",
            VideoCodec::Av1 => "av1",
            VideoCodec::Vp9 => "vp9",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "h264" | "avc" | "x264" => Some(VideoCodec::H264),
            "hevc" | "h265" | "x265" => Some(VideoCodec::Hevc),
            "av1" => Some(VideoCodec::Av1),
            "vp9" => Some(VideoCodec::Vp9),
            _ => None,
        }
    }

    /// Software encoder used when no hardware path applies
    pub fn software_encoder(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::Hevc => "libx265",
            VideoCodec::Av1 => "libsvtav1",
            VideoCodec::Vp9 => "libvpx-vp9",
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ffmpeg encoder name for a vendor/codec pair, if that vendor ships one
pub fn hardware_encoder_name(vendor: Vendor, codec: VideoCodec) -> Option<&'static str> {
    match (vendor, codec) {
        (Vendor::Nvidia, VideoCodec::H264) => Some("h264_nvenc"),
        (Vendor::Nvidia, VideoCodec::Hevc) => Some("hevc_nvenc"),
        (Vendor::Nvidia, VideoCodec::Av1) => Some("av1_nvenc"),
        (Vendor::Intel, VideoCodec::H264) => Some("h264_qsv"),
        (Vendor::Intel, VideoCodec::Hevc) => Some("hevc_qsv"),
        (Vendor::Intel, VideoCodec::Av1) => Some("av1_qsv"),
        (Vendor::Intel, VideoCodec::Vp9) => Some("vp9_qsv"),
        (Vendor::Vaapi, VideoCodec::H264) => Some("h264_vaapi"),
        (Vendor::Vaapi, VideoCodec::Hevc) => Some("hevc_vaapi"),
        (Vendor::Vaapi, VideoCodec::Av1) => Some("av1_vaapi"),
        (Vendor::Vaapi, VideoCodec::Vp9) => Some("vp9_vaapi"),
        (Vendor::Apple, VideoCodec::H264) => Some("h264_videotoolbox"),
        (Vendor::Apple, VideoCodec::Hevc) => Some("hevc_videotoolbox"),
        (Vendor::Amd, VideoCodec::H264) => Some("h264_amf"),
        (Vendor::Amd, VideoCodec::Hevc) => Some("hevc_amf"),
        (Vendor::Amd, VideoCodec::Av1) => Some("av1_amf"),
        _ => None,
    }
}

/// Render node used for VAAPI uploads
pub const VAAPI_DEVICE: &str = "/dev/dri/renderD128";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorCapability {
    pub available: bool,
    pub supported_codecs: BTreeSet<VideoCodec>,
}

/// Which hardware encoders work on this host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareCapabilitySnapshot {
    pub vendors: BTreeMap<Vendor, VendorCapability>,
}

impl HardwareCapabilitySnapshot {
    pub fn supports(&self, vendor: Vendor, codec: VideoCodec) -> bool {
        self.vendors
            .get(&vendor)
            .map_or(false, |cap| cap.available && cap.supported_codecs.contains(&codec))
    }

    /// First vendor in preference order able to encode `codec`
    pub fn first_supporting(&self, codec: VideoCodec) -> Option<Vendor> {
        Vendor::ALL.into_iter().find(|v| self.supports(*v, codec))
    }

    pub fn mark_supported(&mut self, vendor: Vendor, codec: VideoCodec) {
        let cap = self.vendors.entry(vendor).or_default();
        cap.available = true;
        cap.supported_codecs.insert(codec);
    }
}

pub type ProbeFn = Arc<dyn Fn() -> BoxFuture<'static, HardwareCapabilitySnapshot> + Send + Sync>;

/// Initialize-once capability service
pub struct HardwareCapabilities {
    cell: OnceCell<HardwareCapabilitySnapshot>,
    probe: ProbeFn,
}

impl HardwareCapabilities {
    /// Probe the encoders of the given ffmpeg binary on first use.
    pub fn new(ffmpeg: impl Into<String>, probe_timeout: Duration) -> Self {
        let ffmpeg: String = ffmpeg.into();
        Self::with_probe(Arc::new(move || {
            let ffmpeg = ffmpeg.clone();
            Box::pin(async move { probe_hardware(&ffmpeg, probe_timeout).await })
        }))
    }

    pub fn with_probe(probe: ProbeFn) -> Self {
        Self {
            cell: OnceCell::new(),
            probe,
        }
    }

    /// Never probes; every pair is unavailable.
    pub fn disabled() -> Self {
        Self {
            cell: OnceCell::new_with(Some(HardwareCapabilitySnapshot::default())),
            probe: Arc::new(|| Box::pin(async { HardwareCapabilitySnapshot::default() })),
        }
    }

    pub async fn detect(&self) -> &HardwareCapabilitySnapshot {
        self.cell.get_or_init(|| (self.probe)()).await
    }
}

impl std::fmt::Debug for HardwareCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareCapabilities")
            .field("snapshot", &self.cell.get())
            .finish()
    }
}

/// Encoder names from `ffmpeg -hide_banner -encoders` output (video encoders only).
pub fn parse_encoder_list(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            (flags.len() == 6 && flags.starts_with('V') && name != "=").then(|| name.to_string())
        })
        .collect()
}

/// Vendor/codec pairs advertised by an encoder list
pub fn advertised_pairs(encoders: &BTreeSet<String>) -> Vec<(Vendor, VideoCodec, &'static str)> {
    let mut pairs = Vec::new();
    for vendor in Vendor::ALL {
        for codec in VideoCodec::ALL {
            if let Some(name) = hardware_encoder_name(vendor, codec) {
                let attributed = detect_hardware_flag(name).and_then(Vendor::from_name) == Some(vendor);
                if attributed && encoders.contains(name) {
                    pairs.push((vendor, codec, name));
                }
            }
        }
    }
    pairs
}

/// One probe pass: list encoders, then trial-encode a single synthetic frame
/// with each advertised hardware encoder. Any failure marks the pair unavailable.
pub async fn probe_hardware(ffmpeg: &str, timeout: Duration) -> HardwareCapabilitySnapshot {
    let mut snapshot = HardwareCapabilitySnapshot::default();

    let mut list = Command::new(ffmpeg);
    list.args(["-hide_banner", "-encoders"]);
    let encoders = match run_with_timeout(&mut list, timeout).await {
        Ok(output) if output.status.success() => parse_encoder_list(&String::from_utf8_lossy(&output.stdout)),
        Ok(output) => {
            debug!(status = %output.status, "ffmpeg -encoders failed, assuming no hardware");
            return snapshot;
        }
        Err(e) => {
            debug!(error = %e, "ffmpeg -encoders unavailable, assuming no hardware");
            return snapshot;
        }
    };

    for (vendor, codec, encoder) in advertised_pairs(&encoders) {
        let mut trial = Command::new(ffmpeg);
        trial.args(trial_encode_args(vendor, encoder));
        match run_with_timeout(&mut trial, timeout).await {
            Ok(output) if output.status.success() => {
                debug!(%vendor, %codec, encoder, "Hardware encoder usable");
                snapshot.mark_supported(vendor, codec);
            }
            Ok(output) => debug!(%vendor, %codec, encoder, status = %output.status, "Hardware encoder trial failed"),
            Err(e) => debug!(%vendor, %codec, encoder, error = %e, "Hardware encoder trial failed"),
        }
    }

    info!(
        vendors = ?snapshot.vendors.keys().map(Vendor::as_str).collect::<Vec<_>>(),
        "Hardware capability probe complete"
    );
    snapshot
}

fn trial_encode_args(vendor: Vendor, encoder: &str) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if vendor == Vendor::Vaapi {
        args.extend(["-vaapi_device".to_string(), VAAPI_DEVICE.to_string()]);
    }
    args.extend(
        ["-f", "lavfi", "-i", "color=c=black:s=256x256:d=0.1", "-frames:v", "1"]
            .iter()
            .map(|s| s.to_string()),
    );
    if vendor == Vendor::Vaapi {
        args.extend(["-vf".to_string(), "format=nv12,hwupload".to_string()]);
    }
    args.extend(["-c:v".to_string(), encoder.to_string(), "-f".to_string(), "null".to_string(), "-".to_string()]);
    args
}
