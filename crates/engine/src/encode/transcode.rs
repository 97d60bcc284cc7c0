//! Transcode engine
//!
//! Re-encodes one source video through ffmpeg: probe the source, resolve the
//! codec/quality tables and the fit geometry, pick a hardware path if one is
//! usable, then run the transcoder under a wall-clock limit. An optional
//! secondary rendition reuses the geometry with its own software table.

use crate::config::TranscodeConfig;
use crate::encode::fit::{compute_geometry, FitGeometry, FitMode, TargetResolution};
use crate::encode::quality::{
    audio_args, container_args, hardware_video_args, resolve_audio, resolve_codec, resolve_quality,
    secondary_video_args, software_video_args, AudioProfile, QualityProfile,
};
use crate::error::ErrorKind;
use crate::hardware::{HardwareCapabilities, Vendor, VideoCodec, VAAPI_DEVICE};
use crate::probe::{probe_file, ProbeError, SourceVideoInfo};
use crate::process::{run_with_timeout, stderr_tail, ProcessError};
use crate::request::reduction_percent;
use crate::startup::{check_args_for_hardware_flags, StartupError};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Lines of transcoder stderr kept for the error report
const STDERR_TAIL_LINES: usize = 20;

const FALLBACK_RESOLUTION: TargetResolution = TargetResolution::Preset {
    name: "1080p",
    width: 1920,
    height: 1080,
};

/// Error type for one transcode
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Source file not found: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("Probe failed: {0}")]
    ProbeFailed(#[from] ProbeError),

    /// Non-zero exit or killed by a signal
    #[error("Transcoder failed ({}): {stderr}", .exit_code.map_or_else(|| "signal".to_string(), |c| format!("exit code {}", c)))]
    TranscodeFailed { exit_code: Option<i32>, stderr: String },

    #[error("Transcoder did not finish within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Failed to start transcoder: {0}")]
    Process(ProcessError),

    #[error(transparent)]
    HardwareFlagRejected(#[from] StartupError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProcessError> for TranscodeError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::TimedOut { timeout, .. } => TranscodeError::Timeout(timeout),
            other => TranscodeError::Process(other),
        }
    }
}

impl TranscodeError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            TranscodeError::MissingSource(_) => ErrorKind::MissingFile,
            TranscodeError::ProbeFailed(_) => ErrorKind::ProbeFailed,
            TranscodeError::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::TranscodeFailed,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TranscodeError::TranscodeFailed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

/// Hardware acceleration preference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwarePreference {
    /// First vendor in preference order that supports the codec
    Auto,
    /// Software only
    None,
    Vendor(Vendor),
}

impl HardwarePreference {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "auto" | "" => HardwarePreference::Auto,
            "none" | "off" | "software" => HardwarePreference::None,
            other => match Vendor::from_name(other) {
                Some(vendor) => HardwarePreference::Vendor(vendor),
                None => {
                    warn!(hardware = name, "Unknown hardware preference, using software encoding");
                    HardwarePreference::None
                }
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondarySpec {
    pub codec: VideoCodec,
    pub quality: QualityProfile,
    pub container: String,
}

/// Resolved transcode settings, built once per run
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeSpec {
    pub codec: VideoCodec,
    pub quality: QualityProfile,
    pub resolution: TargetResolution,
    pub fit: FitMode,
    pub audio: AudioProfile,
    pub container: String,
    pub secondary: Option<SecondarySpec>,
    pub hardware: HardwarePreference,
    pub disallow_hardware_encoding: bool,
    pub timeout: Duration,
}

impl TranscodeSpec {
    /// Resolve names from the config; unknown names degrade with a warning.
    pub fn from_config(cfg: &TranscodeConfig) -> Self {
        let resolution = TargetResolution::parse(&cfg.resolution).unwrap_or_else(|| {
            warn!(resolution = %cfg.resolution, "Unknown resolution, using 1080p");
            FALLBACK_RESOLUTION
        });
        let fit = FitMode::from_name(&cfg.fit).unwrap_or_else(|| {
            warn!(fit = %cfg.fit, "Unknown fit mode, using contain");
            FitMode::Contain
        });
        let secondary = cfg.create_secondary.then(|| SecondarySpec {
            codec: resolve_codec(&cfg.secondary_codec),
            quality: resolve_quality(&cfg.secondary_quality),
            container: normalize_container(&cfg.secondary_container),
        });

        Self {
            codec: resolve_codec(&cfg.codec),
            quality: resolve_quality(&cfg.quality),
            resolution,
            fit,
            audio: resolve_audio(&cfg.audio),
            container: normalize_container(&cfg.container),
            secondary,
            hardware: HardwarePreference::parse(&cfg.hardware),
            disallow_hardware_encoding: cfg.disallow_hardware_encoding,
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }
}

pub(crate) fn normalize_container(container: &str) -> String {
    let container = container.trim().trim_start_matches('.').to_lowercase();
    if container.is_empty() {
        "mp4".to_string()
    } else {
        container
    }
}

/// Which rendition a command produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendition<'a> {
    Primary { hardware: Option<Vendor> },
    Secondary(&'a SecondarySpec),
}

/// A fully resolved ffmpeg invocation
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeCommand {
    pub program: String,
    /// Options placed before `-i`
    pub input_options: Vec<String>,
    pub input: PathBuf,
    /// Encoder, filter, audio and muxer options
    pub output_options: Vec<String>,
    pub output: PathBuf,
    pub encoder: String,
    pub hardware: Option<Vendor>,
    pub geometry: Option<FitGeometry>,
}

impl TranscodeCommand {
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y"]
            .iter()
            .map(OsString::from)
            .collect();
        args.extend(self.input_options.iter().map(OsString::from));
        args.push("-i".into());
        args.push(self.input.clone().into_os_string());
        args.extend(self.output_options.iter().map(OsString::from));
        args.push(self.output.clone().into_os_string());
        args
    }

    /// Non-path arguments; file names are excluded from the hardware guard.
    pub fn option_args(&self) -> Vec<&str> {
        self.input_options
            .iter()
            .chain(self.output_options.iter())
            .map(String::as_str)
            .collect()
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args());
        cmd
    }
}

/// Build the ffmpeg command for one rendition of `source`.
pub fn build_command(
    ffmpeg: &str,
    source: &Path,
    output: &Path,
    info: &SourceVideoInfo,
    spec: &TranscodeSpec,
    rendition: Rendition<'_>,
) -> TranscodeCommand {
    let geometry = spec
        .resolution
        .target_box(info.width, info.height)
        .map(|target| compute_geometry((info.width, info.height), target, spec.fit));

    let (hardware, container) = match rendition {
        Rendition::Primary { hardware } => (hardware, spec.container.as_str()),
        Rendition::Secondary(secondary) => (None, secondary.container.as_str()),
    };

    let video_args = match rendition {
        Rendition::Secondary(secondary) => secondary_video_args(secondary.codec, secondary.quality),
        Rendition::Primary { hardware: Some(vendor) } => hardware_video_args(vendor, spec.codec, spec.quality)
            .unwrap_or_else(|| software_video_args(spec.codec, spec.quality)),
        Rendition::Primary { hardware: None } => software_video_args(spec.codec, spec.quality),
    };
    let encoder = video_args.get(1).cloned().unwrap_or_default();

    let mut input_options = Vec::new();
    let mut filters: Vec<String> = geometry.iter().map(FitGeometry::filter).collect();
    if hardware == Some(Vendor::Vaapi) {
        input_options.extend(["-vaapi_device".to_string(), VAAPI_DEVICE.to_string()]);
        filters.push("format=nv12,hwupload".to_string());
    }

    let mut output_options = Vec::new();
    if !filters.is_empty() {
        output_options.push("-vf".to_string());
        output_options.push(filters.join(","));
    }
    output_options.extend(video_args);
    output_options.extend(audio_args(spec.audio, container));
    output_options.extend(container_args(container));

    TranscodeCommand {
        program: ffmpeg.to_string(),
        input_options,
        input: source.to_path_buf(),
        output_options,
        output: output.to_path_buf(),
        encoder,
        hardware,
        geometry,
    }
}

/// Where the secondary rendition goes: the primary path with the secondary
/// container extension, or `<stem>.alt.<ext>` when that would collide.
pub fn secondary_output_path(primary: &Path, container: &str) -> PathBuf {
    let candidate = primary.with_extension(container);
    if candidate != primary {
        return candidate;
    }
    let stem = primary
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    primary.with_file_name(format!("{}.alt.{}", stem, container))
}

/// Outcome of the optional secondary rendition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondaryOutcome {
    pub output_path: String,
    pub codec: VideoCodec,
    pub container: String,
    pub size_bytes: Option<u64>,
    pub encode_seconds: f64,
    pub error: Option<String>,
}

impl SecondaryOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a successful primary transcode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeResult {
    pub source_path: String,
    pub output_path: String,
    pub original_size: u64,
    pub new_size: u64,
    pub reduction_bytes: i64,
    pub reduction_percent: f64,
    pub encode_seconds: f64,
    pub codec: VideoCodec,
    pub encoder: String,
    pub quality: QualityProfile,
    /// Requested resolution (`1080p`, `1280x720`, `original`)
    pub requested_resolution: String,
    /// Produced frame size
    pub resolution: String,
    pub fit: FitMode,
    pub hardware_acceleration_used: bool,
    pub hardware_acceleration_type: Option<Vendor>,
    pub secondary: Option<SecondaryOutcome>,
}

/// Runs transcodes against one ffmpeg/ffprobe pair and a shared capability cache
#[derive(Debug, Clone)]
pub struct TranscodeEngine {
    ffmpeg: String,
    ffprobe: String,
    probe_timeout: Duration,
    hardware: Arc<HardwareCapabilities>,
}

impl TranscodeEngine {
    pub fn new(
        ffmpeg: impl Into<String>,
        ffprobe: impl Into<String>,
        probe_timeout: Duration,
        hardware: Arc<HardwareCapabilities>,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            probe_timeout,
            hardware,
        }
    }

    /// Pick the hardware path for this spec, falling back to software.
    pub async fn choose_hardware(&self, spec: &TranscodeSpec) -> Option<Vendor> {
        if spec.disallow_hardware_encoding {
            return None;
        }
        match spec.hardware {
            HardwarePreference::None => None,
            HardwarePreference::Auto => self.hardware.detect().await.first_supporting(spec.codec),
            HardwarePreference::Vendor(vendor) => {
                if self.hardware.detect().await.supports(vendor, spec.codec) {
                    Some(vendor)
                } else {
                    warn!(%vendor, codec = %spec.codec, "Requested hardware encoder unavailable, using software");
                    None
                }
            }
        }
    }

    /// Re-encode `source` into `output` according to `spec`.
    ///
    /// # Errors
    /// Fails when the source is missing or cannot be probed, when the hardware
    /// guard rejects the command, or when the primary transcoder exits non-zero
    /// or times out. A failed secondary rendition is recorded in the result.
    pub async fn optimize(
        &self,
        source: &Path,
        output: &Path,
        spec: &TranscodeSpec,
    ) -> Result<TranscodeResult, TranscodeError> {
        let original_size = match tokio::fs::metadata(source).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(TranscodeError::MissingSource(source.to_path_buf())),
        };

        if spec.disallow_hardware_encoding {
            if let HardwarePreference::Vendor(vendor) = spec.hardware {
                return Err(TranscodeError::HardwareFlagRejected(StartupError::HardwareEncodingDetected(
                    format!("hardware preference '{}' while hardware encoding is disabled", vendor),
                )));
            }
        }

        let probe = probe_file(&self.ffprobe, &source.to_string_lossy(), self.probe_timeout).await?;
        let info = probe.source_video_info().ok_or_else(|| {
            TranscodeError::ProbeFailed(ProbeError::ParseError("no video stream with dimensions".to_string()))
        })?;

        let hardware = self.choose_hardware(spec).await;
        let command = build_command(&self.ffmpeg, source, output, &info, spec, Rendition::Primary { hardware });
        check_args_for_hardware_flags(&command.option_args(), spec.disallow_hardware_encoding)?;

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(
            source = %source.display(),
            encoder = %command.encoder,
            hardware = ?hardware.map(|v| v.as_str()),
            geometry = ?command.geometry.map(|g| g.label()),
            "Transcoding"
        );
        let started = Instant::now();
        run_rendition(&command, spec.timeout).await?;
        let encode_seconds = started.elapsed().as_secs_f64();

        let new_size = tokio::fs::metadata(output).await?.len();
        let secondary = match &spec.secondary {
            Some(secondary) => Some(self.run_secondary(source, output, &info, spec, secondary).await),
            None => None,
        };

        let result = TranscodeResult {
            source_path: source.to_string_lossy().into_owned(),
            output_path: output.to_string_lossy().into_owned(),
            original_size,
            new_size,
            reduction_bytes: original_size as i64 - new_size as i64,
            reduction_percent: reduction_percent(original_size, new_size).unwrap_or(0.0),
            encode_seconds,
            codec: spec.codec,
            encoder: command.encoder.clone(),
            quality: spec.quality,
            requested_resolution: spec.resolution.label(),
            resolution: command
                .geometry
                .map(|g| g.label())
                .unwrap_or_else(|| format!("{}x{}", info.width, info.height)),
            fit: spec.fit,
            hardware_acceleration_used: hardware.is_some(),
            hardware_acceleration_type: hardware,
            secondary,
        };

        info!(
            source = %result.source_path,
            original_size,
            new_size,
            reduction_percent = result.reduction_percent,
            encode_seconds,
            "Transcode complete"
        );
        Ok(result)
    }

    async fn run_secondary(
        &self,
        source: &Path,
        primary_output: &Path,
        info: &SourceVideoInfo,
        spec: &TranscodeSpec,
        secondary: &SecondarySpec,
    ) -> SecondaryOutcome {
        let output = secondary_output_path(primary_output, &secondary.container);
        let command = build_command(&self.ffmpeg, source, &output, info, spec, Rendition::Secondary(secondary));
        let started = Instant::now();

        let outcome = run_rendition(&command, spec.timeout).await;
        let size_bytes = match &outcome {
            Ok(()) => tokio::fs::metadata(&output).await.ok().map(|m| m.len()),
            Err(_) => None,
        };
        let error = outcome.err().map(|e| {
            warn!(output = %output.display(), error = %e, "Secondary rendition failed");
            e.to_string()
        });

        SecondaryOutcome {
            output_path: output.to_string_lossy().into_owned(),
            codec: secondary.codec,
            container: secondary.container.clone(),
            size_bytes,
            encode_seconds: started.elapsed().as_secs_f64(),
            error,
        }
    }
}

/// Run one transcoder process; a failed run removes its partial output.
async fn run_rendition(command: &TranscodeCommand, timeout: Duration) -> Result<(), TranscodeError> {
    debug!(args = ?command.args(), "Running transcoder");
    let mut cmd = command.to_command();
    let result = match run_with_timeout(&mut cmd, timeout).await {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => Err(TranscodeError::TranscodeFailed {
            exit_code: output.status.code(),
            stderr: stderr_tail(&output.stderr, STDERR_TAIL_LINES),
        }),
        Err(e) => Err(TranscodeError::from(e)),
    };

    if let Err(e) = &result {
        error!(output = %command.output.display(), error = %e, "Transcoder failed");
        let _ = tokio::fs::remove_file(&command.output).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(width: u32, height: u32) -> SourceVideoInfo {
        SourceVideoInfo {
            width,
            height,
            duration_seconds: 30.0,
            bitrate: Some(8_000_000),
        }
    }

    fn spec() -> TranscodeSpec {
        TranscodeSpec::from_config(&TranscodeConfig::default())
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.windows(2).find(|pair| pair[0] == flag).map(|pair| pair[1].as_str())
    }

    #[test]
    fn test_spec_from_default_config() {
        let spec = spec();
        assert_eq!(spec.codec, VideoCodec::H264);
        assert_eq!(spec.quality, QualityProfile::Medium);
        assert_eq!(spec.fit, FitMode::Contain);
        assert_eq!(spec.container, "mp4");
        assert_eq!(spec.hardware, HardwarePreference::Auto);
        assert!(spec.secondary.is_none());
    }

    #[test]
    fn test_spec_degrades_unknown_names() {
        let cfg = TranscodeConfig {
            codec: "theora".to_string(),
            resolution: "gigantic".to_string(),
            fit: "squash".to_string(),
            hardware: "quantum".to_string(),
            create_secondary: true,
            secondary_codec: "vp9".to_string(),
            secondary_container: ".WEBM".to_string(),
            ..TranscodeConfig::default()
        };
        let spec = TranscodeSpec::from_config(&cfg);
        assert_eq!(spec.codec, VideoCodec::H264);
        assert_eq!(spec.resolution, FALLBACK_RESOLUTION);
        assert_eq!(spec.fit, FitMode::Contain);
        assert_eq!(spec.hardware, HardwarePreference::None);
        assert_eq!(spec.secondary.unwrap().container, "webm");
    }

    #[test]
    fn test_software_command_layout() {
        let command = build_command(
            "ffmpeg",
            Path::new("/in/clip.mov"),
            Path::new("/out/clip.mp4"),
            &info(3840, 2160),
            &spec(),
            Rendition::Primary { hardware: None },
        );
        assert_eq!(command.encoder, "libx264");
        assert_eq!(value_after(&command.output_options, "-vf"), Some("scale=1920:1080"));
        assert_eq!(value_after(&command.output_options, "-movflags"), Some("+faststart"));
        assert!(command.input_options.is_empty());

        let args: Vec<String> = command.args().iter().map(|a| a.to_string_lossy().into_owned()).collect();
        let input_idx = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input_idx + 1], "/in/clip.mov");
        assert_eq!(args.last().map(String::as_str), Some("/out/clip.mp4"));
        assert!(args.contains(&"-y".to_string()));
    }

    #[test]
    fn test_original_resolution_has_no_scale_filter() {
        let mut spec = spec();
        spec.resolution = TargetResolution::Original;
        let command = build_command(
            "ffmpeg",
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            &info(1280, 720),
            &spec,
            Rendition::Primary { hardware: None },
        );
        assert!(command.geometry.is_none());
        assert!(!command.output_options.contains(&"-vf".to_string()));
    }

    #[test]
    fn test_vaapi_command_uploads_frames() {
        let command = build_command(
            "ffmpeg",
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            &info(1920, 1080),
            &spec(),
            Rendition::Primary { hardware: Some(Vendor::Vaapi) },
        );
        assert_eq!(command.encoder, "h264_vaapi");
        assert_eq!(value_after(&command.input_options, "-vaapi_device"), Some(VAAPI_DEVICE));
        assert_eq!(
            value_after(&command.output_options, "-vf"),
            Some("scale=1920:1080,format=nv12,hwupload")
        );
        assert!(check_args_for_hardware_flags(&command.option_args(), true).is_err());
    }

    #[test]
    fn test_secondary_uses_own_table_and_software() {
        let mut spec = spec();
        spec.audio = AudioProfile::Copy;
        let secondary = SecondarySpec {
            codec: VideoCodec::Vp9,
            quality: QualityProfile::Medium,
            container: "webm".to_string(),
        };
        let command = build_command(
            "ffmpeg",
            Path::new("in.mp4"),
            Path::new("out.webm"),
            &info(1920, 1080),
            &spec,
            Rendition::Secondary(&secondary),
        );
        assert_eq!(command.encoder, "libvpx-vp9");
        assert_eq!(command.hardware, None);
        assert_eq!(value_after(&command.output_options, "-crf"), Some("36"));
        assert_eq!(value_after(&command.output_options, "-c:a"), Some("libopus"));
        assert!(!command.output_options.contains(&"-movflags".to_string()));
    }

    #[test]
    fn test_renditions_compare_by_target() {
        let webm = SecondarySpec {
            codec: VideoCodec::Vp9,
            quality: QualityProfile::Medium,
            container: "webm".to_string(),
        };
        let other = webm.clone();
        assert_eq!(Rendition::Secondary(&webm), Rendition::Secondary(&other));
        assert_ne!(Rendition::Secondary(&webm), Rendition::Primary { hardware: None });
        assert_ne!(
            Rendition::Primary { hardware: None },
            Rendition::Primary { hardware: Some(Vendor::Nvidia) }
        );
    }

    #[test]
    fn test_secondary_output_path() {
        assert_eq!(
            secondary_output_path(Path::new("/out/a/clip.mp4"), "webm"),
            PathBuf::from("/out/a/clip.webm")
        );
        assert_eq!(
            secondary_output_path(Path::new("/out/a/clip.mp4"), "mp4"),
            PathBuf::from("/out/a/clip.alt.mp4")
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            TranscodeError::MissingSource(PathBuf::from("x")).error_kind(),
            ErrorKind::MissingFile
        );
        assert_eq!(
            TranscodeError::ProbeFailed(ProbeError::ParseError("bad".into())).error_kind(),
            ErrorKind::ProbeFailed
        );
        let failed = TranscodeError::TranscodeFailed {
            exit_code: Some(1),
            stderr: "boom".into(),
        };
        assert_eq!(failed.error_kind(), ErrorKind::TranscodeFailed);
        assert_eq!(failed.exit_code(), Some(1));
        let timed_out = TranscodeError::from(ProcessError::TimedOut {
            program: "ffmpeg".into(),
            timeout: Duration::from_secs(5),
        });
        assert_eq!(timed_out.error_kind(), ErrorKind::Timeout);
    }

    fn engine(ffprobe: &str) -> TranscodeEngine {
        TranscodeEngine::new(
            "definitely-not-ffmpeg-c3d1",
            ffprobe,
            Duration::from_secs(5),
            Arc::new(HardwareCapabilities::disabled()),
        )
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_probe() {
        let dir = tempfile::tempdir().unwrap();
        let err = engine("definitely-not-ffprobe-c3d1")
            .optimize(&dir.path().join("nope.mp4"), &dir.path().join("out.mp4"), &spec())
            .await
            .unwrap_err();
        assert!(matches!(err, TranscodeError::MissingSource(_)));
    }

    #[tokio::test]
    async fn test_unprobeable_source_is_probe_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"not a video").unwrap();
        let output = dir.path().join("out").join("clip.mp4");

        let err = engine("definitely-not-ffprobe-c3d1")
            .optimize(&source, &output, &spec())
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), ErrorKind::ProbeFailed);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_named_vendor_rejected_when_disallowed() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"data").unwrap();
        let mut spec = spec();
        spec.disallow_hardware_encoding = true;
        spec.hardware = HardwarePreference::Vendor(Vendor::Nvidia);

        let err = engine("definitely-not-ffprobe-c3d1")
            .optimize(&source, &dir.path().join("out.mp4"), &spec)
            .await
            .unwrap_err();
        assert!(matches!(err, TranscodeError::HardwareFlagRejected(_)));
    }

    #[tokio::test]
    async fn test_auto_without_capabilities_is_software() {
        let engine = engine("ffprobe");
        assert_eq!(engine.choose_hardware(&spec()).await, None);
    }
}
