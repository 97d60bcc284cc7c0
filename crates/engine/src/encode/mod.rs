//! Re-encoding: fit geometry, codec tables and the ffmpeg-driven engine

pub mod fit;
pub mod quality;
pub mod transcode;

pub use fit::{compute_geometry, FitGeometry, FitMode, TargetResolution};
pub use quality::{AudioProfile, QualityProfile};
pub use transcode::{
    build_command, HardwarePreference, Rendition, SecondaryOutcome, SecondarySpec, TranscodeCommand,
    TranscodeEngine, TranscodeError, TranscodeResult, TranscodeSpec,
};
