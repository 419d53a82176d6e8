//! HYVC Encoder Library
//!
//! Region-aware hybrid compression: every frame gets a lossy base layer
//! (by default one inter-coded video stream shared by all frames), and
//! the blocks the region analyzer ranks as most important get a lossless patch
//! on top. The crate also measures what the chosen trade-off actually cost
//! (PSNR/SSIM from decoded pixels, wall-clock and process resource usage).
//!
//! Entry point is [`Engine`]: initialize it once with a codec, then start one
//! [`CompressionRun`] per input.

pub mod assembler;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod engine;
pub mod frame;
pub mod frame_source;
pub mod metrics;
pub mod orchestrator;
pub mod policy;
pub mod progress;
pub mod region_analyzer;
pub mod resources;
pub mod status;
pub mod video_reader;

pub use cancel::{CancelReason, CancelToken};
pub use codec::{AvifCodec, BuiltinCodec, EncodedPayload, FrameCodec, StreamEncoder, VideoCodec};
pub use config::{AnalyzerConfig, CodecKind, EngineConfig, ModePolicy, PolicyTable};
pub use engine::{CompressionRun, Engine};
pub use frame::{Frame, LumaFrame};
pub use frame_source::{FrameSource, MemorySource, SourceInfo};
pub use metrics::{MeasuredQuality, MetricsEngine};
pub use policy::{HybridPolicy, ImportanceStats};
pub use region_analyzer::RegionAnalyzer;
pub use status::{StatusCell, StatusWatcher};
pub use video_reader::VideoReader;

use hyvc_core::Stage;

/// Result type for hyvc-encoder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for hyvc-encoder operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported input: {0}")]
    UnsupportedFormat(String),

    #[error("could not decode input: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("codec job for {job} failed twice: {reason}")]
    EncodeJob { job: String, reason: String },

    #[error("run cancelled: {0}")]
    Cancelled(CancelReason),

    #[error("resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("codec initialization failed: {0}")]
    CodecInit(String),

    #[error("HYVC core error: {0}")]
    Core(#[from] hyvc_core::Error),

    #[error("HYVC decoder error: {0}")]
    Decoder(#[from] hyvc_decoder::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
}

/// Coarse classification of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedFormat,
    Decode,
    InvalidConfig,
    EncodeJob,
    Cancelled,
    ResourceExhausted,
    CodecInit,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Error::Decode(_) | Error::Decoder(_) | Error::Ffmpeg(_) => ErrorKind::Decode,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::Encode(_) | Error::EncodeJob { .. } => ErrorKind::EncodeJob,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::CodecInit(_) => ErrorKind::CodecInit,
            Error::Core(_) | Error::Io(_) | Error::Image(_) => ErrorKind::Internal,
        }
    }

    /// Caller-requested or timed-out runs; an expected outcome, not a fault
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    /// Status line shown to presentation layers
    pub fn status_message(&self, stage: Stage) -> String {
        match self {
            Error::Cancelled(reason) => format!("Cancelled during {stage}: {reason}"),
            other => format!("{stage} failed: {other}"),
        }
    }
}
