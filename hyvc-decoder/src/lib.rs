//! HYVC Decoder Library
//!
//! This library decodes HYVC streams back into frames: each frame is its lossy
//! base image with the lossless refinement patches copied on top. The base
//! is either one still per frame or a shared inter-coded stream.

pub mod frame_compositor;
pub mod payload;
pub mod stream;

pub use frame_compositor::{DecodedFrame, FrameCompositor};
pub use payload::decode_payload;
pub use stream::{copy_rgb24, init_ffmpeg, StreamDecoder};

/// Result type for hyvc-decoder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for hyvc-decoder operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HYVC core error: {0}")]
    Core(#[from] hyvc_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("AVIF decode error: {0}")]
    AvifDecode(String),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),

    #[error("Unsupported base stream: {0}")]
    UnsupportedStream(String),

    #[error("Asset not found: {0}")]
    AssetNotFound(u32),

    #[error("Frame {0} is not in the stream")]
    FrameOutOfRange(u32),

    #[error("No frame is shown at {0} ms")]
    NoFrameAt(u64),

    #[error("Asset {asset_id} decoded to {actual:?}, header says {expected:?}")]
    SizeMismatch {
        asset_id: u32,
        expected: (u32, u32),
        actual: (u32, u32),
    },
}
