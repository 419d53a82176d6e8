//! Codec primitives
//!
//! The orchestrator never touches a bitstream itself: it hands a picture and
//! a quantization parameter to a [`FrameCodec`] and stores whatever payload
//! comes back as a container asset. A [`VideoCodec`] takes the whole base
//! layer at once instead and yields a single stream asset.

mod avif;
mod builtin;
mod video;

pub use avif::AvifCodec;
pub use builtin::BuiltinCodec;
pub use video::{crf_for, StreamEncoder, VideoCodec};

use crate::Result;
use hyvc_core::AssetFormat;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, RgbImage};

/// Quantization parameter that requests an exact, lossless payload
pub const LOSSLESS_QP: u8 = 0;

/// Largest quantization parameter a codec must accept
pub const MAX_QP: u8 = 51;

/// Bytes produced by one codec call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub format: AssetFormat,
    pub data: Vec<u8>,
}

impl EncodedPayload {
    pub fn new(format: AssetFormat, data: Vec<u8>) -> Self {
        Self { format, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A still-picture codec the orchestrator can drive from worker threads.
///
/// `encode` with [`LOSSLESS_QP`] must decode back to exactly the input
/// pixels. Higher values trade fidelity for size; at a fixed input the
/// payload size must not grow as the parameter rises.
pub trait FrameCodec: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-time setup, called once by the engine before any run
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn encode(&self, image: &RgbImage, qp: u8) -> Result<EncodedPayload>;

    /// Whether identical input always yields identical bytes
    fn is_deterministic(&self) -> bool;
}

/// Lossless PNG; used for refinement patches by every codec
pub fn encode_png(image: &RgbImage) -> Result<EncodedPayload> {
    let mut data = Vec::new();
    PngEncoder::new_with_quality(&mut data, CompressionType::Default, FilterType::Adaptive)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )?;
    Ok(EncodedPayload::new(AssetFormat::Png, data))
}
