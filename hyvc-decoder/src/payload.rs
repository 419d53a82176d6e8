//! Asset payload decoding

use crate::{Error, Result};
use hyvc_core::AssetFormat;
use image::{ImageFormat, RgbImage};

/// Decodes a still asset payload into an RGB image buffer. Stream assets hold
/// many pictures and go through [`crate::StreamDecoder`] instead.
pub fn decode_payload(format: AssetFormat, data: &[u8]) -> Result<RgbImage> {
    match format {
        AssetFormat::Png => decode_png(data),
        AssetFormat::Avif => decode_avif(data),
        AssetFormat::Stream => Err(Error::UnsupportedStream(
            "stream payloads have no single picture".into(),
        )),
    }
}

fn decode_png(data: &[u8]) -> Result<RgbImage> {
    let img = image::load_from_memory_with_format(data, ImageFormat::Png)?;
    Ok(img.to_rgb8())
}

fn decode_avif(data: &[u8]) -> Result<RgbImage> {
    let img = libavif_image::read(data).map_err(|e| Error::AvifDecode(format!("{:?}", e)))?;
    Ok(img.to_rgb8())
}
