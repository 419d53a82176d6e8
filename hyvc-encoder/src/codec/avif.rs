//! AV1 still-picture codec through ravif

use super::{encode_png, EncodedPayload, FrameCodec, LOSSLESS_QP, MAX_QP};
use crate::{Error, Result};
use hyvc_core::AssetFormat;
use image::{Rgb, RgbImage};
use ravif::{Encoder, Img, RGB8};

/// Encodes base layers as AVIF. Lossless requests fall back to PNG, since
/// AV1 in 4:4:4 RGB is only approximately lossless after colour conversion.
#[derive(Debug, Clone)]
pub struct AvifCodec {
    speed: u8,
    verified: bool,
}

impl AvifCodec {
    /// `speed` follows ravif: 1 is slowest, 10 fastest
    pub fn new(speed: u8) -> Self {
        Self {
            speed: speed.clamp(1, 10),
            verified: false,
        }
    }

    /// Maps a quantization parameter onto ravif's 0-100 quality scale
    fn quality_for(qp: u8) -> f32 {
        100.0 - (qp as f32 * 100.0 / MAX_QP as f32)
    }

    fn encode_avif(&self, image: &RgbImage, qp: u8) -> Result<Vec<u8>> {
        let width = image.width() as usize;
        let height = image.height() as usize;
        let pixels: Vec<RGB8> = image
            .pixels()
            .map(|&Rgb([r, g, b])| RGB8::new(r, g, b))
            .collect();

        // One thread: tile scheduling must not vary the bitstream
        let encoder = Encoder::new()
            .with_quality(Self::quality_for(qp))
            .with_speed(self.speed)
            .with_num_threads(Some(1));

        let encoded = encoder
            .encode_rgb(Img::new(pixels.as_slice(), width, height))
            .map_err(|e| Error::Encode(format!("AVIF encode failed: {e:?}")))?;
        Ok(encoded.avif_file)
    }
}

impl Default for AvifCodec {
    fn default() -> Self {
        Self::new(8)
    }
}

impl FrameCodec for AvifCodec {
    fn name(&self) -> &'static str {
        "avif"
    }

    /// Encodes and decodes a tiny sample so a broken codec build fails up front
    fn initialize(&mut self) -> Result<()> {
        if self.verified {
            return Ok(());
        }
        let sample = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, 128]));
        let data = self
            .encode_avif(&sample, 20)
            .map_err(|e| Error::CodecInit(e.to_string()))?;
        let decoded = hyvc_decoder::decode_payload(AssetFormat::Avif, &data)
            .map_err(|e| Error::CodecInit(format!("AVIF self-test did not decode: {e}")))?;
        if decoded.dimensions() != sample.dimensions() {
            return Err(Error::CodecInit(format!(
                "AVIF self-test decoded as {:?}",
                decoded.dimensions()
            )));
        }
        tracing::debug!(speed = self.speed, "AVIF codec ready");
        self.verified = true;
        Ok(())
    }

    fn encode(&self, image: &RgbImage, qp: u8) -> Result<EncodedPayload> {
        if qp > MAX_QP {
            return Err(Error::InvalidConfig(format!("qp {qp} exceeds {MAX_QP}")));
        }
        if qp == LOSSLESS_QP {
            return encode_png(image);
        }
        let data = self.encode_avif(image, qp)?;
        Ok(EncodedPayload::new(AssetFormat::Avif, data))
    }

    fn is_deterministic(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_mapping() {
        assert_eq!(AvifCodec::quality_for(0), 100.0);
        assert_eq!(AvifCodec::quality_for(MAX_QP), 0.0);
        assert!(AvifCodec::quality_for(18) > AvifCodec::quality_for(28));
    }

    #[test]
    fn test_lossless_request_uses_png() {
        let img = RgbImage::from_fn(8, 8, |x, y| Rgb([x as u8, y as u8, 7]));
        let payload = AvifCodec::default().encode(&img, LOSSLESS_QP).unwrap();
        assert_eq!(payload.format, AssetFormat::Png);
    }

    #[test]
    fn test_speed_is_clamped() {
        assert_eq!(AvifCodec::new(0).speed, 1);
        assert_eq!(AvifCodec::new(99).speed, 10);
    }
}
