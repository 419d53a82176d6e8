//! Deterministic reference codec: uniform quantization followed by PNG

use super::{encode_png, EncodedPayload, FrameCodec, LOSSLESS_QP, MAX_QP};
use crate::{Error, Result};
use image::RgbImage;

/// Quantizer step for a parameter; doubles every 6 steps, as in H.264/AV1
fn step_size(qp: u8) -> f64 {
    0.625 * 2f64.powf(qp as f64 / 6.0)
}

/// Maps every 8-bit sample to the centre of its quantizer bin
fn quant_table(qp: u8) -> [u8; 256] {
    let step = step_size(qp);
    let mut lut = [0u8; 256];
    for (v, out) in lut.iter_mut().enumerate() {
        let level = (v as f64 / step).round();
        *out = (level * step).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Codec with no external dependencies beyond PNG. Coarser quantization
/// leaves fewer distinct sample values, which the PNG filters then compress.
#[derive(Debug, Default, Clone)]
pub struct BuiltinCodec;

impl BuiltinCodec {
    pub fn new() -> Self {
        Self
    }
}

impl FrameCodec for BuiltinCodec {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn encode(&self, image: &RgbImage, qp: u8) -> Result<EncodedPayload> {
        if qp > MAX_QP {
            return Err(Error::InvalidConfig(format!("qp {qp} exceeds {MAX_QP}")));
        }
        if qp == LOSSLESS_QP {
            return encode_png(image);
        }

        let lut = quant_table(qp);
        let mut quantized = image.clone();
        for sample in quantized.iter_mut() {
            *sample = lut[*sample as usize];
        }
        encode_png(&quantized)
    }

    fn is_deterministic(&self) -> bool {
        true
    }
}
