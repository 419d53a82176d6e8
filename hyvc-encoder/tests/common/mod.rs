//! Synthetic clips and test codecs shared by the integration tests

#![allow(dead_code)]

use hyvc_core::{ArtifactRef, CompressionConfig, CompressionResult, VideoMetadata};
use hyvc_encoder::{
    BuiltinCodec, EncodedPayload, Engine, EngineConfig, FrameCodec, MemorySource, Result,
};
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Gradient background, per-pixel noise and a square moving left to right
pub fn synthetic_clip(width: u32, height: u32, frames: u32) -> Vec<RgbImage> {
    let side = (width.min(height) / 4).max(2);
    (0..frames)
        .map(|i| {
            let mut state = 0x9e37_79b9u32 ^ i.wrapping_mul(0x85eb_ca6b);
            let sx = (i * 5) % width.saturating_sub(side).max(1);
            let sy = height / 3;
            RgbImage::from_fn(width, height, |x, y| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                let noise = (state >> 26) as u8;
                if (sx..sx + side).contains(&x) && (sy..sy + side).contains(&y) {
                    let checker = if (x / 2 + y / 2) % 2 == 0 { 230 } else { 20 };
                    Rgb([checker, 40u8.wrapping_add(noise), 200])
                } else {
                    Rgb([
                        ((x * 255) / width.max(1)) as u8 ^ noise,
                        ((y * 255) / height.max(1)) as u8,
                        (((x + y) * 2) as u8).wrapping_add(noise),
                    ])
                }
            })
        })
        .collect()
}

/// Gradient background and a flat square moving left to right; no noise, so
/// it compresses the way camera footage does
pub fn smooth_clip(width: u32, height: u32, frames: u32) -> Vec<RgbImage> {
    let side = (width.min(height) / 4).max(2);
    (0..frames)
        .map(|i| {
            let sx = (i * 8) % width.saturating_sub(side).max(1);
            let sy = height / 3;
            RgbImage::from_fn(width, height, |x, y| {
                if (sx..sx + side).contains(&x) && (sy..sy + side).contains(&y) {
                    Rgb([220, 60, 40])
                } else {
                    Rgb([
                        ((x * 255) / width.max(1)) as u8,
                        ((y * 255) / height.max(1)) as u8,
                        128,
                    ])
                }
            })
        })
        .collect()
}

/// Metadata as an upload collaborator would report it for raw RGB input
pub fn metadata_for(name: &str, images: &[RgbImage], fps: u32) -> VideoMetadata {
    let (width, height) = images.first().map(|i| i.dimensions()).unwrap_or((0, 0));
    VideoMetadata {
        file_name: name.to_string(),
        file_size: images.iter().map(|i| i.as_raw().len() as u64).sum(),
        duration: images.len() as f64 / fps as f64,
        width,
        height,
        format: "rgb24".to_string(),
    }
}

pub fn engine_config(workers: usize) -> EngineConfig {
    EngineConfig {
        workers,
        ..EngineConfig::default()
    }
}

/// Runs one compression over in-memory frames with the given codec
pub fn compress_with(
    codec: Box<dyn FrameCodec>,
    engine: EngineConfig,
    images: Vec<RgbImage>,
    config: CompressionConfig,
) -> hyvc_encoder::Result<CompressionResult> {
    let metadata = metadata_for("clip.raw", &images, 25);
    let mut source = MemorySource::new(images, 25, 1)?;
    let engine = Engine::initialize(codec, engine)?;
    let run = engine.new_run(config)?;
    run.execute(
        &mut source,
        metadata,
        ArtifactRef::Memory {
            name: "clip.raw".into(),
        },
    )
}

pub fn compress(
    images: Vec<RgbImage>,
    config: CompressionConfig,
) -> hyvc_encoder::Result<CompressionResult> {
    compress_with(Box::new(BuiltinCodec::new()), engine_config(2), images, config)
}

/// Builtin codec that sleeps before every encode
pub struct SlowCodec(pub Duration);

impl FrameCodec for SlowCodec {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn encode(&self, image: &RgbImage, qp: u8) -> Result<EncodedPayload> {
        std::thread::sleep(self.0);
        BuiltinCodec.encode(image, qp)
    }

    fn is_deterministic(&self) -> bool {
        true
    }
}

/// Fails every call whose sequence number is divisible by `period`
pub struct FlakyCodec {
    pub calls: AtomicUsize,
    pub period: usize,
}

impl FlakyCodec {
    pub fn new(period: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            period,
        }
    }
}

impl FrameCodec for FlakyCodec {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn encode(&self, image: &RgbImage, qp: u8) -> Result<EncodedPayload> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call % self.period == 0 {
            return Err(hyvc_encoder::Error::Encode(format!("transient fault on call {call}")));
        }
        BuiltinCodec.encode(image, qp)
    }

    fn is_deterministic(&self) -> bool {
        true
    }
}
