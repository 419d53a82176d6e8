mod common;

use common::{engine_config, smooth_clip};
use hyvc_core::{
    ArtifactRef, AssetFormat, CompressionConfig, CompressionResult, HybridMode, HyvcContainer,
    Layer, Resolution, VideoMetadata,
};
use hyvc_decoder::FrameCompositor;
use hyvc_encoder::{Engine, ErrorKind, MemorySource, VideoCodec};
use image::RgbImage;

const FPS: u32 = 30;

/// Engine with a video base layer, or `None` when FFmpeg offers no usable encoder
fn video_engine() -> Option<Engine> {
    match Engine::with_video(VideoCodec::new(), engine_config(2)) {
        Ok(engine) => Some(engine),
        Err(e) if e.kind() == ErrorKind::CodecInit => {
            eprintln!("skipping: {e}");
            None
        }
        Err(e) => panic!("unexpected engine error: {e}"),
    }
}

/// Size of the clip as a high-quality H.264 upload would be
fn upload_size(images: &[RgbImage]) -> u64 {
    let mut codec = VideoCodec::new();
    codec.initialize().unwrap();
    let (width, height) = images[0].dimensions();
    let mut encoder = codec.begin(width, height, FPS, 1, 18).unwrap();
    for image in images {
        encoder.push(image).unwrap();
    }
    encoder.finish().unwrap().payload_size() as u64
}

fn run(engine: &Engine, images: Vec<RgbImage>, config: CompressionConfig) -> CompressionResult {
    let (width, height) = images[0].dimensions();
    let metadata = VideoMetadata {
        file_name: "upload.mp4".into(),
        file_size: upload_size(&images),
        duration: images.len() as f64 / FPS as f64,
        width,
        height,
        format: "mp4".into(),
    };
    let mut source = MemorySource::new(images, FPS, 1).unwrap();
    engine
        .new_run(config)
        .unwrap()
        .execute(
            &mut source,
            metadata,
            ArtifactRef::Memory {
                name: "upload.mp4".into(),
            },
        )
        .unwrap()
}

#[test]
fn test_downscaled_stream_is_smaller_than_upload() {
    let Some(engine) = video_engine() else { return };
    let result = run(
        &engine,
        smooth_clip(1920, 1080, 12),
        CompressionConfig::new(HybridMode::Size, Resolution::P720),
    );

    let meta = &result.compressed_metadata;
    assert_eq!((meta.width, meta.height), (1280, 720));
    assert!(
        result.compression_ratio > 1.0,
        "ratio {} ({} -> {} bytes)",
        result.compression_ratio,
        result.original_metadata.file_size,
        meta.file_size
    );
    assert!(result.quality.psnr > 25.0, "psnr {}", result.quality.psnr);
    assert!(result.quality.ssim > 0.8, "ssim {}", result.quality.ssim);

    let container = HyvcContainer::read(result.compressed_artifact.bytes()).unwrap();
    assert_eq!(container.assets.len(), 1);
    assert_eq!(container.assets[0].format, AssetFormat::Stream);
    assert_eq!(container.frame_count(), 12);
    assert!(container.timeline.iter().all(|e| e.asset_id == 0));
}

#[test]
fn test_random_access_matches_sequential_decode() {
    let Some(engine) = video_engine() else { return };
    let result = run(
        &engine,
        smooth_clip(320, 240, 10),
        CompressionConfig::new(HybridMode::Balanced, Resolution::Original),
    );

    let container = HyvcContainer::read(result.compressed_artifact.bytes()).unwrap();
    let compositor = FrameCompositor::new(container);
    let frames: Vec<_> = compositor.frames().collect::<Result<_, _>>().unwrap();
    assert_eq!(frames.len(), 10);
    assert_eq!(frames[3].timestamp_ms, 100);

    for index in [0u32, 6, 9, 2] {
        let single = compositor.render_frame(index).unwrap();
        assert_eq!(single, frames[index as usize].image, "frame {index}");
    }
}

#[test]
fn test_patches_over_stream_are_exact() {
    let Some(engine) = video_engine() else { return };
    let images = smooth_clip(320, 240, 6);
    let result = run(
        &engine,
        images.clone(),
        CompressionConfig::new(HybridMode::Quality, Resolution::Original),
    );
    assert!(result.plan.refined_block_count() > 0);

    let container = HyvcContainer::read(result.compressed_artifact.bytes()).unwrap();
    assert_eq!(container.assets[0].format, AssetFormat::Stream);
    let compositor = FrameCompositor::new(container);
    for entry in compositor
        .container()
        .timeline
        .iter()
        .filter(|e| e.layer == Layer::Refinement)
    {
        let asset = compositor.container().get_asset(entry.asset_id).unwrap();
        assert_eq!(asset.format, AssetFormat::Png);
        let frame = compositor.render_frame(entry.frame_index).unwrap();
        let source = &images[entry.frame_index as usize];
        for y in 0..asset.height {
            for x in 0..asset.width {
                let (px, py) = (entry.position_x + x, entry.position_y + y);
                assert_eq!(frame.get_pixel(px, py), source.get_pixel(px, py));
            }
        }
    }
}

#[test]
fn test_x264_output_is_reproducible() {
    let Some(engine) = video_engine() else { return };
    if engine.codec_name() != "libx264" {
        eprintln!("skipping: {} is not bit-exact", engine.codec_name());
        return;
    }
    let config = CompressionConfig::new(HybridMode::Balanced, Resolution::Original);
    let first = run(&engine, smooth_clip(160, 96, 8), config);
    let second = run(&engine, smooth_clip(160, 96, 8), config);
    assert_eq!(
        first.compressed_artifact.bytes(),
        second.compressed_artifact.bytes()
    );
}
