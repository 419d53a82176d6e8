mod common;

use common::{compress, compress_with, engine_config, metadata_for, synthetic_clip, FlakyCodec};
use hyvc_core::{
    ArtifactRef, CompressionConfig, HybridMode, HyvcContainer, Layer, Resolution, Stage,
};
use hyvc_decoder::FrameCompositor;
use hyvc_encoder::{
    BuiltinCodec, Engine, EngineConfig, ErrorKind, Frame, FrameSource, MemorySource, SourceInfo,
};
use std::io;
use std::sync::{Arc, Mutex};

fn config(mode: HybridMode, resolution: Resolution) -> CompressionConfig {
    CompressionConfig::new(mode, resolution)
}

#[test]
fn test_original_resolution_rounds_down_to_even() {
    let result = compress(
        synthetic_clip(97, 55, 4),
        config(HybridMode::Balanced, Resolution::Original),
    )
    .unwrap();

    let meta = &result.compressed_metadata;
    assert_eq!((meta.width, meta.height), (96, 54));
    assert_eq!(meta.file_name, "compressed_clip.hyvc");
    assert_eq!(meta.format, "video/x-hyvc");

    let container = HyvcContainer::read(result.compressed_artifact.bytes()).unwrap();
    assert_eq!((container.header.width, container.header.height), (96, 54));
    assert_eq!(container.frame_count(), 4);
}

#[test]
fn test_preset_scales_preserving_aspect() {
    let result = compress(
        synthetic_clip(640, 360, 2),
        config(HybridMode::Size, Resolution::P240),
    )
    .unwrap();

    let meta = &result.compressed_metadata;
    assert_eq!((meta.width, meta.height), (426, 240));
    // Metrics compare at the original size after upscaling
    assert!(result.quality.psnr > 15.0);
}

#[test]
fn test_ratio_is_original_over_compressed() {
    let result = compress(
        synthetic_clip(64, 48, 5),
        config(HybridMode::Quality, Resolution::Original),
    )
    .unwrap();

    let expected = result.original_metadata.file_size as f64
        / result.compressed_metadata.file_size as f64;
    assert!((result.compression_ratio - expected).abs() < 1e-12);
    assert_eq!(
        result.compressed_metadata.file_size,
        result.compressed_artifact.len()
    );
}

#[test]
fn test_modes_trade_size_for_fidelity() {
    let run = |mode| {
        compress(
            synthetic_clip(96, 64, 6),
            config(mode, Resolution::Original),
        )
        .unwrap()
    };
    let quality = run(HybridMode::Quality);
    let balanced = run(HybridMode::Balanced);
    let size = run(HybridMode::Size);

    let bytes = |r: &hyvc_core::CompressionResult| r.compressed_metadata.file_size;
    assert!(bytes(&quality) >= bytes(&balanced));
    assert!(bytes(&balanced) >= bytes(&size));

    assert!(quality.quality.psnr >= balanced.quality.psnr);
    assert!(balanced.quality.psnr >= size.quality.psnr);
    assert!(quality.quality.ssim >= balanced.quality.ssim);
    assert!(balanced.quality.ssim >= size.quality.ssim);

    assert!(quality.plan.refined_block_count() > balanced.plan.refined_block_count());
    assert_eq!(size.plan.refined_block_count(), 0);
    for r in [&quality, &balanced, &size] {
        assert!((0.0..=1.0).contains(&r.quality.ssim));
    }
}

#[test]
fn test_output_is_byte_identical_across_runs_and_workers() {
    let images = synthetic_clip(80, 48, 6);
    let cfg = config(HybridMode::Quality, Resolution::Original);

    let single = compress_with(
        Box::new(BuiltinCodec::new()),
        engine_config(1),
        images.clone(),
        cfg,
    )
    .unwrap();
    let parallel = compress_with(
        Box::new(BuiltinCodec::new()),
        engine_config(4),
        images.clone(),
        cfg,
    )
    .unwrap();
    let again = compress_with(Box::new(BuiltinCodec::new()), engine_config(4), images, cfg)
        .unwrap();

    assert_eq!(
        single.compressed_artifact.bytes(),
        parallel.compressed_artifact.bytes()
    );
    assert_eq!(
        parallel.compressed_artifact.bytes(),
        again.compressed_artifact.bytes()
    );
}

#[test]
fn test_refinement_patches_are_exact() {
    let images = synthetic_clip(64, 64, 3);
    let result = compress(
        images.clone(),
        config(HybridMode::Quality, Resolution::Original),
    )
    .unwrap();
    assert!(result.plan.refined_block_count() > 0);

    let container = HyvcContainer::read(result.compressed_artifact.bytes()).unwrap();
    let compositor = FrameCompositor::new(container);
    for entry in compositor
        .container()
        .timeline
        .iter()
        .filter(|e| e.layer == Layer::Refinement)
    {
        let asset = compositor.container().get_asset(entry.asset_id).unwrap();
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
fn test_progress_is_monotonic_and_ends_complete() {
    let images = synthetic_clip(64, 48, 8);
    let metadata = metadata_for("clip.raw", &images, 25);
    let mut source = MemorySource::new(images, 25, 1).unwrap();
    let engine = Engine::initialize(Box::new(BuiltinCodec::new()), engine_config(2)).unwrap();
    let run = engine
        .new_run(config(HybridMode::Balanced, Resolution::Original))
        .unwrap();

    let mut watcher = run.status();
    let observer = std::thread::spawn(move || {
        let mut seen = Vec::new();
        loop {
            if let Some(status) = watcher.poll_update() {
                seen.push(status);
            }
            let latest = watcher.snapshot();
            if latest.stage.is_terminal() {
                seen.push(latest);
                return seen;
            }
            std::thread::sleep(std::time::Duration::from_micros(200));
        }
    });

    run.execute(
        &mut source,
        metadata,
        ArtifactRef::Memory {
            name: "clip.raw".into(),
        },
    )
    .unwrap();
    let seen = observer.join().unwrap();

    for pair in seen.windows(2) {
        assert!(pair[0].progress <= pair[1].progress, "{pair:?}");
    }
    for status in &seen {
        assert!(status.progress < 100.0 || status.stage == Stage::Complete);
    }
    let last = seen.last().unwrap();
    assert_eq!(last.stage, Stage::Complete);
    assert_eq!(last.progress, 100.0);
}

#[test]
fn test_transient_codec_faults_are_retried() {
    // Every even call fails; with one worker each job succeeds on its retry
    let result = compress_with(
        Box::new(FlakyCodec::new(2)),
        engine_config(1),
        synthetic_clip(48, 32, 4),
        config(HybridMode::Quality, Resolution::Original),
    )
    .unwrap();
    assert_eq!(result.compressed_metadata.width, 48);
}

#[test]
fn test_persistent_codec_fault_fails_the_run() {
    let images = synthetic_clip(48, 32, 3);
    let metadata = metadata_for("clip.raw", &images, 25);
    let mut source = MemorySource::new(images, 25, 1).unwrap();
    let engine = Engine::initialize(Box::new(FlakyCodec::new(1)), engine_config(2)).unwrap();
    let run = engine
        .new_run(config(HybridMode::Balanced, Resolution::Original))
        .unwrap();
    let watcher = run.status();

    let err = run
        .execute(
            &mut source,
            metadata,
            ArtifactRef::Memory {
                name: "clip.raw".into(),
            },
        )
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::EncodeJob);
    let status = watcher.snapshot();
    assert_eq!(status.stage, Stage::Error);
    assert!(status.message.starts_with("encoding-lossy failed"), "{}", status.message);
    assert!(status.progress < 100.0);
}

#[test]
fn test_out_of_range_override_rejected() {
    let err = compress(
        synthetic_clip(32, 32, 2),
        config(HybridMode::Balanced, Resolution::Original).with_lossy_quality(30),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfig);
}

#[test]
fn test_override_changes_qp_only() {
    let images = synthetic_clip(64, 48, 4);
    let base = config(HybridMode::Balanced, Resolution::Original);
    let plain = compress(images.clone(), base).unwrap();
    let overridden = compress(images, base.with_lossy_quality(28)).unwrap();

    assert_eq!(plain.plan.base_qp(), 23);
    assert_eq!(overridden.plan.base_qp(), 28);
    assert!(overridden.plan.qp_overridden());
    assert_eq!(plain.plan.directives(), overridden.plan.directives());
}

#[test]
fn test_buffer_budget_is_enforced() {
    let engine = EngineConfig {
        max_buffer_bytes: 10_000,
        ..engine_config(1)
    };
    let err = compress_with(
        Box::new(BuiltinCodec::new()),
        engine,
        synthetic_clip(64, 64, 4),
        config(HybridMode::Size, Resolution::Original),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
}

#[test]
fn test_performance_metrics_are_measured() {
    let result = compress(
        synthetic_clip(64, 48, 4),
        config(HybridMode::Balanced, Resolution::Original),
    )
    .unwrap();
    let perf = &result.performance;
    assert!(perf.encoding_time > 0.0);
    assert!(perf.decoding_time > 0.0);
    assert!(perf.memory_usage > 0.0);
    assert!(perf.cpu_usage >= 0.0);
    assert_eq!(result.compressed_metadata.duration, 4.0 / 25.0);
}

#[test]
fn test_artifact_persists_and_decodes() {
    let result = compress(
        synthetic_clip(48, 48, 3),
        config(HybridMode::Quality, Resolution::Original),
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(&result.compressed_artifact.file_name);
    result.compressed_artifact.persist(&path).unwrap();

    let file = std::fs::File::open(&path).unwrap();
    let container = HyvcContainer::read(std::io::BufReader::new(file)).unwrap();
    let compositor = FrameCompositor::new(container);
    let frames: Vec<_> = compositor.frames().collect::<Result<_, _>>().unwrap();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[1].timestamp_ms, 40);
    assert!(frames.iter().all(|f| f.image.dimensions() == (48, 48)));
}

#[test]
fn test_buffer_keeps_only_source_luma_when_scaling() {
    // 426x240 RGB plus 640x360 luma is 537,120 bytes a frame
    let engine = EngineConfig {
        max_buffer_bytes: 1_200_000,
        ..engine_config(1)
    };
    let cfg = config(HybridMode::Size, Resolution::P240);

    let result = compress_with(
        Box::new(BuiltinCodec::new()),
        engine.clone(),
        synthetic_clip(640, 360, 2),
        cfg,
    )
    .unwrap();
    let container = HyvcContainer::read(result.compressed_artifact.bytes()).unwrap();
    assert_eq!(container.frame_count(), 2);

    let err = compress_with(
        Box::new(BuiltinCodec::new()),
        engine,
        synthetic_clip(640, 360, 4),
        cfg,
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
}

/// Memory source that claims to carry audio
struct WithAudio {
    inner: MemorySource,
    info: SourceInfo,
}

impl FrameSource for WithAudio {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn next_frame(&mut self) -> hyvc_encoder::Result<Option<Frame>> {
        self.inner.next_frame()
    }
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_dropped_audio_is_logged() {
    let images = synthetic_clip(32, 32, 2);
    let metadata = metadata_for("clip.raw", &images, 25);
    let inner = MemorySource::new(images, 25, 1).unwrap();
    let info = SourceInfo {
        audio_tracks: 1,
        ..inner.info().clone()
    };
    let mut source = WithAudio { inner, info };

    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .with_writer(move || writer.clone())
        .finish();

    let engine = Engine::initialize(Box::new(BuiltinCodec::new()), engine_config(1)).unwrap();
    let run = engine
        .new_run(config(HybridMode::Size, Resolution::Original))
        .unwrap();
    tracing::subscriber::with_default(subscriber, || {
        run.execute(
            &mut source,
            metadata,
            ArtifactRef::Memory {
                name: "clip.raw".into(),
            },
        )
    })
    .unwrap();

    let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("WARN"), "{logs}");
    assert!(logs.contains("audio is dropped"), "{logs}");
}
