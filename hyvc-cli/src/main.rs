//! HYVC CLI Tool
//!
//! Command-line interface for compressing videos into hybrid HYVC streams
//! and for inspecting and decoding them.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hyvc_core::{
    ArtifactRef, AssetFormat, CompressionConfig, CompressionResult, HybridMode, HyvcContainer,
    Layer, Resolution, VideoStream,
};
use hyvc_decoder::FrameCompositor;
use hyvc_encoder::progress::format_duration;
use hyvc_encoder::{CodecKind, Engine, EngineConfig, StatusWatcher, VideoReader};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hyvc")]
#[command(about = "HYVC - region-aware hybrid lossy/lossless video compression")]
#[command(version)]
struct Cli {
    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a video file to HYVC
    Compress {
        /// Input video file path
        input: PathBuf,

        /// Output HYVC file path
        #[arg(short, long)]
        output: PathBuf,

        /// Hybrid mode: quality, balanced or size
        #[arg(long, default_value = "balanced")]
        mode: HybridMode,

        /// Base-layer quantization override (18-28)
        #[arg(long)]
        crf: Option<u8>,

        /// Target resolution preset, or "original"
        #[arg(long, default_value = "original")]
        resolution: Resolution,

        /// Codec for the base layer: video (default), builtin or avif
        #[arg(long)]
        codec: Option<CodecKind>,

        /// Worker threads (0 = one per CPU)
        #[arg(long)]
        workers: Option<usize>,

        /// Cancel the run after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Engine configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Also write the result as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Decode a HYVC file to PNG frames
    Decode {
        /// Input HYVC file path
        input: PathBuf,

        /// Output directory, or file path with --frame
        #[arg(short, long)]
        output: PathBuf,

        /// Extract a single frame by index
        #[arg(long)]
        frame: Option<u32>,
    },

    /// Show HYVC file information
    Info {
        /// Input HYVC file path
        input: PathBuf,
    },

    /// List resolution presets and mode defaults
    Presets,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "hyvc=debug" } else { "hyvc=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Compress {
            input,
            output,
            mode,
            crf,
            resolution,
            codec,
            workers,
            timeout,
            config,
            json,
        } => {
            let mut engine_config = match config {
                Some(path) => EngineConfig::from_toml_file(&path)
                    .with_context(|| format!("Failed to load {}", path.display()))?,
                None => EngineConfig::default(),
            };
            if let Some(codec) = codec {
                engine_config.codec = codec;
            }
            if let Some(workers) = workers {
                engine_config.workers = workers;
            }
            if timeout.is_some() {
                engine_config.timeout_secs = timeout;
            }

            let mut compression = CompressionConfig::new(mode, resolution);
            if let Some(crf) = crf {
                compression = compression.with_lossy_quality(crf);
            }
            compress_video(&input, &output, engine_config, compression, json.as_deref())?
        }

        Commands::Decode {
            input,
            output,
            frame,
        } => decode_video(&input, &output, frame)?,

        Commands::Info { input } => print_info(&read_container(&input)?),

        Commands::Presets => print_presets(),
    }

    Ok(())
}

fn compress_video(
    input: &Path,
    output: &Path,
    engine_config: EngineConfig,
    config: CompressionConfig,
    json: Option<&Path>,
) -> Result<()> {
    let mut reader = VideoReader::open(input)
        .with_context(|| format!("Failed to open video file {}", input.display()))?;
    let metadata = reader
        .source_metadata(input)
        .context("Failed to read input metadata")?;

    println!("Compressing: {}", input.display());
    println!(
        "Input: {}x{}, {:.2}s, {} bytes ({})",
        metadata.width, metadata.height, metadata.duration, metadata.file_size, metadata.format
    );

    tracing::debug!(?engine_config, ?config, "starting compression");
    let engine = Engine::from_config(engine_config).context("Failed to initialize codec")?;
    let run = engine.new_run(config).context("Failed to start run")?;
    let progress = spawn_progress_bar(run.status())?;

    let outcome = run.execute(
        &mut reader,
        metadata,
        ArtifactRef::File {
            path: input.to_path_buf(),
        },
    );
    // The run has published a terminal status either way
    let _ = progress.join();

    let result = match outcome {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => bail!("Compression cancelled: {e}"),
        Err(e) => return Err(e).context("Compression failed"),
    };

    result
        .compressed_artifact
        .persist(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    if let Some(path) = json {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, &result).context("Failed to write JSON result")?;
    }

    print_summary(&result, output);
    Ok(())
}

/// Mirrors the run's status onto a progress bar until the run ends
fn spawn_progress_bar(mut watcher: StatusWatcher) -> Result<JoinHandle<()>> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}")?.progress_chars("#>-"),
    );

    Ok(std::thread::spawn(move || loop {
        if let Some(status) = watcher.poll_update() {
            bar.set_position(status.progress.floor() as u64);
            let message = match status.estimated_time_remaining {
                Some(eta) => format!(
                    "[{}] {} (ETA {})",
                    status.stage,
                    status.message,
                    format_duration(eta)
                ),
                None => format!("[{}] {}", status.stage, status.message),
            };
            bar.set_message(message);
        }
        let latest = watcher.snapshot();
        if latest.stage.is_terminal() {
            bar.set_position(latest.progress.floor() as u64);
            bar.finish_with_message(format!("[{}] {}", latest.stage, latest.message));
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }))
}

fn print_summary(result: &CompressionResult, output: &Path) {
    let original = &result.original_metadata;
    let compressed = &result.compressed_metadata;
    let perf = &result.performance;

    println!("\n=== Compression Result ===");
    println!("Output: {}", output.display());
    println!(
        "Mode: {} (QP {}{})",
        result.plan.mode().label(),
        result.plan.base_qp(),
        if result.plan.qp_overridden() { ", manual" } else { "" }
    );
    println!(
        "Resolution: {}x{} -> {}x{}",
        original.width, original.height, compressed.width, compressed.height
    );
    println!(
        "Size: {} -> {} bytes (ratio {:.2}x)",
        original.file_size, compressed.file_size, result.compression_ratio
    );
    println!("Refined blocks: {}", result.plan.refined_block_count());
    println!("PSNR: {:.2} dB", result.quality.psnr);
    println!("SSIM: {:.4}", result.quality.ssim);
    println!(
        "Encoding: {}, decoding: {}",
        format_duration(perf.encoding_time),
        format_duration(perf.decoding_time)
    );
    println!("CPU: {:.0}%, peak memory: {:.1} MiB", perf.cpu_usage, perf.memory_usage);
}

fn read_container(input: &Path) -> Result<HyvcContainer> {
    let file = File::open(input)
        .with_context(|| format!("Failed to open HYVC file {}", input.display()))?;
    HyvcContainer::read(BufReader::new(file)).context("Failed to read HYVC container")
}

fn decode_video(input: &Path, output: &Path, frame: Option<u32>) -> Result<()> {
    println!("Decoding HYVC file: {}", input.display());
    let compositor = FrameCompositor::new(read_container(input)?);

    if let Some(index) = frame {
        let image = compositor
            .render_frame(index)
            .with_context(|| format!("Failed to render frame {index}"))?;
        image.save(output).context("Failed to save frame")?;
        println!("Saved frame {} to {}", index, output.display());
        return Ok(());
    }

    std::fs::create_dir_all(output).context("Failed to create output directory")?;
    let frame_count = compositor.container().frame_count();
    println!("Extracting {} frames to {}", frame_count, output.display());

    for (i, decoded) in compositor.frames().enumerate() {
        let decoded = decoded.context("Failed to render frame")?;
        let frame_path = output.join(format!("frame_{:06}.png", decoded.index));
        decoded.image.save(&frame_path).context("Failed to save frame")?;

        if (i + 1) % 10 == 0 {
            println!("Extracted {} / {} frames", i + 1, frame_count);
        }
    }

    println!("Successfully extracted all frames");
    Ok(())
}

fn print_info(container: &HyvcContainer) {
    let header = &container.header;
    println!("=== HYVC File Information ===");
    println!("Version: {}", header.version);
    println!("Resolution: {}x{}", header.width, header.height);
    println!(
        "Frame rate: {}/{} ({:.2} fps)",
        header.fps_num,
        header.fps_den,
        container.fps()
    );
    println!(
        "Duration: {} ms ({:.2} seconds)",
        header.duration_ms,
        header.duration_ms as f64 / 1000.0
    );
    println!("Base QP: {}", header.base_qp);
    println!("Frames: {}", container.frame_count());
    println!("Assets: {}", container.assets.len());
    for asset in container.assets.iter().filter(|a| a.format == AssetFormat::Stream) {
        match VideoStream::from_bytes(&asset.data) {
            Ok(stream) => println!(
                "Base stream: {} {}x{}, {} packets",
                stream.format,
                stream.width,
                stream.height,
                stream.packets.len()
            ),
            Err(e) => println!("Base stream: unreadable ({e})"),
        }
    }

    let (base, refinement) = container.layer_sizes();
    println!("Base layer: {} bytes ({:.2} KB)", base, base as f64 / 1024.0);
    println!(
        "Refinement layer: {} bytes ({:.2} KB)",
        refinement,
        refinement as f64 / 1024.0
    );

    let patches = container
        .timeline
        .iter()
        .filter(|e| e.layer == Layer::Refinement)
        .count();
    println!("Refinement patches: {patches}");

    println!("\n=== Timeline (first 10 entries) ===");
    for (i, entry) in container.timeline.iter().take(10).enumerate() {
        println!(
            "  [{}] frame {} asset {} {}ms-{}ms at ({}, {}) {:?}",
            i,
            entry.frame_index,
            entry.asset_id,
            entry.start_time_ms,
            entry.end_time_ms,
            entry.position_x,
            entry.position_y,
            entry.layer
        );
    }
    if container.timeline.len() > 10 {
        println!("  ... and {} more entries", container.timeline.len() - 10);
    }
}

fn print_presets() {
    println!("Resolutions:");
    for preset in Resolution::ALL {
        match preset.bounding_box() {
            Some((w, h)) => println!("  {:<9} fits within {}x{}", preset.as_str(), w, h),
            None => println!("  {:<9} source size, rounded down to even", preset.as_str()),
        }
    }

    let policy = EngineConfig::default().policy;
    println!("\nModes (default engine policy):");
    for mode in HybridMode::ALL {
        let p = policy.get(mode);
        println!(
            "  {:<9} QP {:>2}, lossless refinement of top {:.0}% of blocks",
            mode.as_str(),
            p.qp,
            p.refine_fraction * 100.0
        );
    }
}
