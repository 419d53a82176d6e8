//! Engine and per-run session objects

use crate::assembler::{self, RunOutputs};
use crate::cancel::CancelToken;
use crate::codec::{AvifCodec, BuiltinCodec, FrameCodec, VideoCodec};
use crate::config::{CodecKind, EngineConfig};
use crate::frame_source::FrameSource;
use crate::metrics::MetricsEngine;
use crate::orchestrator::{EncodeOutput, Orchestrator};
use crate::status::{StatusCell, StatusWatcher};
use crate::{Error, Result};
use hyvc_core::{ArtifactRef, CompressionConfig, CompressionResult, Stage, VideoMetadata};
use std::sync::Arc;
use std::time::Duration;

/// An initialized codec plus engine settings. Runs can only be started from
/// an engine, so no run ever sees an uninitialized codec.
///
/// With a [`VideoCodec`] the base layer is one inter-coded stream and the
/// still codec only encodes refinement patches.
pub struct Engine {
    codec: Arc<dyn FrameCodec>,
    stream: Option<Arc<VideoCodec>>,
    config: EngineConfig,
}

impl Engine {
    /// Validates `config` and performs the codec's one-time initialization
    pub fn initialize(mut codec: Box<dyn FrameCodec>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        codec.initialize().map_err(|e| match e {
            Error::CodecInit(_) => e,
            other => Error::CodecInit(format!("{}: {other}", codec.name())),
        })?;
        tracing::info!(
            codec = codec.name(),
            deterministic = codec.is_deterministic(),
            workers = config.effective_workers(),
            "engine initialized"
        );
        Ok(Self {
            codec: Arc::from(codec),
            stream: None,
            config,
        })
    }

    /// Engine whose base layer goes through a video encoder
    pub fn with_video(mut video: VideoCodec, config: EngineConfig) -> Result<Self> {
        let mut engine = Self::initialize(Box::new(BuiltinCodec::new()), config)?;
        video.initialize().map_err(|e| match e {
            Error::CodecInit(_) => e,
            other => Error::CodecInit(format!("{}: {other}", video.name())),
        })?;
        tracing::info!(
            encoder = video.name(),
            deterministic = video.is_deterministic(),
            "video base layer enabled"
        );
        engine.stream = Some(Arc::new(video));
        Ok(engine)
    }

    /// Initializes the codec named in `config`
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let codec: Box<dyn FrameCodec> = match config.codec {
            CodecKind::Video => return Self::with_video(VideoCodec::new(), config),
            CodecKind::Builtin => Box::new(BuiltinCodec::new()),
            CodecKind::Avif => Box::new(AvifCodec::new(config.avif_speed)),
        };
        Self::initialize(codec, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Name of the codec that encodes the base layer
    pub fn codec_name(&self) -> &'static str {
        match &self.stream {
            Some(video) => video.name(),
            None => self.codec.name(),
        }
    }

    /// Starts a fresh run with its own status, cancellation token and workers
    pub fn new_run(&self, config: CompressionConfig) -> Result<CompressionRun> {
        let workers = self.config.effective_workers();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("hyvc-worker-{i}"))
            .build()
            .map_err(|e| Error::ResourceExhausted(format!("worker pool: {e}")))?;

        Ok(CompressionRun {
            codec: Arc::clone(&self.codec),
            stream: self.stream.clone(),
            engine: self.config.clone(),
            config,
            status: StatusCell::new(),
            cancel: CancelToken::new(),
            pool,
        })
    }
}

/// One compression run. Consumed by [`execute`](Self::execute); status
/// watchers and cancel tokens taken beforehand stay usable throughout.
pub struct CompressionRun {
    codec: Arc<dyn FrameCodec>,
    stream: Option<Arc<VideoCodec>>,
    engine: EngineConfig,
    config: CompressionConfig,
    status: StatusCell,
    cancel: CancelToken,
    pool: rayon::ThreadPool,
}

impl CompressionRun {
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// A reader of this run's status
    pub fn status(&self) -> StatusWatcher {
        self.status.watch()
    }

    /// Token that cancels this run from any thread
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Compresses `source`. `original` is the caller's authoritative metadata
    /// for the input; `artifact` is handed back untouched in the result.
    pub fn execute(
        self,
        source: &mut dyn FrameSource,
        original: VideoMetadata,
        artifact: ArtifactRef,
    ) -> Result<CompressionResult> {
        if let Some(secs) = self.engine.timeout_secs {
            self.cancel.arm_timeout(Duration::from_secs(secs));
        }
        tracing::info!(
            input = %original.file_name,
            mode = %self.config.hybrid_mode,
            resolution = %self.config.target_resolution,
            codec = self.stream.as_ref().map_or(self.codec.name(), |v| v.name()),
            "compression started"
        );

        let mut orchestrator = Orchestrator::new(
            Arc::clone(&self.codec),
            self.stream.clone(),
            &self.engine,
            &self.pool,
            &self.status,
            &self.cancel,
        );

        let outcome = self
            .cancel
            .check()
            .and_then(|_| orchestrator.run(source, &self.config))
            .and_then(|output| self.finish(output, original, artifact));

        match outcome {
            Ok(result) => {
                let message = format!(
                    "Complete: {:.2}x, PSNR {:.2} dB, SSIM {:.4}",
                    result.compression_ratio, result.quality.psnr, result.quality.ssim
                );
                tracing::info!(
                    ratio = result.compression_ratio,
                    psnr = result.quality.psnr,
                    ssim = result.quality.ssim,
                    bytes = result.compressed_metadata.file_size,
                    "compression complete"
                );
                self.status.publish(Stage::Complete, 100.0, message, None);
                Ok(result)
            }
            Err(e) => {
                let stage = match orchestrator.stage() {
                    Stage::Idle => Stage::Analyzing,
                    stage => stage,
                };
                let message = e.status_message(stage);
                if e.is_cancelled() {
                    tracing::warn!(stage = %stage, "{message}");
                    self.status.fail(Stage::Cancelled, message);
                } else {
                    tracing::error!(stage = %stage, error = %e, "compression failed");
                    self.status.fail(Stage::Error, message);
                }
                Err(e)
            }
        }
    }

    /// Measurement and assembly, still within the finalizing stage. A cancel
    /// that lands here still fails the run.
    fn finish(
        &self,
        output: EncodeOutput,
        original: VideoMetadata,
        artifact: ArtifactRef,
    ) -> Result<CompressionResult> {
        self.status.publish(Stage::Finalizing, 92.0, "Measuring quality", None);
        let quality = MetricsEngine::new().measure(
            &output.originals,
            &output.container_bytes,
            &self.cancel,
        )?;

        self.cancel.check()?;
        self.status.publish(Stage::Finalizing, 98.0, "Assembling result", None);
        let result = assembler::assemble(RunOutputs {
            original_metadata: original,
            original_artifact: artifact,
            plan: output.plan,
            container_bytes: output.container_bytes,
            duration: output.duration_ms as f64 / 1000.0,
            quality,
            encoding: output.encoding,
        });
        self.cancel.check()?;
        Ok(result)
    }
}
