//! Encode orchestration
//!
//! A run walks `analyzing -> encoding-lossy -> encoding-lossless ->
//! finalizing`. Frames are pulled from the source once, scaled to the plan's
//! resolution and scored. The scaled picture is kept for encoding; of the
//! unscaled source only the luma plane survives, as the metrics reference.
//!
//! With a video codec the base layer is one sequential stream encode.
//! Otherwise, and always for refinement patches, jobs fan out to a bounded
//! worker pool; results are keyed by `(frame, layer, y, x)` and merged only
//! after the stage's last job has returned, so completion order never shows
//! up in the output bytes.

use crate::cancel::CancelToken;
use crate::codec::{EncodedPayload, FrameCodec, VideoCodec, LOSSLESS_QP};
use crate::config::EngineConfig;
use crate::frame::{crop, resize_to, Frame, LumaFrame};
use crate::frame_source::{FrameSource, SourceInfo};
use crate::policy::{HybridPolicy, ImportanceStats};
use crate::progress::{stage_span, ProgressTracker};
use crate::region_analyzer::RegionAnalyzer;
use crate::resources::{ResourceReport, ResourceSampler};
use crate::status::StatusCell;
use crate::{Error, Result};
use hyvc_core::{
    Asset, AssetFormat, CompressionConfig, Dimensions, EncodingPlan, HyvcContainer, HyvcHeader,
    Layer, Stage, TimelineEntry, VideoStream,
};
use image::RgbImage;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};

/// Identifies one encode job and orders its output in the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobKey {
    pub frame: u32,
    pub layer: Layer,
    pub y: u32,
    pub x: u32,
}

impl JobKey {
    pub fn base(frame: u32) -> Self {
        Self {
            frame,
            layer: Layer::Base,
            y: 0,
            x: 0,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.layer {
            Layer::Base => write!(f, "frame {} base", self.frame),
            Layer::Refinement => write!(f, "frame {} patch at ({}, {})", self.frame, self.x, self.y),
        }
    }
}

/// One unit of codec work; owns its input picture
struct EncodeJob {
    key: JobKey,
    image: RgbImage,
    qp: u8,
}

/// Output of a finished job, waiting for the merge step
struct EncodedPart {
    width: u32,
    height: u32,
    payload: EncodedPayload,
}

/// Base layer as it comes out of the lossy stage
enum BaseLayer {
    /// One still per frame
    Frames(BTreeMap<JobKey, EncodedPart>),
    /// One stream shared by every frame
    Stream(EncodedPart),
}

/// A source frame after analysis
struct Ingested {
    index: u32,
    timestamp_ms: u64,
    /// Picture at the plan's resolution
    picture: RgbImage,
    /// Source luma, kept only when the plan rescales
    reference: Option<LumaFrame>,
}

impl Ingested {
    fn buffer_size(&self) -> u64 {
        self.picture.as_raw().len() as u64 + self.reference.as_ref().map_or(0, |r| r.buffer_size())
    }

    /// Luma at source resolution
    fn into_reference(self) -> LumaFrame {
        match self.reference {
            Some(reference) => reference,
            None => LumaFrame::from_image(self.index, self.timestamp_ms, &self.picture),
        }
    }
}

/// Everything a finished orchestration hands on to metrics and assembly
#[derive(Debug)]
pub struct EncodeOutput {
    pub plan: EncodingPlan,
    pub source_info: SourceInfo,
    /// Source luma planes, unscaled, in stream order
    pub originals: Vec<LumaFrame>,
    /// Serialized `.hyvc` stream
    pub container_bytes: Vec<u8>,
    /// Playback length of the stream
    pub duration_ms: u64,
    /// Analysis through serialization
    pub encoding: ResourceReport,
}

/// Horizontal runs of adjacent flagged blocks in the same block row, as pixel
/// rectangles `(x, y, width, height)` clipped to the frame
pub fn refinement_rects(plan: &EncodingPlan, frame_index: u32) -> Vec<(u32, u32, u32, u32)> {
    let Dimensions { width, height } = plan.dimensions();
    let bs = plan.block_size();
    let mut rects: Vec<(u32, u32, u32, u32)> = Vec::new();
    let mut last: Option<(u32, u32)> = None;

    for block in plan.refined_blocks(frame_index) {
        let (x, y, w, h) = block.pixel_rect(bs, width, height);
        if w == 0 || h == 0 {
            continue;
        }
        match (last, rects.last_mut()) {
            (Some((row, col)), Some(rect)) if row == block.row && col + 1 == block.col => {
                rect.2 += w;
            }
            _ => rects.push((x, y, w, h)),
        }
        last = Some((block.row, block.col));
    }
    rects
}

/// Encodes a job, retrying once with identical parameters
fn encode_with_retry(codec: &dyn FrameCodec, job: &EncodeJob) -> Result<EncodedPayload> {
    let attempt = || {
        panic::catch_unwind(AssertUnwindSafe(|| codec.encode(&job.image, job.qp))).unwrap_or_else(
            |_| Err(Error::Encode(format!("{} codec panicked", codec.name()))),
        )
    };

    match attempt() {
        Ok(payload) => Ok(payload),
        Err(first) => {
            tracing::warn!(job = %job.key, error = %first, "encode job failed, retrying once");
            attempt().map_err(|second| Error::EncodeJob {
                job: job.key.to_string(),
                reason: second.to_string(),
            })
        }
    }
}

/// Drives one compression run over a frame source
pub struct Orchestrator<'a> {
    codec: Arc<dyn FrameCodec>,
    stream: Option<Arc<VideoCodec>>,
    engine: &'a EngineConfig,
    pool: &'a rayon::ThreadPool,
    status: &'a StatusCell,
    cancel: &'a CancelToken,
    stage: Stage,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        codec: Arc<dyn FrameCodec>,
        stream: Option<Arc<VideoCodec>>,
        engine: &'a EngineConfig,
        pool: &'a rayon::ThreadPool,
        status: &'a StatusCell,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            codec,
            stream,
            engine,
            pool,
            status,
            cancel,
            stage: Stage::Idle,
        }
    }

    /// Stage the run is in, or failed in
    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, stage: Stage, message: &str) {
        self.stage = stage;
        tracing::info!(stage = %stage, "{message}");
        self.status.publish(stage, stage_span(stage).0, message, None);
    }

    fn report(&self, tracker: &ProgressTracker, label: &str) {
        self.status.publish(
            tracker.stage(),
            tracker.overall(),
            tracker.message(label),
            tracker.eta_secs(),
        );
    }

    /// Runs every stage up to and including container serialization
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        config: &CompressionConfig,
    ) -> Result<EncodeOutput> {
        let sampler = ResourceSampler::start();
        let source_info = source.info().clone();
        if source_info.audio_tracks > 0 {
            tracing::warn!(
                tracks = source_info.audio_tracks,
                "input has audio; the output carries video only and audio is dropped"
            );
        }
        let policy = HybridPolicy::new(self.engine.policy.clone(), self.engine.analyzer.block_size);

        // Reject bad settings before touching any frame
        let dimensions =
            HybridPolicy::resolve_dimensions(source_info.dimensions(), config.target_resolution)?;
        policy.resolve_qp(config)?;

        self.enter(Stage::Analyzing, "Analyzing regions");
        let (frames, stats) = self.ingest(source, dimensions)?;
        let plan = policy.plan(config, dimensions, &stats)?;
        tracing::info!(
            frames = frames.len(),
            width = dimensions.width,
            height = dimensions.height,
            base_qp = plan.base_qp(),
            refined_blocks = plan.refined_block_count(),
            mean_importance = stats.mean_score(),
            "analysis complete"
        );

        self.enter(Stage::EncodingLossy, "Encoding base layer");
        let base = match self.stream.clone() {
            Some(video) => BaseLayer::Stream(self.encode_stream(&video, &frames, &plan, &source_info)?),
            None => {
                let base_jobs = frames.iter().map(|f| EncodeJob {
                    key: JobKey::base(f.index),
                    image: f.picture.clone(),
                    qp: plan.base_qp(),
                });
                BaseLayer::Frames(self.dispatch(base_jobs, "Encoding base layer")?)
            }
        };

        self.enter(Stage::EncodingLossless, "Refining important regions");
        let rects: Vec<(&Ingested, (u32, u32, u32, u32))> = frames
            .iter()
            .flat_map(|f| {
                refinement_rects(&plan, f.index)
                    .into_iter()
                    .map(move |rect| (f, rect))
            })
            .collect();
        let patch_jobs = rects.iter().map(|&(f, (x, y, w, h))| EncodeJob {
            key: JobKey {
                frame: f.index,
                layer: Layer::Refinement,
                y,
                x,
            },
            image: crop(&f.picture, x, y, w, h),
            qp: LOSSLESS_QP,
        });
        let patches = self.dispatch(patch_jobs, "Refining regions")?;

        self.enter(Stage::Finalizing, "Writing container");
        let container = build_container(&plan, &source_info, &frames, base, patches);
        let container_bytes = container.to_bytes()?;
        let encoding = sampler.finish();
        tracing::info!(
            bytes = container_bytes.len(),
            assets = container.assets.len(),
            elapsed_ms = encoding.wall_time.as_millis() as u64,
            "container written"
        );

        Ok(EncodeOutput {
            plan,
            source_info,
            originals: frames.into_iter().map(Ingested::into_reference).collect(),
            container_bytes,
            duration_ms: container.header.duration_ms,
            encoding,
        })
    }

    /// Pulls every frame, scales it and scores it
    fn ingest(
        &mut self,
        source: &mut dyn FrameSource,
        dimensions: Dimensions,
    ) -> Result<(Vec<Ingested>, ImportanceStats)> {
        let mut analyzer = RegionAnalyzer::new(self.engine.analyzer.clone());
        let mut stats = ImportanceStats::new();
        let mut frames = Vec::new();
        let mut buffered: u64 = 0;
        let mut tracker =
            ProgressTracker::new(Stage::Analyzing, source.info().estimated_frame_count());

        while let Some(frame) = source.next_frame()? {
            self.cancel.check()?;

            let Frame {
                index,
                timestamp_ms,
                image,
            } = frame;
            let (w, h) = (dimensions.width, dimensions.height);
            let (picture, reference) = if image.dimensions() != (w, h) {
                let reference = LumaFrame::from_image(index, timestamp_ms, &image);
                (resize_to(&image, w, h), Some(reference))
            } else {
                (image, None)
            };
            stats.record(&analyzer.analyze_image(index, &picture));

            let ingested = Ingested {
                index,
                timestamp_ms,
                picture,
                reference,
            };
            buffered += ingested.buffer_size();
            if buffered > self.engine.max_buffer_bytes {
                return Err(Error::ResourceExhausted(format!(
                    "buffered frames exceed {} bytes after frame {index}",
                    self.engine.max_buffer_bytes
                )));
            }

            frames.push(ingested);
            tracker.advance(1);
            // The frame count is an estimate; stay short of the stage end
            if tracker.processed() >= tracker.total() {
                tracker.set_total(tracker.processed() + 1);
            }
            self.report(&tracker, "Analyzing frame");
        }

        if frames.is_empty() {
            return Err(Error::Decode("input contains no frames".into()));
        }
        Ok((frames, stats))
    }

    /// Encodes the base layer as one stream, retrying once from the first
    /// frame. Cancellation is never retried.
    fn encode_stream(
        &mut self,
        video: &VideoCodec,
        frames: &[Ingested],
        plan: &EncodingPlan,
        info: &SourceInfo,
    ) -> Result<EncodedPart> {
        let stream = match self.encode_stream_once(video, frames, plan, info) {
            Err(first) if !first.is_cancelled() => {
                tracing::warn!(encoder = video.name(), error = %first, "base stream failed, retrying once");
                self.encode_stream_once(video, frames, plan, info)
                    .map_err(|second| match second {
                        Error::Cancelled(_) => second,
                        other => Error::EncodeJob {
                            job: "base stream".into(),
                            reason: other.to_string(),
                        },
                    })?
            }
            outcome => outcome?,
        };

        let dims = plan.dimensions();
        tracing::debug!(
            encoder = video.name(),
            packets = stream.packets.len(),
            bytes = stream.payload_size(),
            "base stream encoded"
        );
        Ok(EncodedPart {
            width: dims.width,
            height: dims.height,
            payload: EncodedPayload::new(AssetFormat::Stream, stream.to_bytes()?),
        })
    }

    fn encode_stream_once(
        &mut self,
        video: &VideoCodec,
        frames: &[Ingested],
        plan: &EncodingPlan,
        info: &SourceInfo,
    ) -> Result<VideoStream> {
        let dims = plan.dimensions();
        let mut encoder = video.begin(
            dims.width,
            dims.height,
            info.fps_num,
            info.fps_den,
            plan.base_qp(),
        )?;
        let mut tracker = ProgressTracker::new(self.stage, frames.len() as u64);
        for frame in frames {
            self.cancel.check()?;
            encoder.push(&frame.picture)?;
            tracker.advance(1);
            self.report(&tracker, "Encoding base stream");
        }
        self.cancel.check()?;
        encoder.finish()
    }

    /// Runs jobs on the pool with at most `workers` in flight. Stops
    /// dispatching at the first failure or cancellation, waits for jobs
    /// already running, then reports.
    fn dispatch(
        &mut self,
        jobs: impl ExactSizeIterator<Item = EncodeJob>,
        label: &str,
    ) -> Result<BTreeMap<JobKey, EncodedPart>> {
        let limit = self.pool.current_num_threads().max(1);
        let mut tracker = ProgressTracker::new(self.stage, jobs.len() as u64);
        let (tx, rx) = mpsc::channel::<(JobKey, u32, u32, Result<EncodedPayload>)>();

        let mut pending = jobs;
        let mut in_flight = 0usize;
        let mut results = BTreeMap::new();
        let mut failure: Option<Error> = None;

        loop {
            while failure.is_none() && in_flight < limit {
                if let Err(cancelled) = self.cancel.check() {
                    failure = Some(cancelled);
                    break;
                }
                let Some(job) = pending.next() else { break };

                tracing::debug!(job = %job.key, qp = job.qp, "dispatching");
                let tx = tx.clone();
                let codec = Arc::clone(&self.codec);
                self.pool.spawn(move || {
                    let (width, height) = job.image.dimensions();
                    let outcome = encode_with_retry(codec.as_ref(), &job);
                    let _ = tx.send((job.key, width, height, outcome));
                });
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }
            let Ok((key, width, height, outcome)) = rx.recv() else {
                break;
            };
            in_flight -= 1;

            match outcome {
                Ok(payload) => {
                    results.insert(
                        key,
                        EncodedPart {
                            width,
                            height,
                            payload,
                        },
                    );
                    tracker.advance(1);
                    self.report(&tracker, label);
                }
                Err(e) => {
                    tracing::error!(job = %key, error = %e, "encode job failed");
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }
}

/// Assigns asset ids in key order and lays out the timeline. A stream base
/// layer is asset 0 and every frame's base entry points at it.
fn build_container(
    plan: &EncodingPlan,
    info: &SourceInfo,
    frames: &[Ingested],
    base: BaseLayer,
    patches: BTreeMap<JobKey, EncodedPart>,
) -> HyvcContainer {
    let frame_duration = info.frame_duration_ms();
    let timestamps: Vec<u64> = frames.iter().map(|f| f.timestamp_ms).collect();
    let span = |position: usize| {
        let start = timestamps[position];
        let end = timestamps
            .get(position + 1)
            .copied()
            .unwrap_or(start + frame_duration)
            .max(start + 1);
        (start, end)
    };
    let positions: BTreeMap<u32, usize> = frames
        .iter()
        .enumerate()
        .map(|(i, f)| (f.index, i))
        .collect();
    let span_of = |frame: u32| positions.get(&frame).map_or((0, frame_duration), |&p| span(p));

    let mut assets = Vec::with_capacity(patches.len() + 1);
    let mut placements: Vec<(JobKey, TimelineEntry)> = Vec::with_capacity(patches.len() + frames.len());
    let mut push_part = |key: JobKey, part: EncodedPart, assets: &mut Vec<Asset>| {
        let id = assets.len() as u32;
        let (start, end) = span_of(key.frame);
        assets.push(Asset::new(
            id,
            part.payload.format,
            part.width,
            part.height,
            part.payload.data,
        ));
        placements.push((
            key,
            TimelineEntry::new(id, key.frame, start, end, key.x, key.y, key.layer),
        ));
    };

    match base {
        BaseLayer::Frames(mut parts) => {
            let mut merged = patches;
            merged.append(&mut parts);
            for (key, part) in merged {
                push_part(key, part, &mut assets);
            }
        }
        BaseLayer::Stream(stream) => {
            push_part(JobKey::base(frames.first().map_or(0, |f| f.index)), stream, &mut assets);
            for (key, part) in patches {
                push_part(key, part, &mut assets);
            }
            for f in frames.iter().skip(1) {
                let (start, end) = span_of(f.index);
                placements.push((
                    JobKey::base(f.index),
                    TimelineEntry::new(0, f.index, start, end, 0, 0, Layer::Base),
                ));
            }
        }
    }

    placements.sort_by_key(|(key, _)| *key);
    let timeline = placements.into_iter().map(|(_, entry)| entry).collect();

    let duration_ms = frames.len().checked_sub(1).map_or(0, |last| span(last).1);
    let dims = plan.dimensions();
    let header = HyvcHeader::new(
        dims.width,
        dims.height,
        info.fps_num,
        info.fps_den,
        duration_ms,
        plan.base_qp(),
        0,
        0,
    );
    HyvcContainer::new(header, assets, timeline)
}
