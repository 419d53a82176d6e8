//! Video reading and frame extraction using FFmpeg

use crate::frame_source::{FrameSource, SourceInfo};
use crate::{Error, Frame, Result};
use ffmpeg_next as ffmpeg;
use hyvc_core::VideoMetadata;
use hyvc_decoder::copy_rgb24;
use std::path::Path;

/// Frame source that decodes a video file with FFmpeg
pub struct VideoReader {
    input: ffmpeg::format::context::Input,
    video_stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: Option<ffmpeg::software::scaling::Context>,
    time_base: ffmpeg::Rational,
    first_pts: Option<i64>,
    info: SourceInfo,
    next_index: u32,
    eof_sent: bool,
}

impl VideoReader {
    /// Opens a video file
    pub fn open(path: &Path) -> Result<Self> {
        hyvc_decoder::init_ffmpeg()?;

        if !path.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a readable file", path.display()),
            )));
        }

        let input = ffmpeg::format::input(&path).map_err(|e| {
            Error::UnsupportedFormat(format!("{}: container not recognized ({e})", path.display()))
        })?;

        let video_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| Error::UnsupportedFormat(format!("{}: no video stream", path.display())))?;

        let video_stream_index = video_stream.index();
        let time_base = video_stream.time_base();

        let mut rate = video_stream.avg_frame_rate();
        if rate.numerator() <= 0 || rate.denominator() <= 0 {
            rate = video_stream.rate();
        }
        let (fps_num, fps_den) = if rate.numerator() > 0 && rate.denominator() > 0 {
            (rate.numerator() as u32, rate.denominator() as u32)
        } else {
            (30, 1)
        };

        let duration = video_stream.duration();
        let duration_ms = if duration > 0 {
            (duration as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
                * 1000.0) as u64
        } else {
            // Fallback to container duration
            (input.duration().max(0) as f64 / ffmpeg::ffi::AV_TIME_BASE as f64 * 1000.0) as u64
        };

        let context = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())?;
        let decoder = context.decoder().video().map_err(|e| {
            Error::UnsupportedFormat(format!("{}: no decoder for video codec ({e})", path.display()))
        })?;

        if decoder.width() == 0 || decoder.height() == 0 {
            return Err(Error::Decode(format!(
                "{}: video stream reports zero size",
                path.display()
            )));
        }

        let audio_tracks = input
            .streams()
            .filter(|s| s.parameters().medium() == ffmpeg::media::Type::Audio)
            .count();

        let info = SourceInfo {
            width: decoder.width(),
            height: decoder.height(),
            fps_num,
            fps_den,
            duration_ms,
            audio_tracks,
        };

        tracing::debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps = info.fps(),
            duration_ms,
            audio_tracks,
            "opened video"
        );

        Ok(Self {
            input,
            video_stream_index,
            decoder,
            scaler: None,
            time_base,
            first_pts: None,
            info,
            next_index: 0,
            eof_sent: false,
        })
    }

    /// Container metadata as the upload collaborator would report it
    pub fn source_metadata(&self, path: &Path) -> Result<VideoMetadata> {
        let file_size = std::fs::metadata(path)?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(VideoMetadata {
            file_name,
            file_size,
            duration: self.info.duration_ms as f64 / 1000.0,
            width: self.info.width,
            height: self.info.height,
            format: self.input.format().name().to_string(),
        })
    }

    /// Converts a decoded frame to RGB at the stream's nominal size
    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let (width, height) = (self.info.width, self.info.height);
        if self.scaler.is_none() {
            self.scaler = Some(ffmpeg::software::scaling::Context::get(
                decoded.format(),
                decoded.width(),
                decoded.height(),
                ffmpeg::format::Pixel::RGB24,
                width,
                height,
                ffmpeg::software::scaling::Flags::BILINEAR,
            )?);
        }

        let mut rgb_frame = ffmpeg::frame::Video::empty();
        if let Some(ref mut scaler) = self.scaler {
            scaler
                .run(decoded, &mut rgb_frame)
                .map_err(|e| Error::Decode(format!("pixel conversion failed: {e}")))?;
        }

        let image = copy_rgb24(&rgb_frame, width, height)
            .ok_or_else(|| Error::Decode("decoded plane shorter than expected".into()))?;

        let index = self.next_index;
        self.next_index += 1;
        let timestamp_ms = match decoded.timestamp().or(decoded.pts()) {
            Some(pts) => {
                let first = *self.first_pts.get_or_insert(pts);
                let rel = (pts - first).max(0) as f64;
                (rel * self.time_base.numerator() as f64 / self.time_base.denominator().max(1) as f64
                    * 1000.0)
                    .round() as u64
            }
            None => index as u64 * self.info.frame_duration_ms(),
        };

        Ok(Frame::new(index, timestamp_ms, image))
    }
}

impl FrameSource for VideoReader {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            let mut decoded = ffmpeg::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => return self.convert(&decoded).map(Some),
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {}
                Err(e) => return Err(Error::Decode(format!("frame {}: {e}", self.next_index))),
            }

            if self.eof_sent {
                return Ok(None);
            }

            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() == self.video_stream_index {
                        self.decoder
                            .send_packet(&packet)
                            .map_err(|e| Error::Decode(format!("corrupt packet: {e}")))?;
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    self.decoder.send_eof()?;
                    self.eof_sent = true;
                }
                Err(e) => return Err(Error::Decode(format!("demuxing failed: {e}"))),
            }
        }
    }
}
