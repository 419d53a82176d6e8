//! Frame sources: lazy, finite, single-pass sequences of decoded frames

use crate::{Error, Frame, Result};
use hyvc_core::Dimensions;
use image::RgbImage;
use std::collections::VecDeque;

/// Stream-level properties known before the first frame is read
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Audio streams in the input; never encoded
    pub audio_tracks: usize,
}

impl SourceInfo {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    pub fn fps(&self) -> f64 {
        if self.fps_den == 0 {
            return 0.0;
        }
        self.fps_num as f64 / self.fps_den as f64
    }

    /// Display time of a single frame, at least 1 ms
    pub fn frame_duration_ms(&self) -> u64 {
        if self.fps_num == 0 {
            return 1;
        }
        (1000 * self.fps_den as u64 / self.fps_num as u64).max(1)
    }

    /// Frame count implied by duration and rate; used only for progress
    pub fn estimated_frame_count(&self) -> u64 {
        ((self.duration_ms as f64 * self.fps_num as f64) / (self.fps_den.max(1) as f64 * 1000.0))
            .ceil() as u64
    }
}

/// A decoded video stream. Frames come out once, in order; reading again
/// requires reopening the input.
pub trait FrameSource {
    fn info(&self) -> &SourceInfo;

    /// Next frame, or `None` at end of stream
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Frame source over images already in memory
pub struct MemorySource {
    info: SourceInfo,
    frames: VecDeque<RgbImage>,
    next_index: u32,
}

impl MemorySource {
    /// All images must share one size; timestamps follow from the frame rate
    pub fn new(images: Vec<RgbImage>, fps_num: u32, fps_den: u32) -> Result<Self> {
        if fps_num == 0 || fps_den == 0 {
            return Err(Error::UnsupportedFormat(format!(
                "frame rate {fps_num}/{fps_den} is not usable"
            )));
        }
        let Some((width, height)) = images.first().map(|i| i.dimensions()) else {
            return Err(Error::Decode("input contains no frames".into()));
        };
        if let Some(odd) = images.iter().position(|i| i.dimensions() != (width, height)) {
            return Err(Error::Decode(format!(
                "frame {odd} is {:?}, expected {width}x{height}",
                images[odd].dimensions()
            )));
        }

        let duration_ms = images.len() as u64 * 1000 * fps_den as u64 / fps_num as u64;
        Ok(Self {
            info: SourceInfo {
                width,
                height,
                fps_num,
                fps_den,
                duration_ms,
                audio_tracks: 0,
            },
            frames: images.into(),
            next_index: 0,
        })
    }
}

impl FrameSource for MemorySource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(image) = self.frames.pop_front() else {
            return Ok(None);
        };
        let index = self.next_index;
        self.next_index += 1;
        let timestamp_ms =
            index as u64 * 1000 * self.info.fps_den as u64 / self.info.fps_num as u64;
        Ok(Some(Frame::new(index, timestamp_ms, image)))
    }
}
