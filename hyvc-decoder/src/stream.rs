//! Decoding of inter-coded base-layer streams

use crate::{Error, Result};
use ffmpeg_next as ffmpeg;
use hyvc_core::{StreamPacket, VideoFormat, VideoStream};
use image::RgbImage;
use std::sync::OnceLock;

static FFMPEG_INIT: OnceLock<std::result::Result<(), ffmpeg::Error>> = OnceLock::new();

/// Initialize FFmpeg once per process
pub fn init_ffmpeg() -> Result<()> {
    (*FFMPEG_INIT.get_or_init(ffmpeg::init)).map_err(Error::from)
}

/// Copies the first plane of an RGB24 frame into a tightly packed image.
/// Returns `None` when the plane is shorter than `width`x`height` implies.
pub fn copy_rgb24(frame: &ffmpeg::frame::Video, width: u32, height: u32) -> Option<RgbImage> {
    // Rows may be padded; copy them one by one
    let stride = frame.stride(0);
    let row_bytes = width as usize * 3;
    let plane = frame.data(0);
    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for y in 0..height as usize {
        let off = y * stride;
        pixels.extend_from_slice(plane.get(off..off + row_bytes)?);
    }
    RgbImage::from_raw(width, height, pixels)
}

fn find_decoder(format: VideoFormat) -> Option<ffmpeg::Codec> {
    let (preferred, id): (&[&str], _) = match format {
        VideoFormat::H264 => (&[], ffmpeg::codec::Id::H264),
        VideoFormat::Hevc => (&[], ffmpeg::codec::Id::HEVC),
        VideoFormat::Av1 => (&["libdav1d", "libaom-av1"], ffmpeg::codec::Id::AV1),
    };
    preferred
        .iter()
        .find_map(|name| ffmpeg::decoder::find_by_name(name))
        .or_else(|| ffmpeg::decoder::find(id))
}

/// Pulls RGB pictures out of a [`VideoStream`] in presentation order
pub struct StreamDecoder {
    packets: std::vec::IntoIter<StreamPacket>,
    decoder: ffmpeg::decoder::Video,
    scaler: Option<ffmpeg::software::scaling::Context>,
    width: u32,
    height: u32,
    eof_sent: bool,
}

impl StreamDecoder {
    pub fn new(stream: VideoStream) -> Result<Self> {
        init_ffmpeg()?;
        let codec = find_decoder(stream.format)
            .ok_or_else(|| Error::UnsupportedStream(format!("no {} decoder available", stream.format)))?;
        let decoder = ffmpeg::codec::context::Context::new()
            .decoder()
            .open_as(codec)?
            .video()?;

        tracing::trace!(
            format = %stream.format,
            decoder = codec.name(),
            packets = stream.packets.len(),
            "stream decoder opened"
        );

        Ok(Self {
            packets: stream.packets.into_iter(),
            decoder,
            scaler: None,
            width: stream.width,
            height: stream.height,
            eof_sent: false,
        })
    }

    /// Next picture, or `None` once the stream is drained
    pub fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        loop {
            let mut decoded = ffmpeg::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => return self.convert(&decoded).map(Some),
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {}
                Err(e) => return Err(e.into()),
            }

            if self.eof_sent {
                return Ok(None);
            }

            match self.packets.next() {
                Some(next) => {
                    let mut packet = ffmpeg::Packet::copy(&next.data);
                    packet.set_pts(Some(next.pts));
                    if next.keyframe {
                        packet.set_flags(ffmpeg::packet::Flags::KEY);
                    }
                    self.decoder.send_packet(&packet)?;
                }
                None => {
                    self.decoder.send_eof()?;
                    self.eof_sent = true;
                }
            }
        }
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<RgbImage> {
        if (decoded.width(), decoded.height()) != (self.width, self.height) {
            return Err(Error::UnsupportedStream(format!(
                "picture is {}x{}, stream header says {}x{}",
                decoded.width(),
                decoded.height(),
                self.width,
                self.height
            )));
        }

        if self.scaler.is_none() {
            self.scaler = Some(ffmpeg::software::scaling::Context::get(
                decoded.format(),
                decoded.width(),
                decoded.height(),
                ffmpeg::format::Pixel::RGB24,
                self.width,
                self.height,
                ffmpeg::software::scaling::Flags::BILINEAR,
            )?);
        }

        let mut rgb = ffmpeg::frame::Video::empty();
        if let Some(ref mut scaler) = self.scaler {
            scaler.run(decoded, &mut rgb)?;
        }
        copy_rgb24(&rgb, self.width, self.height)
            .ok_or_else(|| Error::UnsupportedStream("decoded plane shorter than expected".into()))
    }
}
