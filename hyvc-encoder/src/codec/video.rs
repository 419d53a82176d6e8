//! Inter-coded base layer through FFmpeg
//!
//! Still codecs spend a full intra picture on every frame. `VideoCodec`
//! instead feeds the whole base layer to a real video encoder (x264 first,
//! AV1 or x265 when that is what the FFmpeg build offers), so static content
//! costs almost nothing after the first keyframe. The packets end up in one
//! stream asset that every base entry of the container points at.

use super::MAX_QP;
use crate::{Error, Result};
use ffmpeg_next as ffmpeg;
use hyvc_core::{StreamPacket, VideoFormat, VideoStream};
use hyvc_decoder::StreamDecoder;
use image::{Rgb, RgbImage};

/// Encoders in order of preference
const ENCODERS: &[(&str, VideoFormat)] = &[
    ("libx264", VideoFormat::H264),
    ("libsvtav1", VideoFormat::Av1),
    ("libaom-av1", VideoFormat::Av1),
    ("libx265", VideoFormat::Hevc),
];

/// Keyframe distance in seconds of playback
const GOP_SECONDS: u32 = 2;

/// Constant rate factor for a base quantization parameter. H.264 and HEVC
/// share the 0..=51 scale; AV1 encoders take 0..=63.
pub fn crf_for(format: VideoFormat, qp: u8) -> u8 {
    let qp = qp.min(MAX_QP);
    match format {
        VideoFormat::H264 | VideoFormat::Hevc => qp,
        VideoFormat::Av1 => (qp as f64 * 63.0 / MAX_QP as f64).round() as u8,
    }
}

/// Video codec for the lossy base layer
#[derive(Debug, Default, Clone)]
pub struct VideoCodec {
    selected: Option<(&'static str, VideoFormat)>,
}

impl VideoCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Picks the first encoder that can round-trip a short clip
    pub fn initialize(&mut self) -> Result<()> {
        if self.selected.is_some() {
            return Ok(());
        }
        hyvc_decoder::init_ffmpeg().map_err(|e| Error::CodecInit(e.to_string()))?;

        for &(name, format) in ENCODERS {
            if ffmpeg::encoder::find_by_name(name).is_none() {
                continue;
            }
            let candidate = Self {
                selected: Some((name, format)),
            };
            match candidate.self_test() {
                Ok(()) => {
                    tracing::debug!(encoder = name, format = %format, "video codec ready");
                    self.selected = candidate.selected;
                    return Ok(());
                }
                Err(e) => tracing::debug!(encoder = name, error = %e, "encoder unusable"),
            }
        }

        let tried: Vec<&str> = ENCODERS.iter().map(|&(name, _)| name).collect();
        Err(Error::CodecInit(format!(
            "no usable video encoder (tried {})",
            tried.join(", ")
        )))
    }

    fn self_test(&self) -> Result<()> {
        let mut encoder = self.begin(64, 64, 25, 1, 30)?;
        for shift in 0..3u32 {
            let picture = RgbImage::from_fn(64, 64, |x, y| {
                Rgb([((x + shift * 4) * 4) as u8, (y * 4) as u8, 128])
            });
            encoder.push(&picture)?;
        }
        let stream = encoder.finish()?;

        let mut decoder = StreamDecoder::new(stream)?;
        let mut decoded = 0;
        while let Some(picture) = decoder.next_frame()? {
            if picture.dimensions() != (64, 64) {
                return Err(Error::CodecInit(format!(
                    "self-test decoded as {:?}",
                    picture.dimensions()
                )));
            }
            decoded += 1;
        }
        if decoded != 3 {
            return Err(Error::CodecInit(format!(
                "self-test decoded {decoded} of 3 frames"
            )));
        }
        Ok(())
    }

    /// Encoder name, or "video" before initialization
    pub fn name(&self) -> &'static str {
        self.selected.map_or("video", |(name, _)| name)
    }

    pub fn format(&self) -> Option<VideoFormat> {
        self.selected.map(|(_, format)| format)
    }

    /// x264 with a fixed thread count is bit-exact across runs
    pub fn is_deterministic(&self) -> bool {
        matches!(self.selected, Some(("libx264", _)))
    }

    /// Opens an encoder for one base layer
    pub fn begin(
        &self,
        width: u32,
        height: u32,
        fps_num: u32,
        fps_den: u32,
        qp: u8,
    ) -> Result<StreamEncoder> {
        let (name, format) = self
            .selected
            .ok_or_else(|| Error::CodecInit("video codec used before initialize".into()))?;
        if qp > MAX_QP {
            return Err(Error::InvalidConfig(format!("qp {qp} exceeds {MAX_QP}")));
        }
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(Error::InvalidConfig(format!(
                "video base layer needs even dimensions, got {width}x{height}"
            )));
        }
        if fps_num == 0 || fps_den == 0 {
            return Err(Error::InvalidConfig(format!(
                "frame rate {fps_num}/{fps_den} is not usable"
            )));
        }

        let codec = ffmpeg::encoder::find_by_name(name)
            .ok_or_else(|| Error::CodecInit(format!("{name} disappeared after initialize")))?;

        let context = ffmpeg::codec::context::Context::from_parameters(ffmpeg::codec::Parameters::new())?;
        let mut video = context.encoder().video()?;
        video.set_width(width);
        video.set_height(height);
        video.set_format(ffmpeg::format::Pixel::YUV420P);
        video.set_time_base(ffmpeg::Rational(fps_den as i32, fps_num as i32));
        video.set_frame_rate(Some(ffmpeg::Rational(fps_num as i32, fps_den as i32)));
        let gop = (GOP_SECONDS * fps_num / fps_den).max(1);
        video.set_gop(gop);

        let crf = crf_for(format, qp);
        let mut opts = ffmpeg::Dictionary::new();
        opts.set("crf", &crf.to_string());
        match name {
            "libx264" => {
                opts.set("preset", "fast");
                opts.set("threads", "1");
            }
            "libsvtav1" => opts.set("preset", "8"),
            "libaom-av1" => {
                opts.set("cpu-used", "6");
                opts.set("row-mt", "1");
            }
            "libx265" => {
                opts.set("preset", "fast");
                opts.set("x265-params", "log-level=error");
            }
            _ => {}
        }

        let encoder = video.open_as_with(codec, opts).map_err(|e| {
            Error::CodecInit(format!(
                "{name} open failed ({width}x{height}, crf={crf}): {e}"
            ))
        })?;

        let scaler = ffmpeg::software::scaling::Context::get(
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::format::Pixel::YUV420P,
            width,
            height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )?;

        tracing::debug!(encoder = name, width, height, crf, gop, "stream encoder opened");
        Ok(StreamEncoder {
            encoder,
            scaler,
            stream: VideoStream::new(format, width, height),
            next_pts: 0,
        })
    }
}

/// One open base-layer encode. Pictures go in with [`push`](Self::push) in
/// presentation order; [`finish`](Self::finish) flushes and returns the
/// stream.
pub struct StreamEncoder {
    encoder: ffmpeg::encoder::video::Encoder,
    scaler: ffmpeg::software::scaling::Context,
    stream: VideoStream,
    next_pts: i64,
}

impl StreamEncoder {
    pub fn push(&mut self, image: &RgbImage) -> Result<()> {
        let (width, height) = (self.stream.width, self.stream.height);
        if image.dimensions() != (width, height) {
            return Err(Error::Encode(format!(
                "picture is {:?}, stream is {width}x{height}",
                image.dimensions()
            )));
        }

        let mut rgb = ffmpeg::frame::Video::new(ffmpeg::format::Pixel::RGB24, width, height);
        let stride = rgb.stride(0);
        let row_bytes = width as usize * 3;
        let src = image.as_raw();
        let dst = rgb.data_mut(0);
        for y in 0..height as usize {
            dst[y * stride..y * stride + row_bytes]
                .copy_from_slice(&src[y * row_bytes..(y + 1) * row_bytes]);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .map_err(|e| Error::Encode(format!("pixel conversion failed: {e}")))?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&yuv)
            .map_err(|e| Error::Encode(format!("frame {}: {e}", self.next_pts - 1)))?;
        self.drain()
    }

    fn drain(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        loop {
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    let data = packet.data().unwrap_or(&[]);
                    if !data.is_empty() {
                        self.stream.packets.push(StreamPacket {
                            pts: packet.pts().or(packet.dts()).unwrap_or_default(),
                            keyframe: packet.is_key(),
                            data: data.to_vec(),
                        });
                    }
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    return Ok(())
                }
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => return Err(Error::Encode(format!("receiving packet: {e}"))),
            }
        }
    }

    /// Frames pushed so far
    pub fn frames(&self) -> i64 {
        self.next_pts
    }

    pub fn finish(mut self) -> Result<VideoStream> {
        self.encoder
            .send_eof()
            .map_err(|e| Error::Encode(format!("flushing encoder: {e}")))?;
        self.drain()?;

        if self.next_pts > 0 && self.stream.packets.is_empty() {
            return Err(Error::Encode("encoder produced no packets".into()));
        }
        if self.stream.packets.first().is_some_and(|p| !p.keyframe) {
            return Err(Error::Encode("stream does not open on a keyframe".into()));
        }
        Ok(self.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> Option<VideoCodec> {
        let mut codec = VideoCodec::new();
        match codec.initialize() {
            Ok(()) => Some(codec),
            Err(e) => {
                eprintln!("skipping: {e}");
                None
            }
        }
    }

    #[test]
    fn test_crf_mapping() {
        assert_eq!(crf_for(VideoFormat::H264, 23), 23);
        assert_eq!(crf_for(VideoFormat::Hevc, MAX_QP), MAX_QP);
        assert_eq!(crf_for(VideoFormat::Av1, 0), 0);
        assert_eq!(crf_for(VideoFormat::Av1, MAX_QP), 63);
        assert_eq!(crf_for(VideoFormat::Av1, 30), 37);
        assert_eq!(crf_for(VideoFormat::H264, 99), MAX_QP);
    }

    #[test]
    fn test_uninitialized_codec_refuses_work() {
        let err = VideoCodec::new().begin(64, 64, 25, 1, 23).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::CodecInit);
        assert_eq!(VideoCodec::new().name(), "video");
    }

    #[test]
    fn test_static_clip_round_trips() {
        let Some(codec) = ready() else { return };
        let picture = RgbImage::from_fn(128, 96, |x, y| Rgb([x as u8, y as u8, 90]));

        let mut encoder = codec.begin(128, 96, 30, 1, 23).unwrap();
        for _ in 0..8 {
            encoder.push(&picture).unwrap();
        }
        assert_eq!(encoder.frames(), 8);
        let stream = encoder.finish().unwrap();
        assert_eq!(Some(stream.format), codec.format());
        assert!(stream.packets[0].keyframe);

        // Repeated pictures cost far less than the keyframe
        let key = stream.packets[0].data.len();
        let rest: usize = stream.packets[1..].iter().map(|p| p.data.len()).sum();
        assert!(rest < key * 7);

        let mut decoder = StreamDecoder::new(stream).unwrap();
        let mut count = 0;
        while let Some(frame) = decoder.next_frame().unwrap() {
            assert_eq!(frame.dimensions(), (128, 96));
            count += 1;
        }
        assert_eq!(count, 8);
    }

    #[test]
    fn test_odd_dimensions_rejected() {
        let Some(codec) = ready() else { return };
        assert!(matches!(
            codec.begin(65, 64, 25, 1, 23),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_wrong_picture_size_is_an_encode_error() {
        let Some(codec) = ready() else { return };
        let mut encoder = codec.begin(64, 64, 25, 1, 23).unwrap();
        let err = encoder.push(&RgbImage::new(32, 32)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::EncodeJob);
    }
}
