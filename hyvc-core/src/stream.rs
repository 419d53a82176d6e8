//! Inter-coded base layer payload
//!
//! A stream asset carries the whole lossy base layer as one compressed video
//! bitstream, split into the packets the encoder emitted. Packets are stored in
//! decode order; the n-th picture a decoder returns is the n-th frame that
//! references the asset.

use crate::container::{read_bytes, MAX_PREALLOC};
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{Cursor, Read, Write};

const KEY_FLAG: u8 = 0x01;

/// Bitstream format of a stream asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoFormat {
    H264,
    Hevc,
    Av1,
}

impl VideoFormat {
    pub fn tag(self) -> u8 {
        match self {
            VideoFormat::H264 => 0,
            VideoFormat::Hevc => 1,
            VideoFormat::Av1 => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(VideoFormat::H264),
            1 => Ok(VideoFormat::Hevc),
            2 => Ok(VideoFormat::Av1),
            other => Err(Error::UnknownVideoFormat(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VideoFormat::H264 => "h264",
            VideoFormat::Hevc => "hevc",
            VideoFormat::Av1 => "av1",
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One compressed packet as the encoder produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPacket {
    pub pts: i64,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

/// A complete encoded base layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoStream {
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    pub packets: Vec<StreamPacket>,
}

impl VideoStream {
    pub fn new(format: VideoFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            packets: Vec::new(),
        }
    }

    /// Compressed bytes across all packets
    pub fn payload_size(&self) -> usize {
        self.packets.iter().map(|p| p.data.len()).sum()
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_u8(self.format.tag())?;
        writer.write_u32::<LittleEndian>(self.width)?;
        writer.write_u32::<LittleEndian>(self.height)?;
        writer.write_u32::<LittleEndian>(self.packets.len() as u32)?;
        for packet in &self.packets {
            writer.write_i64::<LittleEndian>(packet.pts)?;
            writer.write_u8(if packet.keyframe { KEY_FLAG } else { 0 })?;
            writer.write_u32::<LittleEndian>(packet.data.len() as u32)?;
            writer.write_all(&packet.data)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.payload_size() + 13 * (self.packets.len() + 1));
        self.write(&mut buffer)?;
        Ok(buffer)
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let format = VideoFormat::from_tag(reader.read_u8()?)?;
        let width = reader.read_u32::<LittleEndian>()?;
        let height = reader.read_u32::<LittleEndian>()?;
        let count = reader.read_u32::<LittleEndian>()?;

        let mut packets = Vec::with_capacity((count as usize).min(MAX_PREALLOC));
        for _ in 0..count {
            let pts = reader.read_i64::<LittleEndian>()?;
            let flags = reader.read_u8()?;
            let len = reader.read_u32::<LittleEndian>()?;
            let data = read_bytes(&mut reader, len)?;
            packets.push(StreamPacket {
                pts,
                keyframe: flags & KEY_FLAG != 0,
                data,
            });
        }

        if packets.first().is_some_and(|p| !p.keyframe) {
            return Err(Error::InvalidStream("first packet is not a keyframe".into()));
        }
        Ok(Self {
            format,
            width,
            height,
            packets,
        })
    }

    /// Parses a stream asset's payload; trailing bytes are an error
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let stream = Self::read(&mut cursor)?;
        if cursor.position() != data.len() as u64 {
            return Err(Error::InvalidStream(format!(
                "{} trailing bytes after the last packet",
                data.len() as u64 - cursor.position()
            )));
        }
        Ok(stream)
    }
}
