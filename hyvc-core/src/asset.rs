//! Asset data structures for HYVC streams

use crate::{Error, Result};

/// Payload encoding of an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetFormat {
    /// Lossless PNG payload
    Png,
    /// AVIF still image payload
    Avif,
    /// Inter-coded video bitstream shared by every base entry that references it
    Stream,
}

impl AssetFormat {
    pub fn tag(self) -> u8 {
        match self {
            AssetFormat::Png => 0,
            AssetFormat::Avif => 1,
            AssetFormat::Stream => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(AssetFormat::Png),
            1 => Ok(AssetFormat::Avif),
            2 => Ok(AssetFormat::Stream),
            other => Err(Error::UnknownAssetFormat(other)),
        }
    }
}

/// Represents one encoded payload: a base frame, a refinement patch, or a
/// whole base-layer stream
#[derive(Debug, Clone)]
pub struct Asset {
    /// Unique identifier for this asset
    pub id: u32,
    /// Payload encoding
    pub format: AssetFormat,
    /// Width of the asset in pixels
    pub width: u32,
    /// Height of the asset in pixels
    pub height: u32,
    /// Encoded image data
    pub data: Vec<u8>,
}

impl Asset {
    /// Creates a new asset
    pub fn new(id: u32, format: AssetFormat, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            id,
            format,
            width,
            height,
            data,
        }
    }

    /// Returns the size of the asset data in bytes
    pub fn data_size(&self) -> usize {
        self.data.len()
    }
}
