//! Decoded frames and pixel helpers

use image::imageops::{self, FilterType};
use image::RgbImage;

/// One decoded frame of the input stream
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in decode order, starting at 0
    pub index: u32,
    /// Presentation time relative to the first frame
    pub timestamp_ms: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u32, timestamp_ms: u64, image: RgbImage) -> Self {
        Self {
            index,
            timestamp_ms,
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Bytes held by the pixel buffer
    pub fn buffer_size(&self) -> u64 {
        self.image.as_raw().len() as u64
    }
}

/// Luma plane of a frame, kept as the reference for quality measurement
#[derive(Debug, Clone)]
pub struct LumaFrame {
    pub index: u32,
    pub timestamp_ms: u64,
    pub width: u32,
    pub height: u32,
    pub plane: Vec<u8>,
}

impl LumaFrame {
    pub fn from_image(index: u32, timestamp_ms: u64, image: &RgbImage) -> Self {
        Self {
            index,
            timestamp_ms,
            width: image.width(),
            height: image.height(),
            plane: luma_plane(image),
        }
    }

    pub fn buffer_size(&self) -> u64 {
        self.plane.len() as u64
    }
}

/// BT.601 luma with 8-bit fixed-point weights; exact and platform independent
pub fn luma_plane(image: &RgbImage) -> Vec<u8> {
    image
        .as_raw()
        .chunks_exact(3)
        .map(|p| ((77 * p[0] as u32 + 150 * p[1] as u32 + 29 * p[2] as u32 + 128) >> 8) as u8)
        .collect()
}

/// Resamples an image to the given size; returns a plain copy when the size already matches
pub fn resize_to(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Copies a rectangle out of an image
pub fn crop(image: &RgbImage, x: u32, y: u32, width: u32, height: u32) -> RgbImage {
    imageops::crop_imm(image, x, y, width, height).to_image()
}
