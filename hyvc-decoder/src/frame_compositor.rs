//! Frame compositor: base layer plus refinement patches

use crate::{payload, Error, Result, StreamDecoder};
use hyvc_core::{Asset, AssetFormat, HyvcContainer, Layer, TimelineEntry, VideoStream};
use image::RgbImage;
use std::collections::HashMap;

/// A fully composited frame
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub index: u32,
    pub timestamp_ms: u64,
    pub image: RgbImage,
}

/// Frame compositor that renders frames from a HYVC container
pub struct FrameCompositor {
    container: HyvcContainer,
    asset_index: HashMap<u32, usize>,
    /// (stream asset, frame) to the picture's position within that stream
    stream_positions: HashMap<(u32, u32), usize>,
}

/// Decoding position inside one stream asset
struct StreamCursor {
    asset_id: u32,
    next_position: usize,
    decoder: StreamDecoder,
}

impl StreamCursor {
    fn open(asset: &Asset) -> Result<Self> {
        let stream = VideoStream::from_bytes(&asset.data)?;
        Ok(Self {
            asset_id: asset.id,
            next_position: 0,
            decoder: StreamDecoder::new(stream)?,
        })
    }
}

impl FrameCompositor {
    /// Creates a new frame compositor for the given container
    pub fn new(container: HyvcContainer) -> Self {
        let asset_index: HashMap<u32, usize> = container
            .assets
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id, i))
            .collect();

        let mut stream_positions = HashMap::new();
        let mut stream_lengths: HashMap<u32, usize> = HashMap::new();
        for base in container.base_entries() {
            let is_stream = asset_index
                .get(&base.asset_id)
                .is_some_and(|&i| container.assets[i].format == AssetFormat::Stream);
            if is_stream {
                let next = stream_lengths.entry(base.asset_id).or_default();
                stream_positions.insert((base.asset_id, base.frame_index), *next);
                *next += 1;
            }
        }

        tracing::debug!(
            assets = container.assets.len(),
            entries = container.timeline.len(),
            frames = container.frame_count(),
            "compositor ready"
        );
        Self {
            container,
            asset_index,
            stream_positions,
        }
    }

    fn asset(&self, asset_id: u32) -> Result<&Asset> {
        self.asset_index
            .get(&asset_id)
            .map(|&i| &self.container.assets[i])
            .ok_or(Error::AssetNotFound(asset_id))
    }

    /// Decodes a still asset and checks it against its declared size
    fn decode_asset(&self, asset_id: u32) -> Result<RgbImage> {
        let asset = self.asset(asset_id)?;
        let image = payload::decode_payload(asset.format, &asset.data)?;
        check_size(asset, image)
    }

    /// Decodes the base picture of one frame. Stream bases reuse `cursor`
    /// when it sits at or before the wanted picture and reopen it otherwise.
    fn decode_base(&self, base: &TimelineEntry, cursor: &mut Option<StreamCursor>) -> Result<RgbImage> {
        let asset = self.asset(base.asset_id)?;
        if asset.format != AssetFormat::Stream {
            return self.decode_asset(base.asset_id);
        }

        let position = self
            .stream_positions
            .get(&(asset.id, base.frame_index))
            .copied()
            .ok_or(Error::FrameOutOfRange(base.frame_index))?;

        let cursor = match cursor.take() {
            Some(c) if c.asset_id == asset.id && c.next_position <= position => cursor.insert(c),
            _ => cursor.insert(StreamCursor::open(asset)?),
        };

        loop {
            let picture = cursor
                .decoder
                .next_frame()?
                .ok_or(Error::FrameOutOfRange(base.frame_index))?;
            cursor.next_position += 1;
            if cursor.next_position > position {
                return check_size(asset, picture);
            }
        }
    }

    /// Renders one frame by index
    pub fn render_frame(&self, frame_index: u32) -> Result<RgbImage> {
        let entries = self.container.frame_entries(frame_index);
        self.composite(&entries, &mut None)
            .ok_or(Error::FrameOutOfRange(frame_index))?
    }

    /// Renders the frame shown at the given timestamp
    pub fn render_at(&self, timestamp_ms: u64) -> Result<RgbImage> {
        let entries = self.container.get_active_entries(timestamp_ms);
        self.composite(&entries, &mut None)
            .ok_or(Error::NoFrameAt(timestamp_ms))?
    }

    /// `None` when the entries do not start with a base layer
    fn composite(
        &self,
        entries: &[&TimelineEntry],
        cursor: &mut Option<StreamCursor>,
    ) -> Option<Result<RgbImage>> {
        let (base, patches) = entries.split_first()?;
        if base.layer != Layer::Base {
            return None;
        }
        Some(self.composite_layers(base, patches, cursor))
    }

    fn composite_layers(
        &self,
        base: &TimelineEntry,
        patches: &[&TimelineEntry],
        cursor: &mut Option<StreamCursor>,
    ) -> Result<RgbImage> {
        let mut frame = self.decode_base(base, cursor)?;
        let expected = (self.container.header.width, self.container.header.height);
        if frame.dimensions() != expected {
            return Err(Error::SizeMismatch {
                asset_id: base.asset_id,
                expected,
                actual: frame.dimensions(),
            });
        }

        for entry in patches.iter().filter(|e| e.layer == Layer::Refinement) {
            let patch = self.decode_asset(entry.asset_id)?;
            overlay_image(&mut frame, &patch, entry.position_x, entry.position_y);
        }

        Ok(frame)
    }

    /// Decodes every frame of the stream in order. A stream base layer is
    /// decoded once, front to back.
    pub fn frames(&self) -> impl Iterator<Item = Result<DecodedFrame>> + '_ {
        let mut cursor = None;
        self.container.base_entries().into_iter().map(move |base| {
            let entries = self.container.frame_entries(base.frame_index);
            let image = self
                .composite(&entries, &mut cursor)
                .ok_or(Error::FrameOutOfRange(base.frame_index))??;
            Ok(DecodedFrame {
                index: base.frame_index,
                timestamp_ms: base.start_time_ms,
                image,
            })
        })
    }

    /// Gets a reference to the underlying container
    pub fn container(&self) -> &HyvcContainer {
        &self.container
    }
}

fn check_size(asset: &Asset, image: RgbImage) -> Result<RgbImage> {
    if image.dimensions() != (asset.width, asset.height) {
        return Err(Error::SizeMismatch {
            asset_id: asset.id,
            expected: (asset.width, asset.height),
            actual: image.dimensions(),
        });
    }
    Ok(image)
}

/// Copies `patch` onto `base` at the given position. Patch pixels replace base
/// pixels outright; there is no blending across the patch edge.
pub fn overlay_image(base: &mut RgbImage, patch: &RgbImage, x: u32, y: u32) {
    let (base_width, base_height) = base.dimensions();
    if x >= base_width || y >= base_height {
        return;
    }

    let copy_width = patch.width().min(base_width - x) as usize;
    let copy_height = patch.height().min(base_height - y);
    let base_stride = base_width as usize * 3;
    let patch_stride = patch.width() as usize * 3;

    let dst: &mut [u8] = &mut **base;
    let src = patch.as_raw();
    for row in 0..copy_height {
        let dst_off = (y + row) as usize * base_stride + x as usize * 3;
        let src_off = row as usize * patch_stride;
        dst[dst_off..dst_off + copy_width * 3].copy_from_slice(&src[src_off..src_off + copy_width * 3]);
    }
}
