//! HYVC container format serialization and deserialization

use crate::{Asset, AssetFormat, Error, Layer, Result, TimelineEntry};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{Read, Write};

/// Magic bytes for HYVC format
const MAGIC: [u8; 4] = *b"HYVC";

/// Current HYVC format version
const VERSION: u16 = 1;

/// Upper bound on element counts trusted from a header before reading
pub(crate) const MAX_PREALLOC: usize = 1024;

/// Reads exactly `len` bytes without trusting `len` for the allocation
pub(crate) fn read_bytes<R: Read>(reader: &mut R, len: u32) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut data)?;
    if data.len() as u64 != len as u64 {
        return Err(Error::Truncated {
            expected: len as u64,
            actual: data.len() as u64,
        });
    }
    Ok(data)
}

/// HYVC file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyvcHeader {
    /// Format version
    pub version: u16,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame rate numerator
    pub fps_num: u32,
    /// Frame rate denominator
    pub fps_den: u32,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Quantization parameter of the lossy base layer
    pub base_qp: u8,
    /// Number of assets
    pub num_assets: u32,
    /// Number of timeline entries
    pub num_timeline_entries: u32,
}

impl HyvcHeader {
    /// Creates a new HYVC header
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        width: u32,
        height: u32,
        fps_num: u32,
        fps_den: u32,
        duration_ms: u64,
        base_qp: u8,
        num_assets: u32,
        num_timeline_entries: u32,
    ) -> Self {
        Self {
            version: VERSION,
            width,
            height,
            fps_num,
            fps_den,
            duration_ms,
            base_qp,
            num_assets,
            num_timeline_entries,
        }
    }

    /// Reads a header from a reader
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::InvalidMagic);
        }

        let version = reader.read_u16::<LittleEndian>()?;
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let width = reader.read_u32::<LittleEndian>()?;
        let height = reader.read_u32::<LittleEndian>()?;
        let fps_num = reader.read_u32::<LittleEndian>()?;
        let fps_den = reader.read_u32::<LittleEndian>()?;
        let duration_ms = reader.read_u64::<LittleEndian>()?;
        let base_qp = reader.read_u8()?;
        let num_assets = reader.read_u32::<LittleEndian>()?;
        let num_timeline_entries = reader.read_u32::<LittleEndian>()?;

        Ok(Self {
            version,
            width,
            height,
            fps_num,
            fps_den,
            duration_ms,
            base_qp,
            num_assets,
            num_timeline_entries,
        })
    }

    /// Writes the header to a writer
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_u16::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.width)?;
        writer.write_u32::<LittleEndian>(self.height)?;
        writer.write_u32::<LittleEndian>(self.fps_num)?;
        writer.write_u32::<LittleEndian>(self.fps_den)?;
        writer.write_u64::<LittleEndian>(self.duration_ms)?;
        writer.write_u8(self.base_qp)?;
        writer.write_u32::<LittleEndian>(self.num_assets)?;
        writer.write_u32::<LittleEndian>(self.num_timeline_entries)?;
        Ok(())
    }
}

/// Complete HYVC container
#[derive(Debug, Clone)]
pub struct HyvcContainer {
    /// Container header
    pub header: HyvcHeader,
    /// List of assets
    pub assets: Vec<Asset>,
    /// Timeline entries
    pub timeline: Vec<TimelineEntry>,
}

impl HyvcContainer {
    /// Creates a new container, filling the header counts from the contents
    pub fn new(mut header: HyvcHeader, assets: Vec<Asset>, timeline: Vec<TimelineEntry>) -> Self {
        header.num_assets = assets.len() as u32;
        header.num_timeline_entries = timeline.len() as u32;
        Self {
            header,
            assets,
            timeline,
        }
    }

    /// Reads a container from a reader and checks that every entry resolves
    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let header = HyvcHeader::read(&mut reader)?;

        let mut assets = Vec::with_capacity((header.num_assets as usize).min(MAX_PREALLOC));
        for _ in 0..header.num_assets {
            let id = reader.read_u32::<LittleEndian>()?;
            let format = AssetFormat::from_tag(reader.read_u8()?)?;
            let width = reader.read_u32::<LittleEndian>()?;
            let height = reader.read_u32::<LittleEndian>()?;
            let data_len = reader.read_u32::<LittleEndian>()?;
            let data = read_bytes(&mut reader, data_len)?;

            assets.push(Asset::new(id, format, width, height, data));
        }

        let mut timeline =
            Vec::with_capacity((header.num_timeline_entries as usize).min(MAX_PREALLOC));
        for _ in 0..header.num_timeline_entries {
            let asset_id = reader.read_u32::<LittleEndian>()?;
            let frame_index = reader.read_u32::<LittleEndian>()?;
            let start_time_ms = reader.read_u64::<LittleEndian>()?;
            let end_time_ms = reader.read_u64::<LittleEndian>()?;
            let position_x = reader.read_u32::<LittleEndian>()?;
            let position_y = reader.read_u32::<LittleEndian>()?;
            let layer = Layer::from_tag(reader.read_u8()?)?;

            timeline.push(TimelineEntry::new(
                asset_id,
                frame_index,
                start_time_ms,
                end_time_ms,
                position_x,
                position_y,
                layer,
            ));
        }

        let container = Self {
            header,
            assets,
            timeline,
        };
        container.validate()?;
        Ok(container)
    }

    /// Writes the container to a writer
    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        self.header.write(&mut writer)?;

        for asset in &self.assets {
            writer.write_u32::<LittleEndian>(asset.id)?;
            writer.write_u8(asset.format.tag())?;
            writer.write_u32::<LittleEndian>(asset.width)?;
            writer.write_u32::<LittleEndian>(asset.height)?;
            writer.write_u32::<LittleEndian>(asset.data.len() as u32)?;
            writer.write_all(&asset.data)?;
        }

        for entry in &self.timeline {
            writer.write_u32::<LittleEndian>(entry.asset_id)?;
            writer.write_u32::<LittleEndian>(entry.frame_index)?;
            writer.write_u64::<LittleEndian>(entry.start_time_ms)?;
            writer.write_u64::<LittleEndian>(entry.end_time_ms)?;
            writer.write_u32::<LittleEndian>(entry.position_x)?;
            writer.write_u32::<LittleEndian>(entry.position_y)?;
            writer.write_u8(entry.layer.tag())?;
        }

        Ok(())
    }

    /// Serializes the container into a byte vector
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.payload_size() + 64);
        self.write(&mut buffer)?;
        Ok(buffer)
    }

    /// Checks that every placement references an existing asset and stays inside the frame
    pub fn validate(&self) -> Result<()> {
        let sizes: HashMap<u32, (u32, u32, AssetFormat)> = self
            .assets
            .iter()
            .map(|a| (a.id, (a.width, a.height, a.format)))
            .collect();

        for entry in &self.timeline {
            let (w, h, format) = *sizes
                .get(&entry.asset_id)
                .ok_or(Error::AssetNotFound(entry.asset_id))?;
            let right = entry.position_x as u64 + w as u64;
            let bottom = entry.position_y as u64 + h as u64;
            if right > self.header.width as u64 || bottom > self.header.height as u64 {
                return Err(Error::InvalidTimelineEntry(format!(
                    "asset {} at ({}, {}) exceeds {}x{} frame",
                    entry.asset_id,
                    entry.position_x,
                    entry.position_y,
                    self.header.width,
                    self.header.height
                )));
            }
            if format == AssetFormat::Stream && entry.layer != Layer::Base {
                return Err(Error::InvalidTimelineEntry(format!(
                    "stream asset {} placed as a refinement",
                    entry.asset_id
                )));
            }
            if entry.layer == Layer::Base && (entry.position_x, entry.position_y) != (0, 0) {
                return Err(Error::InvalidTimelineEntry(format!(
                    "base asset {} is not anchored at the origin",
                    entry.asset_id
                )));
            }
        }
        Ok(())
    }

    /// Gets an asset by ID
    pub fn get_asset(&self, id: u32) -> Option<&Asset> {
        self.assets.iter().find(|a| a.id == id)
    }

    /// Gets all timeline entries active at a given timestamp, base layer first
    pub fn get_active_entries(&self, timestamp_ms: u64) -> Vec<&TimelineEntry> {
        let mut entries: Vec<&TimelineEntry> = self
            .timeline
            .iter()
            .filter(|e| e.is_active(timestamp_ms))
            .collect();

        entries.sort_by_key(|e| (e.layer, e.position_y, e.position_x));
        entries
    }

    /// Gets all entries of one frame, base layer first
    pub fn frame_entries(&self, frame_index: u32) -> Vec<&TimelineEntry> {
        let mut entries: Vec<&TimelineEntry> = self
            .timeline
            .iter()
            .filter(|e| e.frame_index == frame_index)
            .collect();
        entries.sort_by_key(|e| (e.layer, e.position_y, e.position_x));
        entries
    }

    /// Base-layer entries in frame order; one per frame of the stream
    pub fn base_entries(&self) -> Vec<&TimelineEntry> {
        let mut entries: Vec<&TimelineEntry> = self
            .timeline
            .iter()
            .filter(|e| e.layer == Layer::Base)
            .collect();
        entries.sort_by_key(|e| e.frame_index);
        entries
    }

    /// Number of frames in the stream
    pub fn frame_count(&self) -> usize {
        self.timeline.iter().filter(|e| e.layer == Layer::Base).count()
    }

    /// Total bytes of encoded payload, split into (base, refinement). An
    /// asset shared by several entries counts once.
    pub fn layer_sizes(&self) -> (usize, usize) {
        let layers: HashMap<u32, Layer> = self
            .timeline
            .iter()
            .map(|e| (e.asset_id, e.layer))
            .collect();
        let mut base = 0;
        let mut refinement = 0;
        for asset in &self.assets {
            match layers.get(&asset.id) {
                Some(Layer::Base) => base += asset.data_size(),
                Some(Layer::Refinement) => refinement += asset.data_size(),
                None => {}
            }
        }
        (base, refinement)
    }

    /// Total bytes of encoded payload
    pub fn payload_size(&self) -> usize {
        self.assets.iter().map(|a| a.data_size()).sum()
    }

    /// Calculates the frame rate as a float
    pub fn fps(&self) -> f64 {
        if self.header.fps_den == 0 {
            return 0.0;
        }
        self.header.fps_num as f64 / self.header.fps_den as f64
    }
}
