//! Timeline data structures for HYVC streams

use crate::{Error, Result};

/// Compositing layer of a placed asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    /// Full-frame lossy base
    Base,
    /// Lossless patch drawn over the base
    Refinement,
}

impl Layer {
    pub fn tag(self) -> u8 {
        match self {
            Layer::Base => 0,
            Layer::Refinement => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Layer::Base),
            1 => Ok(Layer::Refinement),
            other => Err(Error::UnknownLayer(other)),
        }
    }
}

/// Describes which asset is drawn for which frame, and where
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEntry {
    /// Asset ID to display
    pub asset_id: u32,
    /// Frame the asset belongs to
    pub frame_index: u32,
    /// Start time in milliseconds
    pub start_time_ms: u64,
    /// End time in milliseconds (exclusive)
    pub end_time_ms: u64,
    /// X position of the asset's top-left corner
    pub position_x: u32,
    /// Y position of the asset's top-left corner
    pub position_y: u32,
    /// Compositing layer
    pub layer: Layer,
}

impl TimelineEntry {
    /// Creates a new timeline entry
    pub fn new(
        asset_id: u32,
        frame_index: u32,
        start_time_ms: u64,
        end_time_ms: u64,
        position_x: u32,
        position_y: u32,
        layer: Layer,
    ) -> Self {
        Self {
            asset_id,
            frame_index,
            start_time_ms,
            end_time_ms,
            position_x,
            position_y,
            layer,
        }
    }

    /// Checks if this entry is active at the given timestamp
    pub fn is_active(&self, timestamp_ms: u64) -> bool {
        timestamp_ms >= self.start_time_ms && timestamp_ms < self.end_time_ms
    }

    /// Returns the duration of this entry in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.end_time_ms.saturating_sub(self.start_time_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_window_is_half_open() {
        let entry = TimelineEntry::new(3, 1, 33, 66, 0, 0, Layer::Base);
        assert!(!entry.is_active(32));
        assert!(entry.is_active(33));
        assert!(entry.is_active(65));
        assert!(!entry.is_active(66));
        assert_eq!(entry.duration_ms(), 33);
    }

    #[test]
    fn test_layer_tags() {
        assert_eq!(Layer::from_tag(Layer::Refinement.tag()).unwrap(), Layer::Refinement);
        assert!(Layer::Base < Layer::Refinement);
        assert!(matches!(Layer::from_tag(7), Err(Error::UnknownLayer(7))));
    }
}
