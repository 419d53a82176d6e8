//! Resolved encoding plan for one compression run

use crate::{BlockCoord, HybridMode};
use serde::{Deserialize, Serialize};

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Rounds both axes down to the nearest even value
    pub fn floor_even(self) -> Self {
        Self {
            width: self.width & !1,
            height: self.height & !1,
        }
    }

    pub fn is_even(self) -> bool {
        self.width % 2 == 0 && self.height % 2 == 0
    }
}

/// How a block is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegionTreatment {
    LossyOnly,
    LosslessRefine,
}

/// Treatment decision for one block of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionDirective {
    pub frame_index: u32,
    pub block: BlockCoord,
    pub treatment: RegionTreatment,
}

/// Everything the orchestrator needs to encode a stream. Blocks without an
/// explicit directive are `LossyOnly`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingPlan {
    mode: HybridMode,
    dimensions: Dimensions,
    base_qp: u8,
    qp_overridden: bool,
    block_size: u32,
    refined_blocks: usize,
    #[serde(skip)]
    directives: Vec<RegionDirective>,
}

impl EncodingPlan {
    pub fn new(
        mode: HybridMode,
        dimensions: Dimensions,
        base_qp: u8,
        qp_overridden: bool,
        block_size: u32,
        mut directives: Vec<RegionDirective>,
    ) -> Self {
        directives.sort_by_key(|d| (d.frame_index, d.block));
        directives.dedup_by_key(|d| (d.frame_index, d.block));
        let refined_blocks = directives
            .iter()
            .filter(|d| d.treatment == RegionTreatment::LosslessRefine)
            .count();
        Self {
            mode,
            dimensions,
            base_qp,
            qp_overridden,
            block_size,
            refined_blocks,
            directives,
        }
    }

    pub fn mode(&self) -> HybridMode {
        self.mode
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn base_qp(&self) -> u8 {
        self.base_qp
    }

    pub fn qp_overridden(&self) -> bool {
        self.qp_overridden
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Directives sorted by (frame, row, column)
    pub fn directives(&self) -> &[RegionDirective] {
        &self.directives
    }

    pub fn refined_block_count(&self) -> usize {
        self.refined_blocks
    }

    /// Directives of a single frame
    pub fn frame_directives(&self, frame_index: u32) -> &[RegionDirective] {
        let start = self.directives.partition_point(|d| d.frame_index < frame_index);
        let end = self.directives.partition_point(|d| d.frame_index <= frame_index);
        &self.directives[start..end]
    }

    /// Blocks of a frame flagged for lossless refinement, row-major
    pub fn refined_blocks(&self, frame_index: u32) -> impl Iterator<Item = BlockCoord> + '_ {
        self.frame_directives(frame_index)
            .iter()
            .filter(|d| d.treatment == RegionTreatment::LosslessRefine)
            .map(|d| d.block)
    }

    pub fn treatment(&self, frame_index: u32, block: BlockCoord) -> RegionTreatment {
        let frame = self.frame_directives(frame_index);
        match frame.binary_search_by_key(&block, |d| d.block) {
            Ok(i) => frame[i].treatment,
            Err(_) => RegionTreatment::LossyOnly,
        }
    }
}
