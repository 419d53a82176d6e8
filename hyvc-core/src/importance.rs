//! Per-frame block importance grids

use serde::{Deserialize, Serialize};

/// Block position in the importance grid (column, row)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockCoord {
    pub row: u32,
    pub col: u32,
}

impl BlockCoord {
    pub fn new(col: u32, row: u32) -> Self {
        Self { row, col }
    }

    /// Pixel rectangle `(x, y, w, h)` covered by the block, clipped to the frame
    pub fn pixel_rect(&self, block_size: u32, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let x = self.col * block_size;
        let y = self.row * block_size;
        let w = block_size.min(width.saturating_sub(x));
        let h = block_size.min(height.saturating_sub(y));
        (x, y, w, h)
    }
}

/// Importance scores in [0, 1] for every block of one frame, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct ImportanceMap {
    frame_index: u32,
    block_size: u32,
    cols: u32,
    rows: u32,
    scores: Vec<f32>,
}

impl ImportanceMap {
    /// Builds a map; `scores` must hold `cols * rows` values in row-major order
    pub fn new(frame_index: u32, block_size: u32, cols: u32, rows: u32, scores: Vec<f32>) -> Self {
        assert_eq!(
            scores.len(),
            (cols * rows) as usize,
            "importance grid size does not match score count"
        );
        Self {
            frame_index,
            block_size,
            cols,
            rows,
            scores,
        }
    }

    /// Number of blocks needed to cover `len` pixels
    pub fn grid_len(len: u32, block_size: u32) -> u32 {
        len.div_ceil(block_size)
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn block_count(&self) -> usize {
        self.scores.len()
    }

    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    pub fn score(&self, block: BlockCoord) -> Option<f32> {
        if block.col >= self.cols || block.row >= self.rows {
            return None;
        }
        self.scores
            .get((block.row * self.cols + block.col) as usize)
            .copied()
    }

    /// Blocks with their scores in row-major order
    pub fn iter(&self) -> impl Iterator<Item = (BlockCoord, f32)> + '_ {
        let cols = self.cols;
        self.scores.iter().enumerate().map(move |(i, &s)| {
            let i = i as u32;
            (BlockCoord::new(i % cols, i / cols), s)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_blocks_are_clipped() {
        let block = BlockCoord::new(2, 1);
        assert_eq!(block.pixel_rect(16, 40, 20), (32, 16, 8, 4));
        assert_eq!(ImportanceMap::grid_len(40, 16), 3);
        assert_eq!(ImportanceMap::grid_len(32, 16), 2);
    }

    #[test]
    fn test_iteration_is_row_major() {
        let map = ImportanceMap::new(0, 16, 3, 2, vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5]);
        let order: Vec<BlockCoord> = map.iter().map(|(b, _)| b).collect();
        assert_eq!(order[1], BlockCoord::new(1, 0));
        assert_eq!(order[3], BlockCoord::new(0, 1));
        assert_eq!(map.score(BlockCoord::new(2, 1)), Some(0.5));
        assert_eq!(map.score(BlockCoord::new(3, 0)), None);
    }
}
