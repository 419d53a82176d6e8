//! Hybrid encoding policy: turns a mode, importance statistics and a target
//! resolution into an [`EncodingPlan`]

use crate::config::PolicyTable;
use crate::{Error, Result};
use hyvc_core::{
    BlockCoord, CompressionConfig, Dimensions, EncodingPlan, ImportanceMap, RegionDirective,
    RegionTreatment, Resolution,
};
use std::cmp::Ordering;

/// A block that scored above zero somewhere in the stream
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    score: f32,
    frame_index: u32,
    block: BlockCoord,
}

impl Candidate {
    /// Highest score first; ties go to the earlier frame, then row-major block order
    fn rank(a: &Self, b: &Self) -> Ordering {
        b.score
            .total_cmp(&a.score)
            .then(a.frame_index.cmp(&b.frame_index))
            .then(a.block.cmp(&b.block))
    }
}

/// Importance statistics aggregated over every analyzed frame
#[derive(Debug, Clone, Default)]
pub struct ImportanceStats {
    frames: u32,
    total_blocks: u64,
    score_sum: f64,
    candidates: Vec<Candidate>,
}

impl ImportanceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, map: &ImportanceMap) {
        self.frames += 1;
        self.total_blocks += map.block_count() as u64;
        for (block, score) in map.iter() {
            self.score_sum += score as f64;
            if score > 0.0 {
                self.candidates.push(Candidate {
                    score,
                    frame_index: map.frame_index(),
                    block,
                });
            }
        }
    }

    pub fn frame_count(&self) -> u32 {
        self.frames
    }

    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// Blocks with a non-zero score
    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn mean_score(&self) -> f64 {
        if self.total_blocks == 0 {
            return 0.0;
        }
        self.score_sum / self.total_blocks as f64
    }
}

/// Maps configuration and analysis results onto an encoding plan
#[derive(Debug, Clone)]
pub struct HybridPolicy {
    table: PolicyTable,
    block_size: u32,
}

impl HybridPolicy {
    pub fn new(table: PolicyTable, block_size: u32) -> Self {
        Self { table, block_size }
    }

    /// Output dimensions for a source and a target preset. Presets fit the
    /// source inside their box, preserving aspect ratio; both axes end up even.
    pub fn resolve_dimensions(source: Dimensions, target: Resolution) -> Result<Dimensions> {
        if source.width == 0 || source.height == 0 {
            return Err(Error::InvalidConfig(format!(
                "source has no pixels ({}x{})",
                source.width, source.height
            )));
        }

        let fitted = match target.bounding_box() {
            None => source,
            Some((box_w, box_h)) => {
                let (sw, sh) = (source.width as u64, source.height as u64);
                let (bw, bh) = (box_w as u64, box_h as u64);
                // Compare sw/sh against bw/bh without division
                if sw * bh > bw * sh {
                    Dimensions::new(box_w, ((bw * sh + sw / 2) / sw) as u32)
                } else {
                    Dimensions::new(((bh * sw + sh / 2) / sh) as u32, box_h)
                }
            }
        };

        let even = fitted.floor_even();
        if even.width < 2 || even.height < 2 {
            return Err(Error::InvalidConfig(format!(
                "{}x{} cannot be scaled to {target}",
                source.width, source.height
            )));
        }
        Ok(even)
    }

    /// Base QP for the run and whether the caller overrode it
    pub fn resolve_qp(&self, config: &CompressionConfig) -> Result<(u8, bool)> {
        match config.lossy_quality {
            Some(qp) if CompressionConfig::LOSSY_QUALITY_RANGE.contains(&qp) => Ok((qp, true)),
            Some(qp) => Err(Error::InvalidConfig(format!(
                "lossy quality must be within {}..={}, got {qp}",
                CompressionConfig::LOSSY_QUALITY_RANGE.start(),
                CompressionConfig::LOSSY_QUALITY_RANGE.end()
            ))),
            None => Ok((self.table.get(config.hybrid_mode).qp, false)),
        }
    }

    /// Picks the stream-wide top `refine_fraction` of blocks for lossless
    /// refinement. Blocks scoring zero are never picked.
    pub fn select_regions(
        &self,
        config: &CompressionConfig,
        stats: &ImportanceStats,
    ) -> Vec<RegionDirective> {
        let fraction = self.table.get(config.hybrid_mode).refine_fraction;
        let budget = (fraction * stats.total_blocks as f64).floor() as usize;
        let take = budget.min(stats.candidates.len());
        if take == 0 {
            return Vec::new();
        }

        let mut ranked = stats.candidates.clone();
        if take < ranked.len() {
            ranked.select_nth_unstable_by(take - 1, Candidate::rank);
            ranked.truncate(take);
        }

        ranked
            .into_iter()
            .map(|c| RegionDirective {
                frame_index: c.frame_index,
                block: c.block,
                treatment: RegionTreatment::LosslessRefine,
            })
            .collect()
    }

    /// Builds the immutable plan for a run
    pub fn plan(
        &self,
        config: &CompressionConfig,
        dimensions: Dimensions,
        stats: &ImportanceStats,
    ) -> Result<EncodingPlan> {
        let (base_qp, overridden) = self.resolve_qp(config)?;
        let directives = self.select_regions(config, stats);
        tracing::debug!(
            mode = %config.hybrid_mode,
            base_qp,
            overridden,
            refined = directives.len(),
            total_blocks = stats.total_blocks,
            "encoding plan resolved"
        );
        Ok(EncodingPlan::new(
            config.hybrid_mode,
            dimensions,
            base_qp,
            overridden,
            self.block_size,
            directives,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyvc_core::HybridMode;

    fn dims(w: u32, h: u32) -> Dimensions {
        Dimensions::new(w, h)
    }

    fn stats_from(maps: &[ImportanceMap]) -> ImportanceStats {
        let mut stats = ImportanceStats::new();
        maps.iter().for_each(|m| stats.record(m));
        stats
    }

    #[test]
    fn test_original_rounds_down_to_even() {
        let out = HybridPolicy::resolve_dimensions(dims(1921, 1081), Resolution::Original).unwrap();
        assert_eq!(out, dims(1920, 1080));
    }

    #[test]
    fn test_presets_preserve_aspect() {
        let cases = [
            (dims(1920, 1080), Resolution::P720, dims(1280, 720)),
            (dims(640, 360), Resolution::P240, dims(426, 240)),
            (dims(1080, 1920), Resolution::P720, dims(404, 720)),
            (dims(1000, 1000), Resolution::P480, dims(480, 480)),
            (dims(320, 180), Resolution::P1080, dims(1920, 1080)),
        ];
        for (source, target, expected) in cases {
            let out = HybridPolicy::resolve_dimensions(source, target).unwrap();
            assert_eq!(out, expected, "{source:?} -> {target}");
            assert!(out.is_even());
        }
    }

    #[test]
    fn test_degenerate_sizes_rejected() {
        assert!(HybridPolicy::resolve_dimensions(dims(1, 1), Resolution::Original).is_err());
        assert!(HybridPolicy::resolve_dimensions(dims(4000, 2), Resolution::P144).is_err());
    }

    #[test]
    fn test_override_replaces_mode_qp() {
        let policy = HybridPolicy::new(PolicyTable::default(), 16);
        let config = CompressionConfig::new(HybridMode::Size, Resolution::Original);
        assert_eq!(policy.resolve_qp(&config).unwrap(), (28, false));
        assert_eq!(
            policy.resolve_qp(&config.with_lossy_quality(19)).unwrap(),
            (19, true)
        );
        assert!(matches!(
            policy.resolve_qp(&config.with_lossy_quality(30)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_selection_takes_top_fraction_with_stable_ties() {
        let maps = [
            ImportanceMap::new(0, 16, 4, 1, vec![0.5, 1.0, 0.0, 0.5]),
            ImportanceMap::new(1, 16, 4, 1, vec![0.5, 0.2, 1.0, 0.1]),
        ];
        let stats = stats_from(&maps);
        assert_eq!(stats.candidate_count(), 7);

        let mut table = PolicyTable::default();
        table.balanced.refine_fraction = 0.5;
        let policy = HybridPolicy::new(table, 16);
        let config = CompressionConfig::new(HybridMode::Balanced, Resolution::Original);

        let mut picked: Vec<(u32, u32)> = policy
            .select_regions(&config, &stats)
            .iter()
            .map(|d| (d.frame_index, d.block.col))
            .collect();
        picked.sort();
        // two 1.0 blocks, then the first two 0.5 blocks in (frame, block) order
        assert_eq!(picked, vec![(0, 0), (0, 1), (0, 3), (1, 2)]);
    }

    #[test]
    fn test_override_does_not_change_selection() {
        let maps = [ImportanceMap::new(0, 16, 10, 1, (0..10).map(|i| i as f32 / 9.0).collect())];
        let stats = stats_from(&maps);
        let policy = HybridPolicy::new(PolicyTable::default(), 16);
        let config = CompressionConfig::new(HybridMode::Quality, Resolution::Original);

        let plain = policy.plan(&config, dims(160, 16), &stats).unwrap();
        let overridden = policy
            .plan(&config.with_lossy_quality(26), dims(160, 16), &stats)
            .unwrap();
        assert_eq!(plain.directives(), overridden.directives());
        assert_eq!(plain.refined_block_count(), 2);
        assert_eq!(overridden.base_qp(), 26);
    }

    #[test]
    fn test_size_mode_disables_refinement() {
        let maps = [ImportanceMap::new(0, 16, 2, 2, vec![1.0; 4])];
        let policy = HybridPolicy::new(PolicyTable::default(), 16);
        let config = CompressionConfig::new(HybridMode::Size, Resolution::Original);
        let plan = policy.plan(&config, dims(32, 32), &stats_from(&maps)).unwrap();
        assert_eq!(plan.refined_block_count(), 0);
    }

    #[test]
    fn test_zero_scores_never_selected() {
        let maps = [ImportanceMap::new(0, 16, 5, 1, vec![0.0, 0.0, 0.0, 0.0, 0.3])];
        let mut table = PolicyTable::default();
        table.quality.refine_fraction = 1.0;
        let policy = HybridPolicy::new(table, 16);
        let config = CompressionConfig::new(HybridMode::Quality, Resolution::Original);
        let picked = policy.select_regions(&config, &stats_from(&maps));
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].block, BlockCoord::new(4, 0));
    }
}
