//! Region importance scoring
//!
//! Each frame is split into square blocks. A block's score mixes a spatial
//! term (local contrast plus edge energy) with a temporal term (mean absolute
//! luma change against the previous frame). Both terms are normalized by
//! their per-frame maximum before weighting, and the combined score is
//! normalized again, so scores are comparable across frames and lie in
//! `[0, 1]`.
//!
//! All accumulation is integer; identical frames always yield identical maps.

use crate::config::AnalyzerConfig;
use crate::frame::{luma_plane, Frame};
use hyvc_core::ImportanceMap;
use image::RgbImage;

/// Raw (unnormalized) per-block terms
struct BlockTerms {
    spatial: Vec<f64>,
    temporal: Option<Vec<f64>>,
}

/// Contrast and edge energy of the block at (x0, y0)
fn spatial_term(luma: &[u8], width: usize, x0: usize, y0: usize, bw: usize, bh: usize) -> f64 {
    let mut sum: u64 = 0;
    let mut sum_sq: u64 = 0;
    let mut grad: u64 = 0;

    for y in y0..y0 + bh {
        let row = &luma[y * width..(y + 1) * width];
        for x in x0..x0 + bw {
            let v = row[x] as u64;
            sum += v;
            sum_sq += v * v;

            if x + 1 < x0 + bw {
                let d = row[x + 1].abs_diff(row[x]) as u64;
                grad += d * d;
            }
            if y + 1 < y0 + bh {
                let d = luma[(y + 1) * width + x].abs_diff(row[x]) as u64;
                grad += d * d;
            }
        }
    }

    let n = (bw * bh) as u64;
    // n * variance * n, exact in integers
    let var_scaled = n * sum_sq - sum * sum;
    let variance = var_scaled as f64 / (n * n) as f64;
    let gradient_energy = grad as f64 / n as f64;
    variance + gradient_energy / 2.0
}

/// Mean absolute luma change of the block against the previous frame
fn temporal_term(
    luma: &[u8],
    prev: &[u8],
    width: usize,
    x0: usize,
    y0: usize,
    bw: usize,
    bh: usize,
) -> f64 {
    let mut total: u64 = 0;
    for y in y0..y0 + bh {
        let start = y * width + x0;
        total += luma[start..start + bw]
            .iter()
            .zip(&prev[start..start + bw])
            .map(|(a, b)| a.abs_diff(*b) as u64)
            .sum::<u64>();
    }
    total as f64 / (bw * bh) as f64
}

fn collect_terms(
    luma: &[u8],
    prev: Option<&[u8]>,
    width: u32,
    height: u32,
    block_size: u32,
) -> (u32, u32, BlockTerms) {
    let cols = ImportanceMap::grid_len(width, block_size);
    let rows = ImportanceMap::grid_len(height, block_size);
    let w = width as usize;
    let bs = block_size as usize;
    let count = (cols * rows) as usize;

    let mut spatial = Vec::with_capacity(count);
    let mut temporal = prev.map(|_| Vec::with_capacity(count));

    for row in 0..rows as usize {
        let y0 = row * bs;
        let bh = bs.min(height as usize - y0);
        for col in 0..cols as usize {
            let x0 = col * bs;
            let bw = bs.min(w - x0);
            spatial.push(spatial_term(luma, w, x0, y0, bw, bh));
            if let (Some(prev), Some(t)) = (prev, temporal.as_mut()) {
                t.push(temporal_term(luma, prev, w, x0, y0, bw, bh));
            }
        }
    }

    (cols, rows, BlockTerms { spatial, temporal })
}

/// Scales a term so its largest value becomes 1; all-zero stays all-zero
fn normalize(values: &mut [f64]) {
    let max = values.iter().copied().fold(0.0f64, f64::max);
    if max > 0.0 {
        values.iter_mut().for_each(|v| *v /= max);
    }
}

/// Scores one frame's luma plane. Without a usable previous plane the score
/// is spatial only.
pub fn score_luma(
    frame_index: u32,
    luma: &[u8],
    prev: Option<&[u8]>,
    width: u32,
    height: u32,
    config: &AnalyzerConfig,
) -> ImportanceMap {
    let block_size = config.block_size;
    if width == 0 || height == 0 {
        return ImportanceMap::new(frame_index, block_size, 0, 0, Vec::new());
    }
    let prev = prev.filter(|p| p.len() == luma.len());
    let (cols, rows, mut terms) = collect_terms(luma, prev, width, height, block_size);

    normalize(&mut terms.spatial);
    let mut combined: Vec<f64> = match terms.temporal.as_mut() {
        Some(temporal) => {
            normalize(temporal);
            terms
                .spatial
                .iter()
                .zip(temporal.iter())
                .map(|(s, t)| config.spatial_weight * s + config.temporal_weight * t)
                .collect()
        }
        None => terms.spatial,
    };
    normalize(&mut combined);

    let scores = combined.into_iter().map(|v| v as f32).collect();
    ImportanceMap::new(frame_index, block_size, cols, rows, scores)
}

/// Scores frames of one stream in order, remembering the previous frame
pub struct RegionAnalyzer {
    config: AnalyzerConfig,
    previous: Option<(u32, u32, Vec<u8>)>,
}

impl RegionAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            previous: None,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Scores a frame. Frames must arrive in stream order.
    pub fn analyze(&mut self, frame: &Frame) -> ImportanceMap {
        self.analyze_image(frame.index, &frame.image)
    }

    /// Same as [`analyze`](Self::analyze) for a picture held outside a [`Frame`]
    pub fn analyze_image(&mut self, frame_index: u32, image: &RgbImage) -> ImportanceMap {
        let (width, height) = image.dimensions();
        let luma = luma_plane(image);

        let prev = match &self.previous {
            Some((pw, ph, plane)) if (*pw, *ph) == (width, height) => Some(plane.as_slice()),
            _ => None,
        };
        let map = score_luma(frame_index, &luma, prev, width, height, &self.config);

        self.previous = Some((width, height, luma));
        map
    }
}
