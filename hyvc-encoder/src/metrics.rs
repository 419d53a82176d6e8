//! Measured fidelity: decode the compressed stream and compare it with the
//! source frames on BT.601 luma

use crate::cancel::CancelToken;
use crate::frame::{luma_plane, resize_to, LumaFrame};
use crate::Result;
use hyvc_core::HyvcContainer;
use hyvc_decoder::FrameCompositor;
use std::time::{Duration, Instant};

/// PSNR reported for identical frames
pub const PSNR_CAP_DB: f64 = 100.0;

const SSIM_WINDOW: usize = 8;
const SSIM_STRIDE: usize = 4;
const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// Result of one measurement pass
#[derive(Debug, Clone, PartialEq)]
pub struct MeasuredQuality {
    /// Mean per-frame PSNR in dB
    pub psnr: f64,
    /// Mean per-frame SSIM in [0, 1]
    pub ssim: f64,
    pub frames_compared: usize,
    /// Time spent parsing and decoding the compressed stream
    pub decode_time: Duration,
}

/// PSNR between two equally sized 8-bit planes
pub fn psnr(a: &[u8], b: &[u8]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return PSNR_CAP_DB;
    }
    let sse: u64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x.abs_diff(y) as u64;
            d * d
        })
        .sum();
    if sse == 0 {
        return PSNR_CAP_DB;
    }
    let mse = sse as f64 / n as f64;
    (10.0 * (255.0 * 255.0 / mse).log10()).min(PSNR_CAP_DB)
}

/// SSIM of one window given its sums
fn window_ssim(n: f64, sa: u64, sb: u64, saa: u64, sbb: u64, sab: u64) -> f64 {
    let mu_a = sa as f64 / n;
    let mu_b = sb as f64 / n;
    let var_a = (saa as f64 / n - mu_a * mu_a).max(0.0);
    let var_b = (sbb as f64 / n - mu_b * mu_b).max(0.0);
    let cov = sab as f64 / n - mu_a * mu_b;
    ((2.0 * mu_a * mu_b + C1) * (2.0 * cov + C2))
        / ((mu_a * mu_a + mu_b * mu_b + C1) * (var_a + var_b + C2))
}

/// Sums over the window at (x0, y0)
fn window_at(a: &[u8], b: &[u8], width: usize, x0: usize, y0: usize, ww: usize, wh: usize) -> f64 {
    let (mut sa, mut sb, mut saa, mut sbb, mut sab) = (0u64, 0u64, 0u64, 0u64, 0u64);
    for y in y0..y0 + wh {
        let start = y * width + x0;
        for (&pa, &pb) in a[start..start + ww].iter().zip(&b[start..start + ww]) {
            let (pa, pb) = (pa as u64, pb as u64);
            sa += pa;
            sb += pb;
            saa += pa * pa;
            sbb += pb * pb;
            sab += pa * pb;
        }
    }
    window_ssim((ww * wh) as f64, sa, sb, saa, sbb, sab)
}

/// Mean SSIM over 8x8 windows at stride 4. Planes smaller than one window
/// are scored as a single window.
pub fn ssim(a: &[u8], b: &[u8], width: u32, height: u32) -> f64 {
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 || a.len() < w * h || b.len() < w * h {
        return 0.0;
    }
    if w < SSIM_WINDOW || h < SSIM_WINDOW {
        return window_at(a, b, w, 0, 0, w, h).clamp(0.0, 1.0);
    }

    let mut total = 0.0;
    let mut windows = 0usize;
    for y0 in (0..=h - SSIM_WINDOW).step_by(SSIM_STRIDE) {
        for x0 in (0..=w - SSIM_WINDOW).step_by(SSIM_STRIDE) {
            total += window_at(a, b, w, x0, y0, SSIM_WINDOW, SSIM_WINDOW);
            windows += 1;
        }
    }
    (total / windows as f64).clamp(0.0, 1.0)
}

/// Index of the original frame closest in time; ties go to the earlier frame
fn nearest_by_time(originals: &[LumaFrame], timestamp_ms: u64) -> usize {
    let after = originals.partition_point(|f| f.timestamp_ms < timestamp_ms);
    if after == 0 {
        return 0;
    }
    if after == originals.len() {
        return originals.len() - 1;
    }
    let before = after - 1;
    let d_before = timestamp_ms - originals[before].timestamp_ms;
    let d_after = originals[after].timestamp_ms - timestamp_ms;
    if d_after < d_before {
        after
    } else {
        before
    }
}

/// Compares decoded output against source frames
#[derive(Debug, Default, Clone)]
pub struct MetricsEngine;

impl MetricsEngine {
    pub fn new() -> Self {
        Self
    }

    /// Decodes `compressed` frame by frame and scores each decoded frame
    /// against its source luma. Frames pair by index when counts match,
    /// otherwise by nearest timestamp. `cancel` is checked before every frame.
    pub fn measure(
        &self,
        originals: &[LumaFrame],
        compressed: &[u8],
        cancel: &CancelToken,
    ) -> Result<MeasuredQuality> {
        let mut decode_time = Duration::ZERO;

        let started = Instant::now();
        let container = HyvcContainer::read(compressed)?;
        let compositor = FrameCompositor::new(container);
        let total = compositor.container().base_entries().len();
        decode_time += started.elapsed();

        if originals.is_empty() || total == 0 {
            return Ok(MeasuredQuality {
                psnr: 0.0,
                ssim: 0.0,
                frames_compared: 0,
                decode_time,
            });
        }
        let by_index = total == originals.len();

        let (mut psnr_sum, mut ssim_sum) = (0.0, 0.0);
        let mut decoded_frames = compositor.frames();
        for position in 0..total {
            cancel.check()?;
            let started = Instant::now();
            let next = decoded_frames.next();
            decode_time += started.elapsed();
            let decoded = match next {
                Some(decoded) => decoded?,
                None => break,
            };

            let original = if by_index {
                &originals[position]
            } else {
                &originals[nearest_by_time(originals, decoded.timestamp_ms)]
            };
            let (ow, oh) = (original.width, original.height);
            let test = luma_plane(&resize_to(&decoded.image, ow, oh));
            psnr_sum += psnr(&original.plane, &test);
            ssim_sum += ssim(&original.plane, &test, ow, oh);
        }

        let n = total as f64;
        let measured = MeasuredQuality {
            psnr: psnr_sum / n,
            ssim: (ssim_sum / n).clamp(0.0, 1.0),
            frames_compared: total,
            decode_time,
        };
        tracing::debug!(
            psnr = measured.psnr,
            ssim = measured.ssim,
            frames = measured.frames_compared,
            decode_ms = decode_time.as_millis() as u64,
            "measured fidelity"
        );
        Ok(measured)
    }
}
