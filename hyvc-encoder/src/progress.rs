//! Stage progress with ETA estimation

use hyvc_core::Stage;
use std::time::Instant;

/// Share of the overall 0-100 range each stage occupies
pub fn stage_span(stage: Stage) -> (f64, f64) {
    match stage {
        Stage::Idle => (0.0, 0.0),
        Stage::Analyzing => (0.0, 15.0),
        Stage::EncodingLossy => (15.0, 65.0),
        Stage::EncodingLossless => (65.0, 90.0),
        Stage::Finalizing => (90.0, 99.0),
        Stage::Complete => (100.0, 100.0),
        Stage::Error | Stage::Cancelled => (0.0, 0.0),
    }
}

/// Tracks completed work within one stage and maps it onto overall progress
#[derive(Debug)]
pub struct ProgressTracker {
    stage: Stage,
    total: u64,
    processed: u64,
    start_time: Instant,
}

impl ProgressTracker {
    /// `total` may be an estimate; progress is capped at the stage's end
    pub fn new(stage: Stage, total: u64) -> Self {
        Self {
            stage,
            total,
            processed: 0,
            start_time: Instant::now(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn advance(&mut self, n: u64) {
        self.processed += n;
    }

    /// Raises the total when an estimate turned out too low
    pub fn set_total(&mut self, total: u64) {
        self.total = total.max(self.processed);
    }

    fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.processed as f64 / self.total as f64).min(1.0)
    }

    /// Overall progress in percent
    pub fn overall(&self) -> f64 {
        let (start, end) = stage_span(self.stage);
        start + (end - start) * self.fraction()
    }

    /// Seconds left in this stage at the rate observed so far
    pub fn eta_secs(&self) -> Option<f64> {
        if self.processed == 0 || self.processed >= self.total {
            return None;
        }
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let rate = self.processed as f64 / elapsed.max(f64::EPSILON);
        Some((self.total - self.processed) as f64 / rate)
    }

    /// Status line, e.g. "Encoding base layer 12/40 - ETA: 3.1s"
    pub fn message(&self, label: &str) -> String {
        match self.eta_secs() {
            Some(eta) => format!(
                "{label} {}/{} - ETA: {}",
                self.processed,
                self.total,
                format_duration(eta)
            ),
            None => format!("{label} {}/{}", self.processed, self.total),
        }
    }
}

/// Formats seconds into a human-readable duration string
pub fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor() as u64;
        let remaining = secs - (mins as f64 * 60.0);
        format!("{}m {:.0}s", mins, remaining)
    } else {
        let hours = (secs / 3600.0).floor() as u64;
        let remaining = secs - (hours as f64 * 3600.0);
        let mins = (remaining / 60.0).floor() as u64;
        format!("{}h {}m {:.0}s", hours, mins, remaining - (mins as f64 * 60.0))
    }
}
