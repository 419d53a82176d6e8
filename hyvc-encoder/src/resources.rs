//! Process resource sampling for performance metrics

use std::time::{Duration, Instant};

/// CPU time and peak resident memory of this process
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    pub cpu_time: Duration,
    pub peak_rss_bytes: u64,
}

#[cfg(unix)]
pub fn current_usage() -> ResourceUsage {
    let mut raw = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    // SAFETY: getrusage only writes into the struct we pass
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, raw.as_mut_ptr()) };
    if rc != 0 {
        return ResourceUsage::default();
    }
    // SAFETY: zero-initialized and filled by a successful call
    let usage = unsafe { raw.assume_init() };

    let to_duration = |tv: libc::timeval| {
        Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
    };

    // ru_maxrss is KiB on Linux, bytes on macOS
    let maxrss = usage.ru_maxrss.max(0) as u64;
    let peak_rss_bytes = if cfg!(target_os = "macos") { maxrss } else { maxrss * 1024 };

    ResourceUsage {
        cpu_time: to_duration(usage.ru_utime) + to_duration(usage.ru_stime),
        peak_rss_bytes,
    }
}

#[cfg(not(unix))]
pub fn current_usage() -> ResourceUsage {
    ResourceUsage::default()
}

/// Measures wall time, CPU time and peak memory across a span of work
#[derive(Debug)]
pub struct ResourceSampler {
    started: Instant,
    baseline: ResourceUsage,
}

/// What a [`ResourceSampler`] observed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceReport {
    pub wall_time: Duration,
    /// CPU time over wall time, in percent; above 100 with several busy cores
    pub cpu_percent: f64,
    pub peak_memory_mib: f64,
}

impl ResourceSampler {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            baseline: current_usage(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn finish(&self) -> ResourceReport {
        let wall_time = self.started.elapsed();
        let now = current_usage();
        let cpu = now.cpu_time.saturating_sub(self.baseline.cpu_time);
        let cpu_percent = if wall_time.is_zero() {
            0.0
        } else {
            cpu.as_secs_f64() / wall_time.as_secs_f64() * 100.0
        };
        ResourceReport {
            wall_time,
            cpu_percent,
            peak_memory_mib: now.peak_rss_bytes as f64 / (1024.0 * 1024.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_busy_loop_registers_cpu() {
        let sampler = ResourceSampler::start();
        let mut acc = 0u64;
        while sampler.elapsed() < Duration::from_millis(50) {
            acc = std::hint::black_box(acc.wrapping_mul(31).wrapping_add(7));
        }
        let report = sampler.finish();
        assert!(report.cpu_percent > 0.0);
        assert!(report.peak_memory_mib > 0.0);
        assert!(report.wall_time >= Duration::from_millis(50));
    }
}
