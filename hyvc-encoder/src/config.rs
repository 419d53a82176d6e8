//! Engine configuration
//!
//! Everything here is tunable policy rather than contract: block size, scoring
//! weights, the per-mode QP table and refinement fractions. Values can come
//! from a TOML file; missing keys keep their defaults.

use crate::{Error, Result};
use hyvc_core::HybridMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Region analyzer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Edge length of the square scoring blocks, in pixels
    pub block_size: u32,
    /// Weight of the contrast/gradient term
    pub spatial_weight: f64,
    /// Weight of the inter-frame difference term
    pub temporal_weight: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            block_size: 16,
            spatial_weight: 0.6,
            temporal_weight: 0.4,
        }
    }
}

/// Policy for one hybrid mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModePolicy {
    /// Base-layer quantization parameter (1-51)
    pub qp: u8,
    /// Share of all blocks, across the whole stream, refined losslessly
    pub refine_fraction: f64,
}

/// Per-mode policy table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyTable {
    pub quality: ModePolicy,
    pub balanced: ModePolicy,
    pub size: ModePolicy,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            quality: ModePolicy {
                qp: 18,
                refine_fraction: 0.20,
            },
            balanced: ModePolicy {
                qp: 23,
                refine_fraction: 0.10,
            },
            size: ModePolicy {
                qp: 28,
                refine_fraction: 0.0,
            },
        }
    }
}

impl PolicyTable {
    pub fn get(&self, mode: HybridMode) -> ModePolicy {
        match mode {
            HybridMode::Quality => self.quality,
            HybridMode::Balanced => self.balanced,
            HybridMode::Size => self.size,
        }
    }
}

/// Which codec primitive an engine drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// Inter-coded base stream through FFmpeg (x264, AV1 or x265)
    #[default]
    Video,
    /// Deterministic quantize-and-PNG codec, one still per frame
    Builtin,
    /// AV1 stills through ravif
    Avif,
}

impl FromStr for CodecKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Ok(CodecKind::Video),
            "builtin" => Ok(CodecKind::Builtin),
            "avif" => Ok(CodecKind::Avif),
            other => Err(Error::InvalidConfig(format!("unknown codec '{other}'"))),
        }
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub analyzer: AnalyzerConfig,
    pub policy: PolicyTable,
    /// Worker threads for encode jobs (0 = one per CPU)
    pub workers: usize,
    /// Whole-run timeout in seconds
    pub timeout_secs: Option<u64>,
    /// Upper bound on buffered frame pixels, in bytes
    pub max_buffer_bytes: u64,
    pub codec: CodecKind,
    /// ravif speed preset (1 = slowest, 10 = fastest)
    pub avif_speed: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerConfig::default(),
            policy: PolicyTable::default(),
            workers: 0,
            timeout_secs: None,
            max_buffer_bytes: 4 << 30,
            codec: CodecKind::default(),
            avif_speed: 8,
        }
    }
}

impl EngineConfig {
    /// Parses a TOML document
    pub fn from_toml_str(src: &str) -> Result<Self> {
        let config: Self = toml::from_str(src)
            .map_err(|e| Error::InvalidConfig(format!("engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&src)?;
        tracing::info!(path = %path.display(), "loaded engine configuration");
        Ok(config)
    }

    /// Number of worker threads to spawn
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let a = &self.analyzer;
        if !(4..=128).contains(&a.block_size) {
            return Err(Error::InvalidConfig(format!(
                "block_size must be within 4..=128, got {}",
                a.block_size
            )));
        }
        let weights_ok = a.spatial_weight.is_finite()
            && a.temporal_weight.is_finite()
            && a.spatial_weight >= 0.0
            && a.temporal_weight >= 0.0
            && a.spatial_weight + a.temporal_weight > 0.0;
        if !weights_ok {
            return Err(Error::InvalidConfig(
                "analyzer weights must be non-negative and not both zero".into(),
            ));
        }

        for mode in HybridMode::ALL {
            let p = self.policy.get(mode);
            if !(1..=51).contains(&p.qp) {
                return Err(Error::InvalidConfig(format!(
                    "{mode} qp must be within 1..=51, got {}",
                    p.qp
                )));
            }
            if !(0.0..=1.0).contains(&p.refine_fraction) {
                return Err(Error::InvalidConfig(format!(
                    "{mode} refine_fraction must be within [0, 1], got {}",
                    p.refine_fraction
                )));
            }
        }

        let (q, b, s) = (self.policy.quality, self.policy.balanced, self.policy.size);
        if !(q.qp <= b.qp && b.qp <= s.qp) {
            return Err(Error::InvalidConfig(
                "policy qp must not decrease from quality to balanced to size".into(),
            ));
        }
        if !(q.refine_fraction >= b.refine_fraction && b.refine_fraction >= s.refine_fraction) {
            return Err(Error::InvalidConfig(
                "refine_fraction must not grow from quality to balanced to size".into(),
            ));
        }

        if self.max_buffer_bytes == 0 {
            return Err(Error::InvalidConfig("max_buffer_bytes must be positive".into()));
        }
        if !(1..=10).contains(&self.avif_speed) {
            return Err(Error::InvalidConfig(format!(
                "avif_speed must be within 1..=10, got {}",
                self.avif_speed
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.policy.get(HybridMode::Balanced).qp, 23);
        assert!(config.effective_workers() >= 1);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            workers = 3
            codec = "avif"

            [analyzer]
            block_size = 32

            [policy.size]
            qp = 30
            refine_fraction = 0.02
            "#,
        )
        .unwrap();

        assert_eq!(config.workers, 3);
        assert_eq!(config.codec, CodecKind::Avif);
        assert_eq!(config.analyzer.block_size, 32);
        assert_eq!(config.analyzer.spatial_weight, 0.6);
        assert_eq!(config.policy.size.qp, 30);
        assert_eq!(config.policy.quality.qp, 18);
    }

    #[test]
    fn test_codec_names() {
        assert_eq!(EngineConfig::default().codec, CodecKind::Video);
        assert_eq!("Video".parse::<CodecKind>().unwrap(), CodecKind::Video);
        assert_eq!("builtin".parse::<CodecKind>().unwrap(), CodecKind::Builtin);
        assert!("h264".parse::<CodecKind>().is_err());
    }

    #[test]
    fn test_non_monotonic_table_rejected() {
        let mut config = EngineConfig::default();
        config.policy.balanced.qp = 30;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = EngineConfig::default();
        config.policy.size.refine_fraction = 0.5;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_block_size_rejected() {
        let err = EngineConfig::from_toml_str("[analyzer]\nblock_size = 2\n").unwrap_err();
        assert!(err.to_string().contains("block_size"));
    }
}
