//! Data model shared with callers and presentation layers

use crate::{EncodingPlan, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Named policy bundle selecting the quantization level and ROI aggressiveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HybridMode {
    /// Lowest QP, widest lossless refinement set
    Quality,
    #[default]
    Balanced,
    /// Highest QP, refinement narrowed or disabled
    Size,
}

impl HybridMode {
    pub const ALL: [HybridMode; 3] = [HybridMode::Quality, HybridMode::Balanced, HybridMode::Size];

    pub fn as_str(self) -> &'static str {
        match self {
            HybridMode::Quality => "quality",
            HybridMode::Balanced => "balanced",
            HybridMode::Size => "size",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            HybridMode::Quality => "Priority: Quality (Lossless on ROI)",
            HybridMode::Balanced => "Balanced",
            HybridMode::Size => "Priority: Size (Aggressive Lossy)",
        }
    }
}

impl fmt::Display for HybridMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HybridMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        HybridMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownMode(s.to_string()))
    }
}

/// Target resolution: the source size or a named preset box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Resolution {
    #[default]
    #[serde(rename = "original")]
    Original,
    #[serde(rename = "4k")]
    Uhd4k,
    #[serde(rename = "2k")]
    Qhd2k,
    #[serde(rename = "1440p")]
    P1440,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "900p")]
    P900,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "540p")]
    P540,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "240p")]
    P240,
    #[serde(rename = "144p")]
    P144,
}

impl Resolution {
    pub const ALL: [Resolution; 12] = [
        Resolution::Original,
        Resolution::Uhd4k,
        Resolution::Qhd2k,
        Resolution::P1440,
        Resolution::P1080,
        Resolution::P900,
        Resolution::P720,
        Resolution::P540,
        Resolution::P480,
        Resolution::P360,
        Resolution::P240,
        Resolution::P144,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Original => "original",
            Resolution::Uhd4k => "4k",
            Resolution::Qhd2k => "2k",
            Resolution::P1440 => "1440p",
            Resolution::P1080 => "1080p",
            Resolution::P900 => "900p",
            Resolution::P720 => "720p",
            Resolution::P540 => "540p",
            Resolution::P480 => "480p",
            Resolution::P360 => "360p",
            Resolution::P240 => "240p",
            Resolution::P144 => "144p",
        }
    }

    /// Bounding box of the preset, `None` for `Original`
    pub fn bounding_box(self) -> Option<(u32, u32)> {
        match self {
            Resolution::Original => None,
            Resolution::Uhd4k => Some((3840, 2160)),
            Resolution::Qhd2k | Resolution::P1440 => Some((2560, 1440)),
            Resolution::P1080 => Some((1920, 1080)),
            Resolution::P900 => Some((1600, 900)),
            Resolution::P720 => Some((1280, 720)),
            Resolution::P540 => Some((960, 540)),
            Resolution::P480 => Some((854, 480)),
            Resolution::P360 => Some((640, 360)),
            Resolution::P240 => Some((426, 240)),
            Resolution::P144 => Some((256, 144)),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Resolution::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownResolution(s.to_string()))
    }
}

/// Caller-facing compression settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CompressionConfig {
    pub hybrid_mode: HybridMode,
    /// Manual quantization override (18-28); `None` keeps the mode default
    #[serde(default)]
    pub lossy_quality: Option<u8>,
    #[serde(default)]
    pub target_resolution: Resolution,
}

impl CompressionConfig {
    /// Accepted range of the manual quantization override
    pub const LOSSY_QUALITY_RANGE: std::ops::RangeInclusive<u8> = 18..=28;

    pub fn new(hybrid_mode: HybridMode, target_resolution: Resolution) -> Self {
        Self {
            hybrid_mode,
            lossy_quality: None,
            target_resolution,
        }
    }

    pub fn with_lossy_quality(mut self, qp: u8) -> Self {
        self.lossy_quality = Some(qp);
        self
    }
}

/// Container-level description of a video file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub file_name: String,
    /// Size in bytes
    pub file_size: u64,
    /// Duration in seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    /// Container/MIME description
    pub format: String,
}

/// Measured fidelity of the compressed output against the source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct QualityMetrics {
    /// Peak signal-to-noise ratio in dB
    pub psnr: f64,
    /// Structural similarity in [0, 1]
    pub ssim: f64,
}

/// Measured cost of a compression run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    /// Wall-clock seconds spent in the encode run
    pub encoding_time: f64,
    /// Wall-clock seconds spent decoding the output for metrics
    pub decoding_time: f64,
    /// Time-averaged process CPU usage during encoding, in percent of one core
    pub cpu_usage: f64,
    /// Peak resident memory during encoding, in MiB
    pub memory_usage: f64,
}

/// Lifecycle stage of a compression run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Idle,
    Analyzing,
    EncodingLossy,
    EncodingLossless,
    Finalizing,
    Complete,
    Error,
    Cancelled,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Analyzing => "analyzing",
            Stage::EncodingLossy => "encoding-lossy",
            Stage::EncodingLossless => "encoding-lossless",
            Stage::Finalizing => "finalizing",
            Stage::Complete => "complete",
            Stage::Error => "error",
            Stage::Cancelled => "cancelled",
        }
    }

    /// Terminal stages end a run; a new run starts from `Idle`
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Complete | Stage::Error | Stage::Cancelled)
    }

    /// Position in the forward pipeline, `None` for terminal failure stages
    pub fn ordinal(self) -> Option<u8> {
        match self {
            Stage::Idle => Some(0),
            Stage::Analyzing => Some(1),
            Stage::EncodingLossy => Some(2),
            Stage::EncodingLossless => Some(3),
            Stage::Finalizing => Some(4),
            Stage::Complete => Some(5),
            Stage::Error | Stage::Cancelled => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a run's progress, published as a whole
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatus {
    pub stage: Stage,
    /// 0-100
    pub progress: f64,
    pub message: String,
    /// Seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining: Option<f64>,
}

impl ProcessingStatus {
    pub fn idle() -> Self {
        Self {
            stage: Stage::Idle,
            progress: 0.0,
            message: "Ready to process".to_string(),
            estimated_time_remaining: None,
        }
    }
}

impl Default for ProcessingStatus {
    fn default() -> Self {
        Self::idle()
    }
}

/// Handle to the original input as supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ArtifactRef {
    File { path: PathBuf },
    Memory { name: String },
}

/// The compressed stream produced by a run, owned by the caller
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedArtifact {
    pub file_name: String,
    #[serde(skip)]
    data: Vec<u8>,
    size: u64,
}

impl CompressedArtifact {
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self {
            file_name: file_name.into(),
            data,
            size,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Writes the stream to `path`
    pub fn persist(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.data)?;
        Ok(())
    }
}

/// Final aggregate of a compression run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionResult {
    pub original_metadata: VideoMetadata,
    pub compressed_metadata: VideoMetadata,
    /// original size / compressed size; below 1 means the output grew
    pub compression_ratio: f64,
    pub quality: QualityMetrics,
    pub performance: PerformanceMetrics,
    pub plan: EncodingPlan,
    pub original_artifact: ArtifactRef,
    pub compressed_artifact: CompressedArtifact,
}

impl CompressionResult {
    /// `original / compressed`, never inverted; an empty output yields infinity
    pub fn ratio(original_size: u64, compressed_size: u64) -> f64 {
        if compressed_size == 0 {
            return f64::INFINITY;
        }
        original_size as f64 / compressed_size as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_and_resolution_parse() {
        assert_eq!("size".parse::<HybridMode>().unwrap(), HybridMode::Size);
        assert_eq!("720P".parse::<Resolution>().unwrap(), Resolution::P720);
        assert!("8k".parse::<Resolution>().is_err());
        assert_eq!(Resolution::P480.bounding_box(), Some((854, 480)));
        assert_eq!(Resolution::Original.bounding_box(), None);
    }

    #[test]
    fn test_config_wire_names() {
        let config: CompressionConfig = serde_json::from_str(
            r#"{"hybridMode":"size","lossyQuality":26,"targetResolution":"720p"}"#,
        )
        .unwrap();
        assert_eq!(config.hybrid_mode, HybridMode::Size);
        assert_eq!(config.lossy_quality, Some(26));
        assert_eq!(config.target_resolution, Resolution::P720);

        let defaulted: CompressionConfig = serde_json::from_str(r#"{"hybridMode":"quality"}"#).unwrap();
        assert_eq!(defaulted.lossy_quality, None);
        assert_eq!(defaulted.target_resolution, Resolution::Original);
    }

    #[test]
    fn test_status_wire_shape() {
        let json = serde_json::to_value(ProcessingStatus::idle()).unwrap();
        assert_eq!(json["stage"], "idle");
        assert!(json.get("estimatedTimeRemaining").is_none());
    }

    #[test]
    fn test_ratio_is_original_over_compressed() {
        assert_eq!(CompressionResult::ratio(1000, 250), 4.0);
        assert_eq!(CompressionResult::ratio(100, 400), 0.25);
        assert!(CompressionResult::ratio(1, 0).is_infinite());
    }

    #[test]
    fn test_stage_ordering() {
        assert!(Stage::Analyzing.ordinal() < Stage::EncodingLossy.ordinal());
        assert!(Stage::Complete.is_terminal());
        assert!(Stage::Cancelled.is_terminal());
        assert!(!Stage::Finalizing.is_terminal());
        assert_eq!(Stage::EncodingLossless.as_str(), "encoding-lossless");
    }
}
