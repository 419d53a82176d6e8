//! Result assembly

use crate::metrics::MeasuredQuality;
use crate::resources::ResourceReport;
use hyvc_core::{
    ArtifactRef, CompressedArtifact, CompressionResult, EncodingPlan, PerformanceMetrics,
    QualityMetrics, VideoMetadata,
};
use std::path::Path;

/// MIME-style format tag of the compressed stream
pub const COMPRESSED_FORMAT: &str = "video/x-hyvc";

/// Pieces of a finished run, gathered for [`assemble`]
#[derive(Debug)]
pub struct RunOutputs {
    pub original_metadata: VideoMetadata,
    pub original_artifact: ArtifactRef,
    pub plan: EncodingPlan,
    pub container_bytes: Vec<u8>,
    /// Duration of the compressed stream in seconds
    pub duration: f64,
    pub quality: MeasuredQuality,
    pub encoding: ResourceReport,
}

/// File name for the compressed stream of `original_name`
pub fn compressed_file_name(original_name: &str) -> String {
    let stem = Path::new(original_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "output".to_string());
    format!("compressed_{stem}.hyvc")
}

/// Combines metadata, plan and measurements into the caller's result
pub fn assemble(outputs: RunOutputs) -> CompressionResult {
    let RunOutputs {
        original_metadata,
        original_artifact,
        plan,
        container_bytes,
        duration,
        quality,
        encoding,
    } = outputs;

    let file_name = compressed_file_name(&original_metadata.file_name);
    let dims = plan.dimensions();
    let compressed_metadata = VideoMetadata {
        file_name: file_name.clone(),
        file_size: container_bytes.len() as u64,
        duration,
        width: dims.width,
        height: dims.height,
        format: COMPRESSED_FORMAT.to_string(),
    };

    CompressionResult {
        compression_ratio: CompressionResult::ratio(
            original_metadata.file_size,
            compressed_metadata.file_size,
        ),
        quality: QualityMetrics {
            psnr: quality.psnr,
            ssim: quality.ssim,
        },
        performance: PerformanceMetrics {
            encoding_time: encoding.wall_time.as_secs_f64(),
            decoding_time: quality.decode_time.as_secs_f64(),
            cpu_usage: encoding.cpu_percent,
            memory_usage: encoding.peak_memory_mib,
        },
        original_metadata,
        compressed_metadata,
        plan,
        original_artifact,
        compressed_artifact: CompressedArtifact::new(file_name, container_bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyvc_core::{Dimensions, HybridMode};
    use std::time::Duration;

    #[test]
    fn test_compressed_names() {
        assert_eq!(compressed_file_name("clip.mp4"), "compressed_clip.hyvc");
        assert_eq!(compressed_file_name("a.b.mov"), "compressed_a.b.hyvc");
        assert_eq!(compressed_file_name(""), "compressed_output.hyvc");
    }

    #[test]
    fn test_assemble_reports_ratio_and_dims() {
        let result = assemble(RunOutputs {
            original_metadata: VideoMetadata {
                file_name: "clip.mp4".into(),
                file_size: 1000,
                duration: 2.0,
                width: 1921,
                height: 1081,
                format: "mp4".into(),
            },
            original_artifact: ArtifactRef::Memory {
                name: "clip.mp4".into(),
            },
            plan: EncodingPlan::new(
                HybridMode::Balanced,
                Dimensions::new(1920, 1080),
                23,
                false,
                16,
                Vec::new(),
            ),
            container_bytes: vec![0; 250],
            duration: 2.0,
            quality: MeasuredQuality {
                psnr: 41.0,
                ssim: 0.97,
                frames_compared: 60,
                decode_time: Duration::from_millis(120),
            },
            encoding: ResourceReport {
                wall_time: Duration::from_secs(3),
                cpu_percent: 180.0,
                peak_memory_mib: 64.0,
            },
        });

        assert_eq!(result.compression_ratio, 4.0);
        assert_eq!(result.compressed_metadata.file_size, 250);
        assert_eq!(
            (result.compressed_metadata.width, result.compressed_metadata.height),
            (1920, 1080)
        );
        assert_eq!(result.compressed_metadata.format, COMPRESSED_FORMAT);
        assert_eq!(result.compressed_artifact.len(), 250);
        assert_eq!(result.performance.decoding_time, 0.12);
    }
}
