//! HYVC Core Library
//!
//! This library provides the data model shared by the encoder, decoder and CLI
//! together with the binary container that stores a hybrid stream: a lossy base
//! layer per frame plus lossless refinement patches placed on top of it.

pub mod asset;
pub mod container;
pub mod importance;
pub mod model;
pub mod plan;
pub mod stream;
pub mod timeline;

pub use asset::{Asset, AssetFormat};
pub use container::{HyvcContainer, HyvcHeader};
pub use importance::{BlockCoord, ImportanceMap};
pub use model::{
    ArtifactRef, CompressedArtifact, CompressionConfig, CompressionResult, HybridMode,
    PerformanceMetrics, ProcessingStatus, QualityMetrics, Resolution, Stage, VideoMetadata,
};
pub use plan::{Dimensions, EncodingPlan, RegionDirective, RegionTreatment};
pub use stream::{StreamPacket, VideoFormat, VideoStream};
pub use timeline::{Layer, TimelineEntry};

/// Result type for hyvc-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for hyvc-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic bytes, expected 'HYVC'")]
    InvalidMagic,

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    #[error("Unknown asset format tag: {0}")]
    UnknownAssetFormat(u8),

    #[error("Unknown video format tag: {0}")]
    UnknownVideoFormat(u8),

    #[error("Invalid video stream payload: {0}")]
    InvalidStream(String),

    #[error("Truncated input: expected {expected} bytes, found {actual}")]
    Truncated { expected: u64, actual: u64 },

    #[error("Unknown layer tag: {0}")]
    UnknownLayer(u8),

    #[error("Invalid timeline entry: {0}")]
    InvalidTimelineEntry(String),

    #[error("Asset not found: {0}")]
    AssetNotFound(u32),

    #[error("Unknown resolution preset: {0}")]
    UnknownResolution(String),

    #[error("Unknown hybrid mode: {0}")]
    UnknownMode(String),
}
