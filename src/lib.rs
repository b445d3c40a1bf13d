//! cfsi: Sentinel-2 tile indexing and cloud / cloud-shadow masking
//!
//! Reads Sentinel-2 tile metadata from object storage, registers each tile in a
//! dataset catalog, and derives per-pixel cloud and cloud-shadow masks that are
//! written out as georeferenced GeoTIFFs.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    CfsiError, CfsiResult, Mask, ReflectanceCube, Resolution, GridGeometry, GeoTransform,
    TileMetadata,
};

pub use config::Config;
pub use io::{DatasetIndex, FileIndex, ObjectStore, TileMetadataParser, S3Store, LocalStore};
pub use crate::core::{
    CatalogDocument, CloudDetector, FailurePolicy, IndexReport, MaskPipeline, OnnxCloudClassifier,
};
