//! Core indexing and mask derivation modules

pub mod products;
pub mod dataset_doc;
pub mod indexer;
pub mod cloud_mask;
pub mod shadow_mask;
pub mod classifier;
pub mod pipeline;

// Re-export main types
pub use products::{ProductSpec, BandSpec, BandLayout, S2_L1C, S2_L2A, product_by_name, product_for_bucket};
pub use dataset_doc::{CatalogDocument, TileLocation, build_dataset_doc, absolutify_paths};
pub use indexer::{IndexingWorker, WorkItem, ItemOutcome, FailurePolicy, IndexReport, add_dataset, index_prefix};
pub use cloud_mask::{CloudClassifier, CloudDetector, CloudDetectorParams};
pub use shadow_mask::{ShadowParams, generate_cloud_shadow_mask};
pub use classifier::OnnxCloudClassifier;
pub use pipeline::{MaskPipeline, BandSource, GdalBandSource, TileMasks, MaskReport};
