//! I/O modules for tile metadata, object storage, the dataset index and rasters

pub mod metadata;
pub mod storage;
pub mod index;
pub mod raster;

pub use metadata::{TileDocument, TileMetadataParser};
pub use storage::{list_metadata_keys, to_gdal_path, LocalStore, ObjectStore, S3Store};
pub use index::{resolve_dataset, DatasetIndex, FileIndex, IndexedDataset};
pub use raster::{read_band_resampled, read_multiband, write_multiband, RasterBands};
