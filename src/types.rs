use chrono::{DateTime, Utc};
use ndarray::{Array2, Array4};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Binary per-pixel mask (1 = set, 0 = clear)
pub type Mask = Array2<u8>;

/// Top-of-atmosphere reflectance cube (scene x row x column x band)
pub type ReflectanceCube = Array4<f64>;

/// Sentinel-2 MSI spatial resolutions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    R10m,
    R20m,
    R60m,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Resolution::R10m, Resolution::R20m, Resolution::R60m];

    /// Ground sampling distance in meters, as written in the `resolution` XML attribute
    pub fn meters(&self) -> u32 {
        match self {
            Resolution::R10m => 10,
            Resolution::R20m => 20,
            Resolution::R60m => 60,
        }
    }

    /// Band name suffix (`10m`, `20m`, `60m`)
    pub fn suffix(&self) -> &'static str {
        match self {
            Resolution::R10m => "10m",
            Resolution::R20m => "20m",
            Resolution::R60m => "60m",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "10m" => Some(Resolution::R10m),
            "20m" => Some(Resolution::R20m),
            "60m" => Some(Resolution::R60m),
            _ => None,
        }
    }

    /// Grid name used in dataset documents. Only the native 10m grid is `default`.
    pub fn grid_name(&self) -> &'static str {
        match self {
            Resolution::R10m => "default",
            other => other.suffix(),
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// Tile grid geometry at one resolution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub nrows: usize,
    pub ncols: usize,
    pub ulx: f64,
    pub uly: f64,
    pub xdim: f64,  // meters, positive
    pub ydim: f64,  // meters, negative for north-up
}

impl GridGeometry {
    /// Row-major 3x3 affine transform `[xdim, 0, ulx, 0, ydim, uly, 0, 0, 1]`
    pub fn affine(&self) -> [f64; 9] {
        [self.xdim, 0.0, self.ulx, 0.0, self.ydim, self.uly, 0.0, 0.0, 1.0]
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.nrows, self.ncols]
    }
}

/// Geospatial transformation parameters (GDAL order)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Convert a row-major 3x3 affine `[a, b, c, d, e, f, 0, 0, 1]`
    pub fn from_affine(affine: &[f64; 9]) -> Self {
        Self {
            top_left_x: affine[2],
            pixel_width: affine[0],
            rotation_x: affine[1],
            top_left_y: affine[5],
            rotation_y: affine[3],
            pixel_height: affine[4],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// Tile metadata extracted from a Sentinel-2 `metadata.xml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMetadata {
    pub tile_id: String,
    /// Sensing time as written by the provider
    pub sensing_time: String,
    pub sensing_time_utc: DateTime<Utc>,
    /// Lower-cased CRS code, e.g. `epsg:32635`
    pub crs_code: String,
    pub grids: BTreeMap<Resolution, GridGeometry>,
    pub mean_sun_zenith: f64,
    pub mean_sun_azimuth: f64,
    pub cloudy_pixel_percentage: f64,
}

impl TileMetadata {
    pub fn grid(&self, resolution: Resolution) -> CfsiResult<&GridGeometry> {
        self.grids.get(&resolution).ok_or_else(|| {
            CfsiError::Metadata(format!("No {} grid in tile {}", resolution, self.tile_id))
        })
    }

    /// Platform inferred from the tile identifier (`S2A_...` / `S2B_...`)
    pub fn platform(&self) -> Option<&'static str> {
        if self.tile_id.starts_with("S2A") {
            Some("SENTINEL-2A")
        } else if self.tile_id.starts_with("S2B") {
            Some("SENTINEL-2B")
        } else {
            None
        }
    }
}

/// Error types for tile indexing and mask generation
#[derive(Debug, thiserror::Error)]
pub enum CfsiError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Missing metadata field: {0}")]
    MissingField(String),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Dataset {id} differs from the indexed document")]
    DocumentMismatch { id: String },

    #[error("Unknown product: {0}")]
    ProductNotFound(String),

    #[error("Metadata cloud percentage {percentage} greater than threshold value {ceiling}")]
    CloudCoverExceeded { percentage: f64, ceiling: f64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cloud classifier error: {0}")]
    Classifier(String),
}

/// Result type for indexing and masking operations
pub type CfsiResult<T> = Result<T, CfsiError>;
