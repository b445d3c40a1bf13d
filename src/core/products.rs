//! Declarative product definitions: which measurements a product carries,
//! at which resolution, and where each band file lives relative to the tile.

use crate::types::Resolution;

pub const L1C_BUCKET: &str = "sentinel-s2-l1c";
pub const L2A_BUCKET: &str = "sentinel-s2-l2a";

pub const EO3_SCHEMA: &str = "https://schemas.opendatacube.org/dataset";

/// Layout of band files under the tile directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandLayout {
    /// `{band}.jp2`, measurement keyed by band name
    Flat,
    /// `R{res}/{band}.jp2`, measurement keyed by `{band}_{res}`
    ByResolution,
}

/// One band of a product at a given resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandSpec {
    pub band: &'static str,
    pub resolution: Resolution,
}

impl BandSpec {
    const fn new(band: &'static str, resolution: Resolution) -> Self {
        Self { band, resolution }
    }
}

/// Static description of an indexed product
#[derive(Debug, Clone, Copy)]
pub struct ProductSpec {
    pub name: &'static str,
    pub bucket: &'static str,
    pub instrument: &'static str,
    pub default_platform: &'static str,
    pub file_format: &'static str,
    pub layout: BandLayout,
    pub bands: &'static [BandSpec],
}

impl ProductSpec {
    /// Measurement name under which `spec` appears in a dataset document
    pub fn measurement_name(&self, spec: &BandSpec) -> String {
        match self.layout {
            BandLayout::Flat => spec.band.to_string(),
            BandLayout::ByResolution => format!("{}_{}", spec.band, spec.resolution),
        }
    }

    /// Band file path relative to the tile directory
    pub fn band_path(&self, spec: &BandSpec) -> String {
        match self.layout {
            BandLayout::Flat => format!("{}.jp2", spec.band),
            BandLayout::ByResolution => format!("R{}/{}.jp2", spec.resolution, spec.band),
        }
    }

    pub fn measurement_names(&self) -> Vec<String> {
        self.bands.iter().map(|b| self.measurement_name(b)).collect()
    }
}

use Resolution::{R10m, R20m, R60m};

const L1C_BANDS: [BandSpec; 13] = [
    BandSpec::new("B01", R60m),
    BandSpec::new("B02", R10m),
    BandSpec::new("B03", R10m),
    BandSpec::new("B04", R10m),
    BandSpec::new("B05", R20m),
    BandSpec::new("B06", R20m),
    BandSpec::new("B07", R20m),
    BandSpec::new("B08", R10m),
    BandSpec::new("B09", R60m),
    BandSpec::new("B8A", R20m),
    BandSpec::new("B10", R60m),
    BandSpec::new("B11", R20m),
    BandSpec::new("B12", R20m),
];

const L2A_BANDS: [BandSpec; 26] = [
    BandSpec::new("B02", R10m),
    BandSpec::new("B03", R10m),
    BandSpec::new("B04", R10m),
    BandSpec::new("B08", R10m),
    BandSpec::new("B05", R20m),
    BandSpec::new("B06", R20m),
    BandSpec::new("B07", R20m),
    BandSpec::new("B11", R20m),
    BandSpec::new("B12", R20m),
    BandSpec::new("B8A", R20m),
    BandSpec::new("B02", R20m),
    BandSpec::new("B03", R20m),
    BandSpec::new("B04", R20m),
    BandSpec::new("B08", R20m),
    BandSpec::new("SCL", R20m),
    BandSpec::new("B01", R60m),
    BandSpec::new("B02", R60m),
    BandSpec::new("B03", R60m),
    BandSpec::new("B04", R60m),
    BandSpec::new("B8A", R60m),
    BandSpec::new("B09", R60m),
    BandSpec::new("B05", R60m),
    BandSpec::new("B06", R60m),
    BandSpec::new("B07", R60m),
    BandSpec::new("B11", R60m),
    BandSpec::new("B12", R60m),
];

pub const S2_L1C: ProductSpec = ProductSpec {
    name: "s2a_level1c_granule",
    bucket: L1C_BUCKET,
    instrument: "MSI",
    default_platform: "SENTINEL-2A",
    file_format: "JPEG2000",
    layout: BandLayout::Flat,
    bands: &L1C_BANDS,
};

pub const S2_L2A: ProductSpec = ProductSpec {
    name: "s2a_sen2cor_granule",
    bucket: L2A_BUCKET,
    instrument: "MSI",
    default_platform: "SENTINEL-2A",
    file_format: "JPEG2000",
    layout: BandLayout::ByResolution,
    bands: &L2A_BANDS,
};

pub const PRODUCTS: [&ProductSpec; 2] = [&S2_L1C, &S2_L2A];

/// Look up a product definition by name
pub fn product_by_name(name: &str) -> Option<&'static ProductSpec> {
    PRODUCTS.iter().copied().find(|p| p.name == name)
}

/// Product indexed from `bucket`; unknown buckets are treated as Level-1C
pub fn product_for_bucket(bucket: &str) -> &'static ProductSpec {
    PRODUCTS
        .iter()
        .copied()
        .find(|p| p.bucket == bucket)
        .unwrap_or(&S2_L1C)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l1c_table() {
        assert_eq!(S2_L1C.bands.len(), 13);
        let b8a = S2_L1C.bands.iter().find(|b| b.band == "B8A").unwrap();
        assert_eq!(S2_L1C.measurement_name(b8a), "B8A");
        assert_eq!(S2_L1C.band_path(b8a), "B8A.jp2");
        assert_eq!(b8a.resolution.grid_name(), "20m");
    }

    #[test]
    fn test_l2a_layout() {
        let scl = BandSpec::new("SCL", R20m);
        assert_eq!(S2_L2A.measurement_name(&scl), "SCL_20m");
        assert_eq!(S2_L2A.band_path(&scl), "R20m/SCL.jp2");
        let mut names = S2_L2A.measurement_names();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_l2a_60m_bands() {
        let names = S2_L2A.measurement_names();
        assert_eq!(names.len(), 26);
        assert!(names.iter().any(|n| n == "B8A_60m"));
        assert!(!names.iter().any(|n| n == "B08_60m"));
        assert!(!names.iter().any(|n| n == "SCL_60m"));
        assert_eq!(S2_L2A.bands.iter().filter(|b| b.resolution == R60m).count(), 11);
    }

    #[test]
    fn test_product_lookup() {
        assert_eq!(product_for_bucket(L2A_BUCKET).name, "s2a_sen2cor_granule");
        assert_eq!(product_for_bucket("my-mirror").name, "s2a_level1c_granule");
        assert!(product_by_name("s2a_level1c_granule").is_some());
        assert!(product_by_name("landsat8").is_none());
    }
}
