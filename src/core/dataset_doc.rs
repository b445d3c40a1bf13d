use crate::core::products::{ProductSpec, EO3_SCHEMA};
use crate::types::{CfsiError, CfsiResult, Resolution, TileMetadata};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Named grid: pixel shape plus row-major 3x3 affine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub shape: [usize; 2],
    pub transform: [f64; 9],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub path: String,
    pub grid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRef {
    pub name: String,
}

/// EO3 dataset document describing one tile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub id: String,
    #[serde(rename = "$schema")]
    pub schema: String,
    pub product: ProductRef,
    pub crs: String,
    pub grids: BTreeMap<String, GridSpec>,
    pub measurements: BTreeMap<String, Measurement>,
    pub location: String,
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub lineage: BTreeMap<String, Value>,
}

impl CatalogDocument {
    pub fn grid(&self, name: &str) -> CfsiResult<&GridSpec> {
        self.grids
            .get(name)
            .ok_or_else(|| CfsiError::Metadata(format!("Dataset {} has no grid '{}'", self.id, name)))
    }

    pub fn property_f64(&self, key: &str) -> CfsiResult<f64> {
        self.properties
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| CfsiError::MissingField(format!("properties.{}", key)))
    }

    pub fn property_str(&self, key: &str) -> CfsiResult<&str> {
        self.properties
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| CfsiError::MissingField(format!("properties.{}", key)))
    }
}

/// Location of an object key split into its storage pieces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLocation {
    /// `s3://{bucket}/{key parent}`
    pub uri: String,
    /// Key parent directory, e.g. `tiles/35/P/PM/2020/10/5/0`
    pub key_prefix: String,
    /// Path segments 1..=3 joined, e.g. `35PPM`
    pub region_code: String,
}

impl TileLocation {
    pub fn from_key(bucket: &str, key: &str) -> CfsiResult<Self> {
        let parts: Vec<&str> = key.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() < 4 {
            return Err(CfsiError::InvalidFormat(format!(
                "Object key '{}' is too short to hold a tile path",
                key
            )));
        }

        let key_prefix = parts[..parts.len() - 1].join("/");
        let region_code = parts[1..4].concat();
        let uri = format!("s3://{}/{}", bucket.trim_end_matches('/'), key_prefix);

        Ok(Self { uri, key_prefix, region_code })
    }

    /// Deterministic dataset id: hex MD5 of the storage location
    pub fn dataset_id(&self) -> String {
        format!("{:x}", md5::compute(self.uri.as_bytes()))
    }
}

/// Build the EO3 dataset document for one tile.
///
/// Measurement paths are absolute: `{location}/{relative band path}`.
pub fn build_dataset_doc(
    bucket: &str,
    key: &str,
    metadata: &TileMetadata,
    product: &ProductSpec,
) -> CfsiResult<CatalogDocument> {
    let location = TileLocation::from_key(bucket, key)?;

    let mut grids = BTreeMap::new();
    for resolution in Resolution::ALL {
        let geometry = metadata.grid(resolution)?;
        grids.insert(
            resolution.grid_name().to_string(),
            GridSpec { shape: geometry.shape(), transform: geometry.affine() },
        );
    }

    let mut measurements = BTreeMap::new();
    for spec in product.bands {
        measurements.insert(
            product.measurement_name(spec),
            Measurement {
                path: product.band_path(spec),
                grid: spec.resolution.grid_name().to_string(),
            },
        );
    }

    let platform = metadata.platform().unwrap_or(product.default_platform);
    let mut properties = BTreeMap::new();
    properties.insert("eo:instrument".to_string(), json!(product.instrument));
    properties.insert("eo:platform".to_string(), json!(platform));
    properties.insert("datetime".to_string(), json!(metadata.sensing_time));
    properties.insert("odc:file_format".to_string(), json!(product.file_format));
    properties.insert("odc:region_code".to_string(), json!(location.region_code));
    properties.insert("tile_id".to_string(), json!(metadata.tile_id));
    properties.insert("s3_key".to_string(), json!(location.key_prefix));
    properties.insert("cloudy_pixel_percentage".to_string(), json!(metadata.cloudy_pixel_percentage));
    properties.insert("mean_sun_azimuth".to_string(), json!(metadata.mean_sun_azimuth));
    properties.insert("mean_sun_zenith".to_string(), json!(metadata.mean_sun_zenith));

    let doc = CatalogDocument {
        id: location.dataset_id(),
        schema: EO3_SCHEMA.to_string(),
        product: ProductRef { name: product.name.to_string() },
        crs: metadata.crs_code.clone(),
        grids,
        measurements,
        location: location.uri.clone(),
        properties,
        lineage: BTreeMap::new(),
    };

    Ok(absolutify_paths(doc))
}

/// Prefix every measurement path with the document location
pub fn absolutify_paths(mut doc: CatalogDocument) -> CatalogDocument {
    let base = doc.location.trim_end_matches('/').to_string();
    for measurement in doc.measurements.values_mut() {
        if !measurement.path.starts_with(&base) {
            measurement.path = format!("{}/{}", base, measurement.path);
        }
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::products::{S2_L1C, S2_L2A};
    use crate::io::metadata::{tests::SAMPLE_TILE_XML, TileMetadataParser};

    const KEY: &str = "tiles/35/P/PM/2020/10/5/0/metadata.xml";

    fn sample_doc() -> CatalogDocument {
        let metadata = TileMetadataParser::parse(SAMPLE_TILE_XML).unwrap();
        build_dataset_doc("sentinel-s2-l1c", KEY, &metadata, &S2_L1C).unwrap()
    }

    #[test]
    fn test_tile_location() {
        let loc = TileLocation::from_key("sentinel-s2-l1c", "tiles/35/P/PM/2020/10/5/metadata.xml").unwrap();
        assert_eq!(loc.region_code, "35PPM");
        assert_eq!(loc.uri, "s3://sentinel-s2-l1c/tiles/35/P/PM/2020/10/5");
        assert_eq!(loc.key_prefix, "tiles/35/P/PM/2020/10/5");
        assert!(TileLocation::from_key("bucket", "tiles/35/metadata.xml").is_err());
    }

    #[test]
    fn test_measurement_paths_absolute() {
        let doc = sample_doc();
        assert_eq!(doc.measurements.len(), 13);
        for (band, m) in &doc.measurements {
            assert!(m.path.starts_with(&format!("{}/", doc.location)), "{} -> {}", band, m.path);
            assert!(doc.grids.contains_key(&m.grid));
        }
        assert_eq!(doc.measurements["B02"].grid, "default");
        assert_eq!(doc.measurements["B8A"].grid, "20m");
        assert_eq!(doc.measurements["B10"].grid, "60m");
        assert_eq!(
            doc.measurements["B01"].path,
            "s3://sentinel-s2-l1c/tiles/35/P/PM/2020/10/5/0/B01.jp2"
        );
    }

    #[test]
    fn test_grid_transforms() {
        let doc = sample_doc();
        assert_eq!(doc.grids["default"].shape, [10980, 10980]);
        assert_eq!(
            doc.grids["default"].transform,
            [10.0, 0.0, 600000.0, 0.0, -10.0, 1300020.0, 0.0, 0.0, 1.0]
        );
        assert_eq!(
            doc.grids["60m"].transform,
            [60.0, 0.0, 600000.0, 0.0, -60.0, 1300020.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn test_id_is_deterministic() {
        let a = sample_doc();
        let b = sample_doc();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 32);
        assert_eq!(a.id, format!("{:x}", md5::compute(a.location.as_bytes())));
    }

    #[test]
    fn test_properties_and_json_keys() {
        let doc = sample_doc();
        assert_eq!(doc.property_str("odc:region_code").unwrap(), "35PPM");
        assert_eq!(doc.property_str("eo:platform").unwrap(), "SENTINEL-2A");
        assert_eq!(doc.property_f64("cloudy_pixel_percentage").unwrap(), 12.5);

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["$schema"], "https://schemas.opendatacube.org/dataset");
        assert_eq!(json["product"]["name"], "s2a_level1c_granule");
        assert_eq!(json["crs"], "epsg:32635");
    }

    #[test]
    fn test_l2a_measurements() {
        let metadata = TileMetadataParser::parse(SAMPLE_TILE_XML).unwrap();
        let doc = build_dataset_doc("sentinel-s2-l2a", KEY, &metadata, &S2_L2A).unwrap();
        assert_eq!(
            doc.measurements["SCL_20m"].path,
            "s3://sentinel-s2-l2a/tiles/35/P/PM/2020/10/5/0/R20m/SCL.jp2"
        );
        assert_eq!(doc.measurements["B02_10m"].grid, "default");
    }
}
