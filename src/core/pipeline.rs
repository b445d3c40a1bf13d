//! Per-tile cloud and cloud-shadow mask generation over indexed datasets.

use crate::core::cloud_mask::{
    check_cloud_cover, nir_band, scale_reflectance, CloudClassifier, CloudDetector,
    CLASSIFIER_BANDS, MAX_CLOUD_PERCENTAGE,
};
use crate::core::dataset_doc::CatalogDocument;
use crate::core::shadow_mask::{generate_cloud_shadow_mask, ShadowParams};
use crate::io::index::{DatasetIndex, IndexedDataset};
use crate::io::raster::{crs_to_wkt, read_band_resampled, write_multiband};
use crate::io::storage::to_gdal_path;
use crate::types::{CfsiError, CfsiResult, GeoTransform, Mask};
use ndarray::{Array2, Array3, Axis};
use std::path::{Path, PathBuf};

/// Grid the masks are computed on
pub const MASK_GRID: &str = "default";
pub const OUTPUT_SUFFIX: &str = "_s2cloudless.tif";

/// Source of raw band rasters for an indexed tile
pub trait BandSource {
    /// Digital numbers `(rows, cols, bands)` on the document's default grid,
    /// bands in the order given
    fn load_bands(&self, doc: &CatalogDocument, bands: &[&str]) -> CfsiResult<Array3<u16>>;
}

/// Reads measurement files through GDAL, resampling every band to the default grid
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalBandSource;

impl BandSource for GdalBandSource {
    fn load_bands(&self, doc: &CatalogDocument, bands: &[&str]) -> CfsiResult<Array3<u16>> {
        let grid = doc.grid(MASK_GRID)?;
        let shape = (grid.shape[0], grid.shape[1]);

        let mut layers: Vec<Array2<u16>> = Vec::with_capacity(bands.len());
        for band in bands {
            let measurement = doc.measurements.get(*band).ok_or_else(|| {
                CfsiError::Metadata(format!("Dataset {} has no measurement {}", doc.id, band))
            })?;
            layers.push(read_band_resampled::<u16>(&to_gdal_path(&measurement.path), shape)?);
        }

        let views: Vec<_> = layers.iter().map(|l| l.view()).collect();
        ndarray::stack(Axis(2), &views)
            .map_err(|e| CfsiError::Processing(format!("Cannot stack bands: {}", e)))
    }
}

#[derive(Debug, Clone)]
pub struct TileMasks {
    pub cloud: Mask,
    pub shadow: Mask,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaskReport {
    pub written: Vec<PathBuf>,
    pub skipped_cloudy: usize,
}

/// `{output_dir}/{s3_key}/{tile_id}_s2cloudless.tif`
pub fn output_path(output_dir: &Path, doc: &CatalogDocument) -> CfsiResult<PathBuf> {
    let s3_key = doc.property_str("s3_key")?;
    let tile_id = doc.property_str("tile_id")?;
    Ok(output_dir
        .join(s3_key.trim_matches('/'))
        .join(format!("{}{}", tile_id, OUTPUT_SUFFIX)))
}

pub struct MaskPipeline<C: CloudClassifier, S: BandSource> {
    detector: CloudDetector<C>,
    source: S,
    shadow_params: ShadowParams,
    max_cloud_percentage: f64,
    nodata: f64,
    output_dir: PathBuf,
}

impl<C: CloudClassifier, S: BandSource> MaskPipeline<C, S> {
    pub fn new(detector: CloudDetector<C>, source: S, output_dir: PathBuf) -> Self {
        Self {
            detector,
            source,
            shadow_params: ShadowParams::default(),
            max_cloud_percentage: MAX_CLOUD_PERCENTAGE,
            nodata: 0.0,
            output_dir,
        }
    }

    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = nodata;
        self
    }

    pub fn with_max_cloud_percentage(mut self, ceiling: f64) -> Self {
        self.max_cloud_percentage = ceiling;
        self
    }

    pub fn with_shadow_params(mut self, params: ShadowParams) -> Self {
        self.shadow_params = params;
        self
    }

    /// Cloud and shadow masks for one tile. Tiles above the cloud-cover
    /// ceiling are rejected before any band is read.
    pub fn process_dataset(&self, doc: &CatalogDocument) -> CfsiResult<TileMasks> {
        let cloud_percentage = doc.property_f64("cloudy_pixel_percentage")?;
        check_cloud_cover(cloud_percentage, self.max_cloud_percentage)?;

        let s3_key = doc.property_str("s3_key")?;
        log::info!("Processing tile {}\t{}% cloudy", s3_key, cloud_percentage);

        let digital_numbers = self.source.load_bands(doc, &CLASSIFIER_BANDS)?;
        let reflectance = scale_reflectance(&digital_numbers);

        log::info!("Generating cloud masks");
        let cloud = self.detector.generate_cloud_mask(&reflectance)?;

        log::info!("Generating shadow masks");
        let sun_azimuth = doc.property_f64("mean_sun_azimuth")?;
        let shadow = generate_cloud_shadow_mask(
            &nir_band(&reflectance),
            &cloud,
            sun_azimuth,
            &self.shadow_params,
        )?;
        log::info!("Mask generation done");

        Ok(TileMasks { cloud, shadow })
    }

    /// Write masks as a two-band GeoTIFF (1 = cloud, 2 = shadow) on the tile's default grid
    pub fn write_output(&self, doc: &CatalogDocument, masks: &TileMasks) -> CfsiResult<PathBuf> {
        let path = output_path(&self.output_dir, doc)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let grid = doc.grid(MASK_GRID)?;
        let geo_transform = GeoTransform::from_affine(&grid.transform).to_gdal();
        let projection = crs_to_wkt(&doc.crs)?;

        write_multiband(
            &path,
            &[masks.cloud.clone(), masks.shadow.clone()],
            &geo_transform,
            &projection,
            self.nodata,
        )?;
        log::info!("Wrote {}", path.display());
        Ok(path)
    }

    /// Generate and write masks for indexed datasets of `product`, one tile
    /// at a time. The first error ends the run, except cloud-cover rejections
    /// when `skip_cloudy` is set.
    pub fn run(
        &self,
        index: &dyn DatasetIndex,
        product: &str,
        limit: Option<usize>,
        skip_cloudy: bool,
    ) -> CfsiResult<MaskReport> {
        let datasets: Vec<IndexedDataset> = index.find_datasets(product)?;
        log::info!("Found {} {} datasets", datasets.len(), product);

        let mut report = MaskReport::default();
        for dataset in datasets.iter().take(limit.unwrap_or(usize::MAX)) {
            let doc = &dataset.document;
            let masks = match self.process_dataset(doc) {
                Ok(masks) => masks,
                Err(CfsiError::CloudCoverExceeded { .. }) if skip_cloudy => {
                    report.skipped_cloudy += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            log::info!("Writing output");
            report.written.push(self.write_output(doc, &masks)?);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cloud_mask::CloudDetectorParams;
    use crate::core::dataset_doc::build_dataset_doc;
    use crate::core::products::S2_L1C;
    use crate::io::metadata::{tests::SAMPLE_TILE_XML, TileMetadataParser};
    use ndarray::Array4;
    use std::cell::Cell;

    struct NirClassifier;

    impl CloudClassifier for NirClassifier {
        fn cloud_probabilities(&self, features: &Array4<f32>) -> CfsiResult<Array3<f32>> {
            Ok(features.index_axis(Axis(3), 4).to_owned())
        }
    }

    /// 4x4 tile, bright cloud in column 2, dark elsewhere
    struct SyntheticSource {
        calls: Cell<usize>,
    }

    impl BandSource for SyntheticSource {
        fn load_bands(&self, _doc: &CatalogDocument, bands: &[&str]) -> CfsiResult<Array3<u16>> {
            self.calls.set(self.calls.get() + 1);
            let mut dn = Array3::<u16>::from_elem((4, 4, bands.len()), 500);
            for r in 0..4 {
                dn[[r, 2, 7]] = 8000;
            }
            Ok(dn)
        }
    }

    fn doc_with(cloudy: f64, azimuth: f64) -> CatalogDocument {
        let metadata = TileMetadataParser::parse(SAMPLE_TILE_XML).unwrap();
        let mut doc = build_dataset_doc(
            "sentinel-s2-l1c",
            "tiles/35/P/PM/2020/10/5/0/metadata.xml",
            &metadata,
            &S2_L1C,
        )
        .unwrap();
        doc.properties.insert("cloudy_pixel_percentage".into(), serde_json::json!(cloudy));
        doc.properties.insert("mean_sun_azimuth".into(), serde_json::json!(azimuth));
        doc
    }

    fn pipeline() -> MaskPipeline<NirClassifier, SyntheticSource> {
        let params = CloudDetectorParams { average_over: 0, dilation_size: 0, ..Default::default() };
        MaskPipeline::new(
            CloudDetector::new(NirClassifier, params),
            SyntheticSource { calls: Cell::new(0) },
            PathBuf::from("/tmp/cfsi-test"),
        )
    }

    #[test]
    fn test_cloudy_tile_rejected_before_loading() {
        let pipeline = pipeline();
        let err = pipeline.process_dataset(&doc_with(95.0, 0.0)).unwrap_err();
        assert!(matches!(err, CfsiError::CloudCoverExceeded { .. }));
        assert_eq!(pipeline.source.calls.get(), 0);
    }

    #[test]
    fn test_masks_for_synthetic_tile() {
        let pipeline = pipeline();
        let masks = pipeline.process_dataset(&doc_with(10.0, 0.0)).unwrap();

        assert_eq!(masks.cloud.dim(), (4, 4));
        assert_eq!(masks.shadow.dim(), (4, 4));
        assert_eq!(masks.cloud.column(2).sum(), 4);
        assert_eq!(masks.cloud.sum(), 4);
        // azimuth 0: cloud projected one column left, frame edge assumed cloud
        assert_eq!(masks.shadow.column(1).sum(), 4);
        assert_eq!(masks.shadow.column(3).sum(), 4);
        assert_eq!(masks.shadow.column(0).sum(), 0);
        assert_eq!(pipeline.source.calls.get(), 1);
    }

    #[test]
    fn test_output_path() {
        let doc = doc_with(10.0, 0.0);
        let path = output_path(Path::new("/out"), &doc).unwrap();
        assert!(path.starts_with("/out/tiles/35/P/PM/2020/10/5/0"));
        assert!(path
            .to_string_lossy()
            .ends_with("_N02.09_s2cloudless.tif"));
    }
}
