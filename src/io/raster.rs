use crate::types::{CfsiError, CfsiResult};
use gdal::raster::{Buffer, GdalType, ResampleAlg};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// Bands read back from a multi-band raster
#[derive(Debug, Clone)]
pub struct RasterBands<T> {
    pub bands: Vec<Array2<T>>,
    pub nodata: Vec<Option<f64>>,
    pub geo_transform: [f64; 6],
    pub projection: String,
}

/// Write same-shaped arrays as bands 1..=N of a GeoTIFF.
///
/// Every band gets `nodata` as its no-data value.
pub fn write_multiband<T, P>(
    output_path: P,
    bands: &[Array2<T>],
    geo_transform: &[f64; 6],
    projection: &str,
    nodata: f64,
) -> CfsiResult<()>
where
    T: GdalType + Copy,
    P: AsRef<Path>,
{
    let first = bands
        .first()
        .ok_or_else(|| CfsiError::Processing("No bands to write".to_string()))?;
    let (height, width) = first.dim();
    if let Some(bad) = bands.iter().position(|b| b.dim() != (height, width)) {
        return Err(CfsiError::Processing(format!(
            "Band {} has shape {:?}, expected {:?}",
            bad + 1,
            bands[bad].dim(),
            (height, width)
        )));
    }

    log::info!(
        "Writing {} band(s) of {}x{} to {}",
        bands.len(),
        width,
        height,
        output_path.as_ref().display()
    );

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type::<T, _>(
        output_path.as_ref(),
        width as isize,
        height as isize,
        bands.len() as isize,
    )?;

    dataset.set_geo_transform(geo_transform)?;
    if !projection.is_empty() {
        dataset.set_projection(projection)?;
    }

    for (idx, data) in bands.iter().enumerate() {
        let mut rasterband = dataset.rasterband(idx as isize + 1)?;
        let flat_data: Vec<T> = data.iter().copied().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;
        rasterband.set_no_data_value(Some(nodata))?;
    }

    Ok(())
}

/// Read every band of a raster at native resolution
pub fn read_multiband<T, P>(path: P) -> CfsiResult<RasterBands<T>>
where
    T: GdalType + Copy,
    P: AsRef<Path>,
{
    let dataset = Dataset::open(path.as_ref())?;
    let (width, height) = dataset.raster_size();

    let mut bands = Vec::new();
    let mut nodata = Vec::new();
    for idx in 1..=dataset.raster_count() {
        let rasterband = dataset.rasterband(idx)?;
        let buffer = rasterband.read_as::<T>((0, 0), (width, height), (width, height), None)?;
        bands.push(to_array(buffer.data, height, width)?);
        nodata.push(rasterband.no_data_value());
    }

    Ok(RasterBands {
        bands,
        nodata,
        geo_transform: dataset.geo_transform()?,
        projection: dataset.projection(),
    })
}

/// Read band 1 of `gdal_path`, resampled with nearest neighbour onto a
/// `(rows, cols)` pixel grid covering the same extent
pub fn read_band_resampled<T>(gdal_path: &str, shape: (usize, usize)) -> CfsiResult<Array2<T>>
where
    T: GdalType + Copy,
{
    let (rows, cols) = shape;
    let dataset = Dataset::open(Path::new(gdal_path))?;
    let (width, height) = dataset.raster_size();
    log::debug!(
        "Reading {} ({}x{}) onto {}x{} grid",
        gdal_path,
        width,
        height,
        cols,
        rows
    );

    let rasterband = dataset.rasterband(1)?;
    let buffer = rasterband.read_as::<T>(
        (0, 0),
        (width, height),
        (cols, rows),
        Some(ResampleAlg::NearestNeighbour),
    )?;
    to_array(buffer.data, rows, cols)
}

/// WKT for a CRS code such as `epsg:32635`
pub fn crs_to_wkt(crs: &str) -> CfsiResult<String> {
    let srs = match crs.to_lowercase().strip_prefix("epsg:").map(str::parse::<u32>) {
        Some(Ok(code)) => SpatialRef::from_epsg(code)?,
        _ => SpatialRef::from_definition(crs)?,
    };
    Ok(srs.to_wkt()?)
}

fn to_array<T>(data: Vec<T>, rows: usize, cols: usize) -> CfsiResult<Array2<T>> {
    Array2::from_shape_vec((rows, cols), data)
        .map_err(|e| CfsiError::Processing(format!("Raster buffer has wrong size: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_rejects_mismatched_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let a = Array2::<u8>::zeros((2, 2));
        let b = Array2::<u8>::zeros((3, 2));
        let gt = [0.0, 10.0, 0.0, 0.0, 0.0, -10.0];
        assert!(write_multiband(dir.path().join("x.tif"), &[a, b], &gt, "", 0.0).is_err());
        assert!(write_multiband::<u8, _>(dir.path().join("y.tif"), &[], &gt, "", 0.0).is_err());
    }

    #[test]
    fn test_single_band_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("single.tif");
        let data = array![[1.5f32, 2.0], [3.0, -4.25]];
        let gt = [500000.0, 20.0, 0.0, 1300000.0, 0.0, -20.0];
        let wkt = crs_to_wkt("epsg:32635").unwrap();

        write_multiband(&path, &[data.clone()], &gt, &wkt, -9999.0).unwrap();
        let read = read_multiband::<f32, _>(&path).unwrap();

        assert_eq!(read.bands.len(), 1);
        assert_eq!(read.bands[0], data);
        assert_eq!(read.nodata, vec![Some(-9999.0)]);
        assert_eq!(read.geo_transform, gt);
    }
}
