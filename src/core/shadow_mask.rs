use crate::types::{CfsiError, CfsiResult, Mask};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Distance (pixels) the cloud mask is projected along the sun azimuth
pub const CLOUD_PROJECTION_DISTANCE: f64 = 1.0;
/// NIR reflectance at or below which a pixel counts as dark
pub const DARK_PIXEL_THRESHOLD: f64 = 0.15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowParams {
    pub projection_distance: f64,
    pub dark_pixel_threshold: f64,
}

impl Default for ShadowParams {
    fn default() -> Self {
        Self {
            projection_distance: CLOUD_PROJECTION_DISTANCE,
            dark_pixel_threshold: DARK_PIXEL_THRESHOLD,
        }
    }
}

/// Integer (row, col) offset of the projected cloud mask for a sun azimuth.
///
/// Components are truncated toward zero, so sub-pixel shifts vanish.
pub fn projection_offset(sun_azimuth_deg: f64, distance: f64) -> (isize, isize) {
    let az = sun_azimuth_deg.to_radians();
    let x = az.cos() * distance;
    let y = az.sin() * distance;
    (y as isize, x as isize)
}

/// Shift `mask` so that `out[r, c] = mask[r + dy, c + dx]`; samples falling
/// outside the frame are set to 1. Offsets beyond the frame size are clamped
/// to it.
pub fn shift_mask(mask: &Mask, offset: (isize, isize)) -> Mask {
    let (rows, cols) = mask.dim();
    let dy = clamp_offset(offset.0, rows);
    let dx = clamp_offset(offset.1, cols);
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let y = r as isize + dy;
        let x = c as isize + dx;
        if y < 0 || x < 0 || y as usize >= rows || x as usize >= cols {
            1
        } else {
            mask[[y as usize, x as usize]]
        }
    })
}

fn clamp_offset(offset: isize, extent: usize) -> isize {
    let limit = isize::try_from(extent).unwrap_or(isize::MAX);
    offset.clamp(-limit, limit)
}

/// Cloud-shadow mask from the projected cloud mask and dark NIR pixels.
///
/// A pixel is shadow when it is not cloud, the shifted cloud mask covers it
/// and its NIR reflectance is at or below the dark-pixel threshold.
pub fn generate_cloud_shadow_mask(
    nir: &Array2<f64>,
    cloud_mask: &Mask,
    sun_azimuth_deg: f64,
    params: &ShadowParams,
) -> CfsiResult<Mask> {
    if nir.dim() != cloud_mask.dim() {
        return Err(CfsiError::Processing(format!(
            "NIR band shape {:?} does not match cloud mask shape {:?}",
            nir.dim(),
            cloud_mask.dim()
        )));
    }

    let offset = projection_offset(sun_azimuth_deg, params.projection_distance);
    let shifted = shift_mask(cloud_mask, offset);
    log::debug!("Sun azimuth {:.2} deg -> shadow offset (rows, cols) {:?}", sun_azimuth_deg, offset);

    let threshold = params.dark_pixel_threshold;
    let shadow = Zip::from(nir)
        .and(cloud_mask)
        .and(&shifted)
        .map_collect(|&nir, &cloud, &projected| {
            u8::from(cloud == 0 && projected == 1 && nir <= threshold)
        });

    Ok(shadow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_offset_truncation() {
        assert_eq!(projection_offset(0.0, 1.0), (0, 1));
        assert_eq!(projection_offset(90.0, 1.0), (1, 0));
        assert_eq!(projection_offset(180.0, 1.0), (0, -1));
        // sub-pixel shifts collapse to zero
        assert_eq!(projection_offset(45.0, 1.0), (0, 0));
        assert_eq!(projection_offset(45.0, 3.0), (2, 2));
    }

    #[test]
    fn test_shift_beyond_frame() {
        let cloud = array![[0u8, 1], [0, 0]];
        let offset = projection_offset(45.0, 1e300);
        assert_eq!(offset, (isize::MAX, isize::MAX));
        assert_eq!(shift_mask(&cloud, offset), Array2::<u8>::ones((2, 2)));
        assert_eq!(shift_mask(&cloud, (isize::MIN, 0)), Array2::<u8>::ones((2, 2)));

        let nir = Array2::<f64>::zeros((2, 2));
        let params = ShadowParams { projection_distance: 1e300, ..Default::default() };
        let shadow = generate_cloud_shadow_mask(&nir, &cloud, 45.0, &params).unwrap();
        assert_eq!(shadow, array![[1u8, 0], [1, 1]]);
    }

    #[test]
    fn test_shift_along_columns() {
        let cloud = array![
            [0u8, 0, 1, 0],
            [0, 0, 1, 0],
            [0, 0, 0, 0],
            [1, 0, 0, 0],
        ];
        let shifted = shift_mask(&cloud, projection_offset(0.0, 1.0));
        let expected = array![
            [0u8, 1, 0, 1],
            [0, 1, 0, 1],
            [0, 0, 0, 1],
            [0, 0, 0, 1],
        ];
        assert_eq!(shifted, expected);
    }

    #[test]
    fn test_shadow_at_zero_azimuth() {
        let cloud = array![
            [0u8, 0, 1, 0],
            [0, 0, 1, 0],
            [0, 0, 0, 0],
            [1, 0, 0, 0],
        ];
        let mut nir = Array2::<f64>::from_elem((4, 4), 0.1);
        nir[[1, 1]] = 0.4;

        let shadow = generate_cloud_shadow_mask(&nir, &cloud, 0.0, &ShadowParams::default()).unwrap();
        let expected = array![
            [0u8, 1, 0, 1],
            [0, 0, 0, 1],
            [0, 0, 0, 1],
            [0, 0, 0, 1],
        ];
        assert_eq!(shadow, expected);
    }

    #[test]
    fn test_negative_row_shift() {
        let mut cloud = Array2::<u8>::zeros((3, 3));
        cloud[[0, 1]] = 1;
        let shifted = shift_mask(&cloud, projection_offset(270.0, 1.0));
        assert_eq!(shifted, array![[1u8, 1, 1], [0, 1, 0], [0, 0, 0]]);
    }

    #[test]
    fn test_shape_mismatch() {
        let nir = Array2::<f64>::zeros((2, 2));
        let cloud = Array2::<u8>::zeros((3, 2));
        assert!(generate_cloud_shadow_mask(&nir, &cloud, 10.0, &ShadowParams::default()).is_err());
    }
}
