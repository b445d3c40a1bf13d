use crate::types::{CfsiError, CfsiResult, Mask, ReflectanceCube};
use ndarray::{s, Array2, Array3, Array4, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Probability above which a pixel is classified as cloud
pub const CLOUD_THRESHOLD: f32 = 0.3;
/// Maximum provider cloudy-pixel percentage for a tile to be processed
pub const MAX_CLOUD_PERCENTAGE: f64 = 90.0;
/// Digital number to reflectance scale for Level-1C products
pub const REFLECTANCE_SCALE: f64 = 10000.0;

/// Band order of the reflectance cube handed to the classifier
pub const CLASSIFIER_BANDS: [&str; 13] = [
    "B01", "B02", "B03", "B04", "B05", "B06", "B07", "B08", "B8A", "B09", "B10", "B11", "B12",
];

/// Bands the pretrained model uses, as indices into [`CLASSIFIER_BANDS`]
pub const MODEL_BAND_INDICES: [usize; 10] = [0, 1, 3, 4, 7, 8, 9, 10, 11, 12];

/// Index of the near-infrared band (B08) in [`CLASSIFIER_BANDS`]
pub const NIR_BAND_INDEX: usize = 7;

/// Reject tiles whose provider cloud cover exceeds `ceiling` percent
pub fn check_cloud_cover(percentage: f64, ceiling: f64) -> CfsiResult<()> {
    if percentage > ceiling {
        log::info!(
            "Metadata cloud percentage {} greater than threshold value {}",
            percentage,
            ceiling
        );
        return Err(CfsiError::CloudCoverExceeded { percentage, ceiling });
    }
    Ok(())
}

/// Scale a `(rows, cols, bands)` stack of digital numbers to a single-scene
/// reflectance cube `(1, rows, cols, bands)`
pub fn scale_reflectance(digital_numbers: &Array3<u16>) -> ReflectanceCube {
    let scaled = digital_numbers.mapv(|dn| dn as f64 / REFLECTANCE_SCALE);
    scaled.insert_axis(Axis(0))
}

/// Pixel-wise cloud probability model
pub trait CloudClassifier {
    /// Cloud probability in `[0, 1]` for each pixel of a
    /// `(scene, rows, cols, features)` cube; output is `(scene, rows, cols)`
    fn cloud_probabilities(&self, features: &Array4<f32>) -> CfsiResult<Array3<f32>>;
}

/// Post-processing parameters of the pixel cloud detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudDetectorParams {
    pub threshold: f32,
    /// Radius of the disk used to average probabilities (0 disables)
    pub average_over: usize,
    /// Radius of the disk used to dilate the binary mask (0 disables)
    pub dilation_size: usize,
    /// Input carries all 13 bands; select the model bands before inference
    pub all_bands: bool,
}

impl Default for CloudDetectorParams {
    fn default() -> Self {
        Self {
            threshold: CLOUD_THRESHOLD,
            average_over: 1,
            dilation_size: 1,
            all_bands: true,
        }
    }
}

/// Cloud detector: feature selection, classifier call, smoothing,
/// thresholding and dilation
pub struct CloudDetector<C: CloudClassifier> {
    classifier: C,
    params: CloudDetectorParams,
}

impl<C: CloudClassifier> CloudDetector<C> {
    pub fn new(classifier: C, params: CloudDetectorParams) -> Self {
        Self { classifier, params }
    }

    pub fn params(&self) -> &CloudDetectorParams {
        &self.params
    }

    /// Per-scene cloud probability maps
    pub fn cloud_probability_maps(&self, reflectance: &ReflectanceCube) -> CfsiResult<Array3<f32>> {
        let bands = reflectance.len_of(Axis(3));
        let features: Array4<f32> = if self.params.all_bands {
            if bands != CLASSIFIER_BANDS.len() {
                return Err(CfsiError::Processing(format!(
                    "Expected {} bands, got {}",
                    CLASSIFIER_BANDS.len(),
                    bands
                )));
            }
            reflectance
                .select(Axis(3), &MODEL_BAND_INDICES)
                .mapv(|v| v as f32)
        } else {
            if bands != MODEL_BAND_INDICES.len() {
                return Err(CfsiError::Processing(format!(
                    "Expected {} model bands, got {}",
                    MODEL_BAND_INDICES.len(),
                    bands
                )));
            }
            reflectance.mapv(|v| v as f32)
        };

        let probs = self.classifier.cloud_probabilities(&features)?;
        let expected = (features.len_of(Axis(0)), features.len_of(Axis(1)), features.len_of(Axis(2)));
        if probs.dim() != expected {
            return Err(CfsiError::Classifier(format!(
                "Classifier returned shape {:?}, expected {:?}",
                probs.dim(),
                expected
            )));
        }
        Ok(probs)
    }

    /// Binary cloud masks `(scene, rows, cols)` from probability maps
    pub fn masks_from_probabilities(&self, probs: &Array3<f32>) -> Array3<u8> {
        let mut masks = Array3::<u8>::zeros(probs.dim());
        for (scene, mut out) in masks.outer_iter_mut().enumerate() {
            let mut prob = probs.index_axis(Axis(0), scene).to_owned();
            if self.params.average_over > 0 {
                prob = average_disk(&prob, self.params.average_over);
            }
            let mut mask = prob.mapv(|p| u8::from(p > self.params.threshold));
            if self.params.dilation_size > 0 {
                mask = dilate_disk(&mask, self.params.dilation_size);
            }
            out.assign(&mask);
        }
        masks
    }

    pub fn cloud_masks(&self, reflectance: &ReflectanceCube) -> CfsiResult<Array3<u8>> {
        let probs = self.cloud_probability_maps(reflectance)?;
        Ok(self.masks_from_probabilities(&probs))
    }

    /// Binary cloud mask of a single-scene cube, scene axis removed
    pub fn generate_cloud_mask(&self, reflectance: &ReflectanceCube) -> CfsiResult<Mask> {
        let scenes = reflectance.len_of(Axis(0));
        if scenes != 1 {
            return Err(CfsiError::Processing(format!(
                "Expected a single scene, got {}",
                scenes
            )));
        }
        log::debug!("Array shape: {:?}", reflectance.shape());
        let masks = self.cloud_masks(reflectance)?;
        Ok(masks.index_axis_move(Axis(0), 0))
    }
}

/// Offsets of a disk structuring element of radius `r` (`dy² + dx² <= r²`)
pub fn disk_offsets(radius: usize) -> Vec<(isize, isize)> {
    let r = radius as isize;
    let mut offsets = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            if dy * dy + dx * dx <= r * r {
                offsets.push((dy, dx));
            }
        }
    }
    offsets
}

/// Reflect an index into `0..len`, edge pixel repeated (`cba|abcd|dcb`)
fn reflect_index(i: isize, len: usize) -> usize {
    let n = len as isize;
    let mut m = i.rem_euclid(2 * n);
    if m >= n {
        m = 2 * n - 1 - m;
    }
    m as usize
}

fn average_at(image: &Array2<f32>, offsets: &[(isize, isize)], i: usize, j: usize) -> f32 {
    let (rows, cols) = image.dim();
    let sum: f32 = offsets
        .iter()
        .map(|&(dy, dx)| {
            let y = reflect_index(i as isize + dy, rows);
            let x = reflect_index(j as isize + dx, cols);
            image[[y, x]]
        })
        .sum();
    sum / offsets.len() as f32
}

/// Convolve with a normalised disk kernel, reflecting at the borders
pub fn average_disk(image: &Array2<f32>, radius: usize) -> Array2<f32> {
    let offsets = disk_offsets(radius);
    let mut out = Array2::<f32>::zeros(image.dim());
    fill_average(&mut out, image, &offsets);
    out
}

#[cfg(feature = "parallel")]
fn fill_average(out: &mut Array2<f32>, image: &Array2<f32>, offsets: &[(isize, isize)]) {
    Zip::indexed(out).par_for_each(|(i, j), v| *v = average_at(image, offsets, i, j));
}

#[cfg(not(feature = "parallel"))]
fn fill_average(out: &mut Array2<f32>, image: &Array2<f32>, offsets: &[(isize, isize)]) {
    Zip::indexed(out).for_each(|(i, j), v| *v = average_at(image, offsets, i, j));
}

fn dilated_at(mask: &Mask, offsets: &[(isize, isize)], i: usize, j: usize) -> u8 {
    let (rows, cols) = mask.dim();
    let hit = offsets.iter().any(|&(dy, dx)| {
        let y = i as isize + dy;
        let x = j as isize + dx;
        y >= 0 && x >= 0 && (y as usize) < rows && (x as usize) < cols && mask[[y as usize, x as usize]] != 0
    });
    u8::from(hit)
}

/// Binary dilation with a disk structuring element; pixels outside the frame are clear
#[cfg(feature = "parallel")]
pub fn dilate_disk(mask: &Mask, radius: usize) -> Mask {
    use rayon::prelude::*;

    let offsets = disk_offsets(radius);
    let (rows, cols) = mask.dim();

    let data: Vec<u8> = (0..rows)
        .into_par_iter()
        .flat_map_iter(|i| {
            let offsets = &offsets;
            (0..cols).map(move |j| dilated_at(mask, offsets, i, j))
        })
        .collect();

    Array2::from_shape_vec((rows, cols), data).unwrap_or_else(|_| Array2::zeros((rows, cols)))
}

/// Binary dilation with a disk structuring element; pixels outside the frame are clear
#[cfg(not(feature = "parallel"))]
pub fn dilate_disk(mask: &Mask, radius: usize) -> Mask {
    let offsets = disk_offsets(radius);
    Array2::from_shape_fn(mask.dim(), |(i, j)| dilated_at(mask, &offsets, i, j))
}

/// Near-infrared band of a single-scene cube in classifier order
pub fn nir_band(reflectance: &ReflectanceCube) -> Array2<f64> {
    reflectance.slice(s![0, .., .., NIR_BAND_INDEX]).to_owned()
}
