use crate::core::cloud_mask::CloudClassifier;
use crate::types::{CfsiError, CfsiResult};
use ndarray::{Array3, Array4};
use std::path::Path;
use tract_onnx::prelude::*;

/// Pixels per inference call; the last batch is zero padded
pub const INFERENCE_BATCH: usize = 16384;

/// Pixel cloud classifier backed by an ONNX export of the pretrained
/// gradient-boosting model.
///
/// The model takes `[batch, features]` reflectances and must expose a
/// probability output, either `[batch, classes]` (cloud = last column) or
/// `[batch]`. Export without a ZipMap node.
pub struct OnnxCloudClassifier {
    model: TypedRunnableModel<TypedModel>,
    features: usize,
}

impl OnnxCloudClassifier {
    pub fn load<P: AsRef<Path>>(model_path: P, features: usize) -> CfsiResult<Self> {
        log::info!("Loading cloud classifier from {}", model_path.as_ref().display());

        let model = tract_onnx::onnx()
            .model_for_path(model_path.as_ref())
            .and_then(|m| m.with_input_fact(0, f32::fact([INFERENCE_BATCH, features]).into()))
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| CfsiError::Classifier(format!("Cannot load ONNX model: {}", e)))?;

        Ok(Self { model, features })
    }

    fn run_batch(&self, batch: Vec<f32>, valid: usize) -> CfsiResult<Vec<f32>> {
        let input: Tensor = tract_ndarray::Array2::from_shape_vec((INFERENCE_BATCH, self.features), batch)
            .map_err(|e| CfsiError::Classifier(e.to_string()))?
            .into();

        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| CfsiError::Classifier(format!("Inference failed: {}", e)))?;

        let probs = outputs
            .iter()
            .find(|t| t.datum_type() == f32::datum_type() && (t.rank() == 2 || t.rank() == 1))
            .ok_or_else(|| CfsiError::Classifier("Model has no f32 probability output".to_string()))?;

        let shape = probs.shape().to_vec();
        let data = probs
            .as_slice::<f32>()
            .map_err(|e| CfsiError::Classifier(e.to_string()))?;

        let values = match shape.as_slice() {
            [rows, cols] if *rows >= valid && *cols > 0 => {
                (0..valid).map(|i| data[i * cols + cols - 1]).collect()
            }
            [rows] if *rows >= valid => data[..valid].to_vec(),
            _ => {
                return Err(CfsiError::Classifier(format!(
                    "Unexpected probability output shape {:?}",
                    shape
                )))
            }
        };
        Ok(values)
    }
}

impl CloudClassifier for OnnxCloudClassifier {
    fn cloud_probabilities(&self, features: &Array4<f32>) -> CfsiResult<Array3<f32>> {
        let (scenes, rows, cols, nf) = features.dim();
        if nf != self.features {
            return Err(CfsiError::Classifier(format!(
                "Model expects {} features, got {}",
                self.features, nf
            )));
        }

        let pixels = scenes * rows * cols;
        let mut probs = Vec::with_capacity(pixels);
        let flat = features.as_standard_layout();
        let flat = flat
            .as_slice()
            .ok_or_else(|| CfsiError::Processing("Feature cube is not contiguous".to_string()))?;

        for chunk in flat.chunks(INFERENCE_BATCH * nf) {
            let valid = chunk.len() / nf;
            let mut batch = chunk.to_vec();
            batch.resize(INFERENCE_BATCH * nf, 0.0);
            probs.extend(self.run_batch(batch, valid)?);
        }
        log::debug!("Classified {} pixels", pixels);

        Array3::from_shape_vec((scenes, rows, cols), probs)
            .map_err(|e| CfsiError::Classifier(e.to_string()))
    }
}
