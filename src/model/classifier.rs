// Classifier module - inference over a trained network

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use serde::Serialize;

use crate::error::ModelError;
use crate::features::Spectrogram;

use super::artifact::ModelArtifact;
use super::network::UrbanSoundCnn;

/// Predicted class plus the full probability vector in class-list order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub index: usize,
    pub probs: Vec<f32>,
}

/// A trained network paired with its class names
pub struct Classifier {
    model: UrbanSoundCnn,
    // keeps the weights alive alongside the model
    _varmap: VarMap,
    classes: Vec<String>,
    device: Device,
}

impl Classifier {
    pub(crate) fn from_parts(
        model: UrbanSoundCnn,
        varmap: VarMap,
        classes: Vec<String>,
        device: Device,
    ) -> Self {
        Self {
            model,
            _varmap: varmap,
            classes,
            device,
        }
    }

    /// Load weights and classes from disk
    ///
    /// # Errors
    /// * `ModelError::NotFound` - either file is missing
    /// * `ModelError::ShapeMismatch` - the weights were trained for a
    ///   different number of classes than the class list holds
    /// * `ModelError::Backend` - the weights file is unreadable
    pub fn load(artifact: &ModelArtifact) -> Result<Self, ModelError> {
        artifact.ensure_present()?;
        let classes = artifact.load_classes()?;
        let device = Device::Cpu;

        let tensors = candle_core::safetensors::load(&artifact.model_path, &device)?;
        let head_outputs = tensors
            .get("head.weight")
            .and_then(|w| w.dims().first().copied())
            .ok_or_else(|| ModelError::Backend {
                details: format!(
                    "{} has no usable head.weight tensor",
                    artifact.model_path.display()
                ),
            })?;
        if head_outputs != classes.len() {
            return Err(ModelError::ShapeMismatch {
                expected: format!("{} classes", classes.len()),
                actual: format!("{} model outputs", head_outputs),
            });
        }

        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = UrbanSoundCnn::new(classes.len(), vb)?;
        varmap.load(&artifact.model_path)?;

        log::info!(
            "[Classifier] Loaded {} with {} classes",
            artifact.model_path.display(),
            classes.len()
        );
        Ok(Self::from_parts(model, varmap, classes, device))
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Classify one spectrogram
    pub fn predict(&self, spectrogram: &Spectrogram) -> Result<Prediction, ModelError> {
        let (n_mels, n_frames) = spectrogram.shape();
        if spectrogram.data.len() != n_mels * n_frames {
            return Err(ModelError::ShapeMismatch {
                expected: format!("{} values", n_mels * n_frames),
                actual: format!("{} values", spectrogram.data.len()),
            });
        }
        UrbanSoundCnn::check_input(n_mels, n_frames).map_err(|_| ModelError::ShapeMismatch {
            expected: format!("at least {0}x{0}", super::network::MIN_INPUT_EXTENT),
            actual: format!("{}x{}", n_mels, n_frames),
        })?;

        let xs = Tensor::from_slice(&spectrogram.data, (1, n_mels, n_frames), &self.device)?;
        let probs = self
            .model
            .probabilities(&xs)?
            .squeeze(0)?
            .to_vec1::<f32>()?;

        let index = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let label = self
            .classes
            .get(index)
            .cloned()
            .ok_or_else(|| ModelError::ShapeMismatch {
                expected: format!("{} classes", self.classes.len()),
                actual: format!("class index {}", index),
            })?;

        Ok(Prediction { label, index, probs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn untrained(classes: &[&str]) -> Classifier {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = UrbanSoundCnn::new(classes.len(), vb).unwrap();
        Classifier::from_parts(
            model,
            varmap,
            classes.iter().map(|c| c.to_string()).collect(),
            device,
        )
    }

    fn flat(n_mels: usize, n_frames: usize, value: f32) -> Spectrogram {
        Spectrogram {
            n_mels,
            n_frames,
            data: vec![value; n_mels * n_frames],
        }
    }

    #[test]
    fn test_prediction_probs_align_with_classes() {
        let classifier = untrained(&["car_horn", "dog_bark", "siren"]);
        let prediction = classifier.predict(&flat(24, 32, 0.0)).unwrap();

        assert_eq!(prediction.probs.len(), 3);
        assert!((prediction.probs.iter().sum::<f32>() - 1.0).abs() < 1e-3);
        assert_eq!(prediction.label, classifier.classes()[prediction.index]);
    }

    #[test]
    fn test_too_small_input_is_shape_mismatch() {
        let classifier = untrained(&["a", "b"]);
        let result = classifier.predict(&flat(10, 10, 0.5));
        assert!(matches!(result, Err(ModelError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_load_restores_identical_outputs() {
        let dir = TempDir::new().unwrap();
        let artifact = ModelArtifact::beside_model(dir.path().join("m.safetensors"));
        let original = untrained(&["a", "b"]);
        artifact
            .save(&original._varmap, original.classes())
            .unwrap();

        let restored = Classifier::load(&artifact).unwrap();
        let input = Spectrogram {
            n_mels: 20,
            n_frames: 20,
            data: (0..400).map(|i| (i % 7) as f32 / 7.0).collect(),
        };
        let before = original.predict(&input).unwrap();
        let after = restored.predict(&input).unwrap();
        for (x, y) in before.probs.iter().zip(&after.probs) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_load_rejects_class_count_mismatch() {
        let dir = TempDir::new().unwrap();
        let artifact = ModelArtifact::beside_model(dir.path().join("m.safetensors"));
        let original = untrained(&["a", "b"]);
        artifact
            .save(&original._varmap, &["a".into(), "b".into(), "c".into()])
            .unwrap();

        assert!(matches!(
            Classifier::load(&artifact),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_load_rejects_scalar_head_weight() {
        let dir = TempDir::new().unwrap();
        let artifact = ModelArtifact::beside_model(dir.path().join("m.safetensors"));
        let varmap = VarMap::new();
        varmap
            .get((), "head.weight", candle_nn::Init::Const(1.0), DType::F32, &Device::Cpu)
            .unwrap();
        artifact.save(&varmap, &["a".into()]).unwrap();

        assert!(matches!(
            Classifier::load(&artifact),
            Err(ModelError::Backend { .. })
        ));
    }

    #[test]
    fn test_load_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let artifact = ModelArtifact::beside_model(dir.path().join("m.safetensors"));
        assert!(matches!(
            Classifier::load(&artifact),
            Err(ModelError::NotFound { .. })
        ));
    }
}
