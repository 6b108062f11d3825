// Trainer - fits the CNN on a feature cache and reports validation metrics
//
// Flow:
// 1. validate the cache (non-empty, aligned, labels in range, input size)
// 2. stratified split with the seeded RNG
// 3. mini-batch AdamW on cross-entropy, reshuffling the training indices
//    every epoch with the same RNG
// 4. classification report + confusion matrix over the validation split

use std::path::Path;

use candle_core::{DType, Device, Tensor, D};
use candle_nn::{AdamW, ModuleT, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use crate::cache::FeatureCache;
use crate::config::TrainingConfig;
use crate::error::{log_model_error, ModelError};

use super::artifact::ModelArtifact;
use super::classifier::Classifier;
use super::metrics::ClassificationReport;
use super::network::UrbanSoundCnn;
use super::split::{stratified_split, SplitIndices};

/// Loss and accuracy after one epoch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f32,
    pub train_accuracy: f32,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
}

/// Result of a training run, ready to be persisted or served
pub struct TrainedModel {
    model: UrbanSoundCnn,
    varmap: VarMap,
    classes: Vec<String>,
    device: Device,
    pub history: Vec<EpochMetrics>,
    pub report: ClassificationReport,
}

impl TrainedModel {
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn save(&self, artifact: &ModelArtifact) -> Result<(), ModelError> {
        artifact.save(&self.varmap, &self.classes)
    }

    pub fn into_classifier(self) -> Classifier {
        Classifier::from_parts(self.model, self.varmap, self.classes, self.device)
    }
}

/// Trainer owns the hyperparameters of a run
pub struct Trainer {
    config: TrainingConfig,
    device: Device,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            device: Device::Cpu,
        }
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.config.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Check a cache before any fitting happens
    ///
    /// # Errors
    /// `ModelError::InvalidDataset` when the cache is empty, its arrays
    /// disagree in length, a label has no class name, or the spectrograms
    /// are too small for the network.
    pub fn validate(cache: &FeatureCache) -> Result<(), ModelError> {
        if cache.labels.is_empty() || cache.features.is_empty() {
            return Err(ModelError::invalid("feature cache is empty"));
        }
        let block = cache.n_mels * cache.n_frames;
        if block == 0 || cache.features.len() != cache.labels.len() * block {
            return Err(ModelError::invalid(format!(
                "{} labels do not match {} feature values of shape ({}, {})",
                cache.labels.len(),
                cache.features.len(),
                cache.n_mels,
                cache.n_frames
            )));
        }
        if cache.classes.is_empty() {
            return Err(ModelError::invalid("class list is empty"));
        }
        if let Some(bad) = cache
            .labels
            .iter()
            .find(|&&l| l < 0 || l as usize >= cache.classes.len())
        {
            return Err(ModelError::invalid(format!(
                "label {} outside {} classes",
                bad,
                cache.classes.len()
            )));
        }
        UrbanSoundCnn::check_input(cache.n_mels, cache.n_frames)
    }

    /// Fit a fresh network on `cache`
    pub fn fit(&self, cache: &FeatureCache) -> Result<TrainedModel, ModelError> {
        Self::validate(cache).map_err(|err| {
            log_model_error(&err, "fit");
            err
        })?;
        if self.config.batch_size == 0 || self.config.epochs == 0 {
            return Err(ModelError::invalid("epochs and batch size must be positive"));
        }

        let span = tracing::info_span!(
            "training_run",
            samples = cache.len(),
            classes = cache.classes.len(),
            epochs = self.config.epochs
        );
        let _guard = span.enter();

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let SplitIndices { mut train, validation } =
            stratified_split(&cache.labels, self.config.validation_ratio, &mut rng);
        tracing::info!(
            "[Trainer] {} training / {} validation samples, input ({}, {})",
            train.len(),
            validation.len(),
            cache.n_mels,
            cache.n_frames
        );
        if validation.is_empty() {
            tracing::warn!("[Trainer] Validation split is empty; report will be blank");
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
        let model = UrbanSoundCnn::new(cache.classes.len(), vb)?;
        let mut optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: self.config.learning_rate,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;

        let mut history = Vec::with_capacity(self.config.epochs);
        for epoch in 1..=self.config.epochs {
            train.shuffle(&mut rng);

            let mut loss_sum = 0.0f32;
            let mut correct = 0usize;
            for batch in train.chunks(self.config.batch_size) {
                let (xs, ys) = self.batch_tensors(cache, batch)?;
                let logits = model.forward_t(&xs, true)?;
                let loss = candle_nn::loss::cross_entropy(&logits, &ys)?;
                optimizer.backward_step(&loss)?;

                loss_sum += loss.to_scalar::<f32>()? * batch.len() as f32;
                correct += count_correct(&logits, &ys)?;
            }

            let (val_loss, val_accuracy) = if validation.is_empty() {
                (None, None)
            } else {
                let (loss, predicted) = self.evaluate(&model, cache, &validation)?;
                let hits = predicted
                    .iter()
                    .zip(&validation)
                    .filter(|&(p, &i)| *p == cache.labels[i] as usize)
                    .count();
                (Some(loss), Some(hits as f32 / validation.len() as f32))
            };

            let metrics = EpochMetrics {
                epoch,
                train_loss: loss_sum / train.len().max(1) as f32,
                train_accuracy: correct as f32 / train.len().max(1) as f32,
                val_loss,
                val_accuracy,
            };
            tracing::info!(
                "[Trainer] Epoch {}/{}: loss={:.4} acc={:.3} val_loss={} val_acc={}",
                epoch,
                self.config.epochs,
                metrics.train_loss,
                metrics.train_accuracy,
                fmt_optional(metrics.val_loss),
                fmt_optional(metrics.val_accuracy)
            );
            history.push(metrics);
        }

        let truth: Vec<usize> = validation.iter().map(|&i| cache.labels[i] as usize).collect();
        let predicted = if validation.is_empty() {
            Vec::new()
        } else {
            self.evaluate(&model, cache, &validation)?.1
        };
        let report = ClassificationReport::new(&cache.classes, &truth, &predicted);
        tracing::info!("[Trainer] Validation accuracy {:.3}", report.accuracy);

        Ok(TrainedModel {
            model,
            varmap,
            classes: cache.classes.clone(),
            device: self.device.clone(),
            history,
            report,
        })
    }

    /// Load a cache directory, fit, and persist the artifact
    pub fn train_from_cache_dir<P: AsRef<Path>>(
        &self,
        cache_dir: P,
        artifact: &ModelArtifact,
    ) -> Result<TrainedModel, ModelError> {
        let cache = FeatureCache::load(cache_dir)?;
        let trained = self.fit(&cache)?;
        trained.save(artifact)?;
        Ok(trained)
    }

    fn batch_tensors(&self, cache: &FeatureCache, indices: &[usize]) -> Result<(Tensor, Tensor), ModelError> {
        let block = cache.n_mels * cache.n_frames;
        let mut features = Vec::with_capacity(indices.len() * block);
        let mut labels = Vec::with_capacity(indices.len());
        for &i in indices {
            let sample = cache
                .sample(i)
                .ok_or_else(|| ModelError::invalid(format!("sample {} out of range", i)))?;
            features.extend_from_slice(sample);
            labels.push(cache.labels[i] as u32);
        }

        let xs = Tensor::from_vec(features, (indices.len(), cache.n_mels, cache.n_frames), &self.device)?;
        let ys = Tensor::from_vec(labels, indices.len(), &self.device)?;
        Ok((xs, ys))
    }

    /// Mean loss and predicted class per index, in inference mode
    fn evaluate(
        &self,
        model: &UrbanSoundCnn,
        cache: &FeatureCache,
        indices: &[usize],
    ) -> Result<(f32, Vec<usize>), ModelError> {
        let mut loss_sum = 0.0f32;
        let mut predicted = Vec::with_capacity(indices.len());
        for batch in indices.chunks(self.config.batch_size.max(1)) {
            let (xs, ys) = self.batch_tensors(cache, batch)?;
            let logits = model.forward_t(&xs, false)?;
            loss_sum += candle_nn::loss::cross_entropy(&logits, &ys)?.to_scalar::<f32>()? * batch.len() as f32;
            predicted.extend(
                logits
                    .argmax(D::Minus1)?
                    .to_vec1::<u32>()?
                    .into_iter()
                    .map(|p| p as usize),
            );
        }
        Ok((loss_sum / indices.len().max(1) as f32, predicted))
    }
}

fn count_correct(logits: &Tensor, ys: &Tensor) -> Result<usize, ModelError> {
    let hits = logits
        .argmax(D::Minus1)?
        .eq(ys)?
        .to_dtype(DType::U32)?
        .sum_all()?
        .to_scalar::<u32>()?;
    Ok(hits as usize)
}

fn fmt_optional(value: Option<f32>) -> String {
    value
        .map(|v| format!("{:.4}", v))
        .unwrap_or_else(|| "n/a".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_cache;
    use tempfile::TempDir;

    fn quick_config() -> TrainingConfig {
        TrainingConfig {
            epochs: 2,
            batch_size: 4,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_empty_cache_is_invalid() {
        let cache = FeatureCache::new(Vec::new(), Vec::new(), vec!["a".into()], 24, 32).unwrap();
        let result = Trainer::new(quick_config()).fit(&cache);
        assert!(matches!(result, Err(ModelError::InvalidDataset { .. })));
    }

    #[test]
    fn test_misaligned_cache_is_invalid() {
        let mut cache = synthetic_cache(&[2, 2], 20, 20, 3);
        cache.labels.pop();
        assert!(matches!(
            Trainer::validate(&cache),
            Err(ModelError::InvalidDataset { .. })
        ));
    }

    #[test]
    fn test_small_spectrograms_are_invalid() {
        let cache = synthetic_cache(&[2, 2], 12, 40, 3);
        assert!(matches!(
            Trainer::validate(&cache),
            Err(ModelError::InvalidDataset { .. })
        ));
    }

    #[test]
    fn test_fit_produces_history_and_report() {
        let cache = synthetic_cache(&[5, 5], 20, 20, 11);
        let trained = Trainer::new(quick_config()).fit(&cache).unwrap();

        assert_eq!(trained.history.len(), 2);
        assert!(trained.history.iter().all(|m| m.train_loss.is_finite()));
        assert_eq!(trained.report.confusion.total(), 2);
        assert_eq!(trained.report.per_class[0].support, 1);
        assert_eq!(trained.report.per_class[1].support, 1);
        assert_eq!(trained.classes(), &["class_0", "class_1"]);
    }

    #[test]
    fn test_train_from_cache_dir_writes_artifact() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("processed");
        synthetic_cache(&[4, 4, 4], 20, 20, 5).save(&cache_dir).unwrap();

        let artifact = ModelArtifact::beside_model(dir.path().join("models/us8k_cnn.safetensors"));
        let trained = Trainer::new(quick_config())
            .with_epochs(1)
            .train_from_cache_dir(&cache_dir, &artifact)
            .unwrap();

        assert!(artifact.ensure_present().is_ok());
        let classifier = Classifier::load(&artifact).unwrap();
        assert_eq!(classifier.classes(), trained.classes());
    }

    #[test]
    fn test_missing_cache_dir_is_not_found() {
        let dir = TempDir::new().unwrap();
        let artifact = ModelArtifact::beside_model(dir.path().join("m.safetensors"));
        let result = Trainer::new(quick_config()).train_from_cache_dir(dir.path().join("none"), &artifact);
        assert!(matches!(result, Err(ModelError::NotFound { .. })));
    }
}
