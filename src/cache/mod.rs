// FeatureCache - precomputed spectrograms persisted between runs
//
// Module organization:
// - npy: NPY array reader/writer
// - mod.rs: FeatureCache (in-memory arrays + disk layout) and
//   FeatureCacheBuilder (records -> spectrograms)
//
// Disk layout under the cache directory:
// - X.npy: f32, shape (n, n_mels, n_frames)
// - y.npy: i64, shape (n,)
// - classes.txt: one class name per line, index = line number

pub mod npy;

use std::fs;
use std::path::{Path, PathBuf};

use crate::dataset::{class_names, DatasetRecord};
use crate::error::DatasetError;
use crate::features::{FeaturePipeline, Spectrogram};

pub const FEATURES_FILE: &str = "X.npy";
pub const LABELS_FILE: &str = "y.npy";
pub const CLASSES_FILE: &str = "classes.txt";

const PROGRESS_EVERY: usize = 500;

/// Spectrogram features with integer labels and their class names
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCache {
    /// Row-major `(n, n_mels, n_frames)`
    pub features: Vec<f32>,
    pub labels: Vec<i64>,
    pub classes: Vec<String>,
    pub n_mels: usize,
    pub n_frames: usize,
}

impl FeatureCache {
    /// Assemble a cache, checking the arrays agree with each other
    ///
    /// # Errors
    /// `DatasetError::InvalidDataset` when the feature buffer does not hold
    /// exactly one `(n_mels, n_frames)` block per label, or a label has no
    /// class name.
    pub fn new(
        features: Vec<f32>,
        labels: Vec<i64>,
        classes: Vec<String>,
        n_mels: usize,
        n_frames: usize,
    ) -> Result<Self, DatasetError> {
        let block = n_mels * n_frames;
        if features.len() != labels.len() * block {
            return Err(DatasetError::invalid(format!(
                "{} labels need {} feature values, found {}",
                labels.len(),
                labels.len() * block,
                features.len()
            )));
        }
        if let Some(bad) = labels
            .iter()
            .find(|&&label| label < 0 || label as usize >= classes.len())
        {
            return Err(DatasetError::invalid(format!(
                "label {} outside {} classes",
                bad,
                classes.len()
            )));
        }

        Ok(Self {
            features,
            labels,
            classes,
            n_mels,
            n_frames,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.len(), self.n_mels, self.n_frames)
    }

    /// Features of sample `index` as a flat `(n_mels, n_frames)` slice
    pub fn sample(&self, index: usize) -> Option<&[f32]> {
        let block = self.n_mels * self.n_frames;
        self.features.get(index * block..(index + 1) * block)
    }

    /// Per-class sample counts, indexed like `classes`
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.classes.len()];
        for &label in &self.labels {
            counts[label as usize] += 1;
        }
        counts
    }

    /// Write `X.npy`, `y.npy` and `classes.txt` into `dir`
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<(), DatasetError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        npy::write_f32(
            &dir.join(FEATURES_FILE),
            &[self.len(), self.n_mels, self.n_frames],
            &self.features,
        )?;
        npy::write_i64(&dir.join(LABELS_FILE), &[self.len()], &self.labels)?;

        let mut listing = self.classes.join("\n");
        listing.push('\n');
        fs::write(dir.join(CLASSES_FILE), listing)?;

        log::info!(
            "[FeatureCache] Saved {} samples of shape ({}, {}) to {}",
            self.len(),
            self.n_mels,
            self.n_frames,
            dir.display()
        );
        Ok(())
    }

    /// Read a cache written by [`FeatureCache::save`]
    ///
    /// # Errors
    /// * `DatasetError::NotFound` - any of the three files is absent
    /// * `DatasetError::Format` - `X.npy` is not three-dimensional
    /// * `DatasetError::InvalidDataset` - arrays disagree
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self, DatasetError> {
        let dir = dir.as_ref();
        let paths: [PathBuf; 3] = [
            dir.join(FEATURES_FILE),
            dir.join(LABELS_FILE),
            dir.join(CLASSES_FILE),
        ];
        if let Some(missing) = paths.iter().find(|p| !p.is_file()) {
            return Err(DatasetError::not_found(missing));
        }

        let x = npy::read(&paths[0])?;
        let (n, n_mels, n_frames) = match x.shape.as_slice() {
            &[n, mels, frames] => (n, mels, frames),
            other => {
                return Err(DatasetError::format(format!(
                    "{} has shape {:?}, expected 3 dimensions",
                    FEATURES_FILE, other
                )))
            }
        };
        let features = x.into_f32()?;
        let labels = npy::read(&paths[1])?.into_i64()?;
        if labels.len() != n {
            return Err(DatasetError::invalid(format!(
                "{} has {} samples but {} has {} labels",
                FEATURES_FILE,
                n,
                LABELS_FILE,
                labels.len()
            )));
        }

        let classes: Vec<String> = fs::read_to_string(&paths[2])?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        let cache = Self::new(features, labels, classes, n_mels, n_frames)?;
        log::info!(
            "[FeatureCache] Loaded {} samples, {} classes from {}",
            cache.len(),
            cache.classes.len(),
            dir.display()
        );
        Ok(cache)
    }
}

/// FeatureCacheBuilder runs every record through the feature pipeline
pub struct FeatureCacheBuilder {
    pipeline: FeaturePipeline,
}

impl FeatureCacheBuilder {
    pub fn new(pipeline: FeaturePipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &FeaturePipeline {
        &self.pipeline
    }

    /// Extract features for `records`
    ///
    /// Class indices come from the sorted set of all record labels, so a
    /// class keeps its index even if every one of its files fails. Files
    /// that fail to load are logged and left out.
    pub fn build(&self, records: &[DatasetRecord]) -> Result<FeatureCache, DatasetError> {
        let classes = class_names(records.iter().map(|r| r.label.as_str()));
        let (n_mels, n_frames) = self.pipeline.output_shape();

        let mut features = Vec::with_capacity(records.len() * n_mels * n_frames);
        let mut labels = Vec::with_capacity(records.len());
        let mut failed = 0usize;

        for (i, record) in records.iter().enumerate() {
            match self.extract(record) {
                Ok(spectrogram) => {
                    features.extend_from_slice(&spectrogram.data);
                    // classes were built from these labels, so the lookup succeeds
                    let index = classes
                        .binary_search(&record.label)
                        .map_err(|_| DatasetError::invalid(format!("unknown label {}", record.label)))?;
                    labels.push(index as i64);
                }
                Err(reason) => {
                    failed += 1;
                    log::warn!(
                        "[FeatureCache] Skipping {}: {}",
                        record.path.display(),
                        reason
                    );
                }
            }
            if (i + 1) % PROGRESS_EVERY == 0 {
                log::info!("[FeatureCache] Processed {}/{} files", i + 1, records.len());
            }
        }

        let cache = FeatureCache::new(features, labels, classes, n_mels, n_frames)?;
        log::info!(
            "[FeatureCache] Built {} samples ({} skipped) across {} classes",
            cache.len(),
            failed,
            cache.classes.len()
        );
        for (name, count) in cache.classes.iter().zip(cache.class_counts()) {
            log::info!("[FeatureCache]   {}: {}", name, count);
        }
        Ok(cache)
    }

    fn extract(&self, record: &DatasetRecord) -> Result<Spectrogram, String> {
        let spectrogram = self
            .pipeline
            .spectrogram_from_path(&record.path)
            .map_err(|err| err.to_string())?;
        let expected = self.pipeline.output_shape();
        if spectrogram.shape() != expected {
            return Err(format!(
                "shape {:?} differs from {:?}",
                spectrogram.shape(),
                expected
            ));
        }
        Ok(spectrogram)
    }

    /// Build and persist in one step
    pub fn build_to_dir<P: AsRef<Path>>(
        &self,
        records: &[DatasetRecord],
        dir: P,
    ) -> Result<FeatureCache, DatasetError> {
        let cache = self.build(records)?;
        cache.save(dir)?;
        Ok(cache)
    }
}
