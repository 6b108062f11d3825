//! Configuration management for the classification pipeline
//!
//! This module provides runtime configuration loading from JSON files, with
//! environment overrides for the paths the prediction service reads. The same
//! audio and spectrogram parameters feed both feature caching and serving, so
//! a single `AppConfig` keeps the two paths in parity.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "US8K_CONFIG";
/// Environment override for the model weights path
pub const MODEL_PATH_ENV: &str = "MODEL_PATH";
/// Environment override for the class-mapping path
pub const CLASSES_PATH_ENV: &str = "CLASSES_PATH";
/// Environment override for the feature cache directory used by retraining
pub const FEATURE_CACHE_DIR_ENV: &str = "FEATURE_CACHE_DIR";
/// Environment override for the HTTP bind address
pub const BIND_ADDR_ENV: &str = "US8K_BIND_ADDR";

const DEFAULT_CONFIG_PATH: &str = "config/us8k.json";

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub spectrogram: SpectrogramConfig,
    pub training: TrainingConfig,
    pub service: ServiceConfig,
}

/// Audio loading parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Target sample rate in Hz every clip is resampled to
    pub sample_rate: u32,
    /// Fixed clip duration in seconds (shorter clips are zero-padded)
    pub duration_secs: f32,
}

impl AudioConfig {
    /// Number of samples in every loaded waveform
    pub fn target_length(&self) -> usize {
        (self.sample_rate as f64 * self.duration_secs as f64) as usize
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22_050,
            duration_secs: 4.0,
        }
    }
}

/// Log-mel spectrogram parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramConfig {
    /// Number of mel bands (rows of the spectrogram)
    pub n_mels: usize,
    /// FFT window size in samples
    pub n_fft: usize,
    /// Hop between successive frames in samples
    pub hop_length: usize,
    /// Dynamic range kept below the loudest bin, in dB
    pub top_db: f32,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            n_mels: 128,
            n_fft: 2048,
            hop_length: 512,
            top_db: 80.0,
        }
    }
}

/// CNN training parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Fraction of each class held out for validation
    pub validation_ratio: f32,
    /// Seed for the stratified split and per-epoch shuffling
    pub seed: u64,
    pub learning_rate: f64,
    /// Epoch count used by service-triggered retraining
    pub retrain_epochs: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            validation_ratio: 0.2,
            seed: 42,
            learning_rate: 1e-3,
            retrain_epochs: 3,
        }
    }
}

/// Prediction service parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub model_path: PathBuf,
    pub classes_path: PathBuf,
    /// Feature cache read by `/retrain`
    pub feature_cache_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            model_path: PathBuf::from("models/us8k_cnn.safetensors"),
            classes_path: PathBuf::from("models/classes.json"),
            feature_cache_dir: PathBuf::from("data/processed"),
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or defaults if the file is missing or the
    /// JSON is invalid. Missing keys fall back to their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from `$US8K_CONFIG` (or `config/us8k.json`) and
    /// apply environment overrides.
    pub fn load() -> Self {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut config = Self::load_from_file(path);
        config.apply_env_overrides();
        config
    }

    /// Apply `MODEL_PATH`, `CLASSES_PATH`, `FEATURE_CACHE_DIR` and
    /// `US8K_BIND_ADDR` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(path) = non_empty(MODEL_PATH_ENV) {
            self.service.model_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty(CLASSES_PATH_ENV) {
            self.service.classes_path = PathBuf::from(path);
        }
        if let Some(dir) = non_empty(FEATURE_CACHE_DIR_ENV) {
            self.service.feature_cache_dir = PathBuf::from(dir);
        }
        if let Some(addr) = non_empty(BIND_ADDR_ENV) {
            self.service.bind_addr = addr;
        }
    }

    /// Reject parameter combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.audio.sample_rate == 0 {
            return Err("audio.sample_rate must be greater than 0".into());
        }
        if !(self.audio.duration_secs > 0.0) {
            return Err("audio.duration_secs must be greater than 0".into());
        }
        let spec = &self.spectrogram;
        if spec.n_mels == 0 || spec.n_fft == 0 || spec.hop_length == 0 {
            return Err("spectrogram n_mels, n_fft and hop_length must be non-zero".into());
        }
        if spec.hop_length > spec.n_fft {
            return Err(format!(
                "spectrogram.hop_length ({}) must not exceed n_fft ({})",
                spec.hop_length, spec.n_fft
            ));
        }
        let training = &self.training;
        if training.epochs == 0 || training.retrain_epochs == 0 || training.batch_size == 0 {
            return Err("training epochs, retrain_epochs and batch_size must be non-zero".into());
        }
        if !(training.validation_ratio > 0.0 && training.validation_ratio < 1.0) {
            return Err(format!(
                "training.validation_ratio must be in (0, 1), got {}",
                training.validation_ratio
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.audio.sample_rate, 22_050);
        assert_eq!(config.audio.target_length(), 88_200);
        assert_eq!(config.spectrogram.n_mels, 128);
        assert_eq!(config.training.seed, 42);
        assert_eq!(
            config.service.model_path,
            PathBuf::from("models/us8k_cnn.safetensors")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{ "spectrogram": { "n_mels": 64 } }"#).unwrap();
        assert_eq!(parsed.spectrogram.n_mels, 64);
        assert_eq!(parsed.spectrogram.n_fft, 2048);
        assert_eq!(parsed.training.batch_size, 32);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from_file("/nonexistent/us8k.json");
        assert_eq!(config.audio.sample_rate, 22_050);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (MODEL_PATH_ENV, "/srv/model.safetensors"),
            (CLASSES_PATH_ENV, "/srv/classes.json"),
            (BIND_ADDR_ENV, "   "),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(
            config.service.model_path,
            PathBuf::from("/srv/model.safetensors")
        );
        assert_eq!(config.service.classes_path, PathBuf::from("/srv/classes.json"));
        // blank values are ignored
        assert_eq!(config.service.bind_addr, "0.0.0.0:8000");
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let mut config = AppConfig::default();
        config.training.validation_ratio = 1.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.spectrogram.hop_length = 4096;
        assert!(config.validate().is_err());
    }
}
