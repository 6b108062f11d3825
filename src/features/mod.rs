// SpectrogramExtractor - log-mel feature extraction shared by training and serving
//
// Module organization:
// - types: Spectrogram data structure
// - stft: centered, Hann-windowed power STFT
// - mel: Slaney mel filterbank
// - mod.rs: SpectrogramExtractor (power -> mel -> dB -> [0, 1]) and
//   FeaturePipeline (AudioLoader + SpectrogramExtractor)
//
// Both the feature cache builder and the prediction service go through
// FeaturePipeline, so cached training features and request features are
// computed by exactly the same code.

mod mel;
mod stft;
mod types;

pub use mel::{hz_to_mel, mel_to_hz, MelFilterbank};
pub use stft::StftProcessor;
pub use types::Spectrogram;

use std::path::Path;

use crate::audio::{AudioLoader, Waveform};
use crate::config::{AppConfig, SpectrogramConfig};
use crate::error::AudioError;

/// Floor applied to power values before taking the logarithm
const AMIN: f32 = 1e-10;
/// Added to the normalization range so constant input maps to zeros
const NORM_EPSILON: f32 = 1e-6;

/// SpectrogramExtractor converts waveforms into normalized log-mel spectrograms
pub struct SpectrogramExtractor {
    stft: StftProcessor,
    filterbank: MelFilterbank,
    n_mels: usize,
    top_db: Option<f32>,
}

impl SpectrogramExtractor {
    /// Create an extractor
    ///
    /// # Arguments
    /// * `sample_rate` - Sample rate of the incoming waveforms in Hz
    /// * `n_mels` - Number of mel bands
    /// * `n_fft` - FFT window size
    /// * `hop_length` - Hop between frames
    pub fn new(sample_rate: u32, n_mels: usize, n_fft: usize, hop_length: usize) -> Self {
        Self {
            stft: StftProcessor::new(n_fft, hop_length),
            filterbank: MelFilterbank::new(sample_rate, n_fft, n_mels),
            n_mels,
            top_db: None,
        }
    }

    /// Clamp the dB range to `top_db` below the peak before normalizing
    pub fn with_top_db(mut self, top_db: f32) -> Self {
        if top_db > 0.0 {
            self.top_db = Some(top_db);
        }
        self
    }

    pub fn from_config(sample_rate: u32, config: &SpectrogramConfig) -> Self {
        Self::new(sample_rate, config.n_mels, config.n_fft, config.hop_length)
            .with_top_db(config.top_db)
    }

    /// Output shape for a waveform of `len` samples
    pub fn output_shape(&self, len: usize) -> (usize, usize) {
        (self.n_mels, self.stft.frame_count(len))
    }

    /// Extract a normalized log-mel spectrogram
    ///
    /// 1. Power STFT
    /// 2. Mel projection
    /// 3. `10 * log10(S / max(S))` with an `AMIN` floor (and optional top_db floor)
    /// 4. Min-max rescale to `[0, 1]` using this spectrogram's own range
    pub fn extract(&self, samples: &[f32]) -> Spectrogram {
        let power = self.stft.power_spectrogram(samples);
        let n_frames = power.len();

        // Transpose frames x mels into mels x frames
        let mut mel = vec![0.0f32; self.n_mels * n_frames];
        for (t, frame) in power.iter().enumerate() {
            for (m, energy) in self.filterbank.apply(frame).into_iter().enumerate() {
                mel[m * n_frames + t] = energy;
            }
        }

        let db = self.power_to_db(&mel);
        Spectrogram {
            n_mels: self.n_mels,
            n_frames,
            data: normalize_unit_range(db),
        }
    }

    fn power_to_db(&self, mel: &[f32]) -> Vec<f32> {
        let reference = mel.iter().copied().fold(0.0f32, f32::max).max(AMIN);
        let reference_db = 10.0 * reference.log10();

        let mut db: Vec<f32> = mel
            .iter()
            .map(|&p| 10.0 * p.max(AMIN).log10() - reference_db)
            .collect();

        if let Some(top_db) = self.top_db {
            let peak = db.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let floor = peak - top_db;
            db.iter_mut().for_each(|v| *v = v.max(floor));
        }
        db
    }
}

/// Rescale values to `[0, 1]` with `(x - min) / (max - min + eps)`
pub fn normalize_unit_range(mut values: Vec<f32>) -> Vec<f32> {
    if values.is_empty() {
        return values;
    }
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min + NORM_EPSILON;
    values
        .iter_mut()
        .for_each(|v| *v = ((*v - min) / range).clamp(0.0, 1.0));
    values
}

/// FeaturePipeline couples the audio loader and the spectrogram extractor
///
/// This is the only path from encoded audio to model input.
pub struct FeaturePipeline {
    loader: AudioLoader,
    extractor: SpectrogramExtractor,
}

impl FeaturePipeline {
    pub fn new(loader: AudioLoader, extractor: SpectrogramExtractor) -> Self {
        Self { loader, extractor }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            AudioLoader::from_config(&config.audio),
            SpectrogramExtractor::from_config(config.audio.sample_rate, &config.spectrogram),
        )
    }

    /// Shape `(n_mels, n_frames)` of every spectrogram this pipeline emits
    pub fn output_shape(&self) -> (usize, usize) {
        self.extractor.output_shape(self.loader.target_length())
    }

    pub fn loader(&self) -> &AudioLoader {
        &self.loader
    }

    pub fn extract_waveform(&self, waveform: &Waveform) -> Spectrogram {
        self.extractor.extract(&waveform.samples)
    }

    pub fn spectrogram_from_path<P: AsRef<Path>>(&self, path: P) -> Result<Spectrogram, AudioError> {
        let waveform = self.loader.load_file(path)?;
        Ok(self.extract_waveform(&waveform))
    }

    pub fn spectrogram_from_bytes(&self, bytes: &[u8]) -> Result<Spectrogram, AudioError> {
        let waveform = self.loader.load_bytes(bytes)?;
        Ok(self.extract_waveform(&waveform))
    }
}
