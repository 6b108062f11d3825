//! Synthetic fixtures for unit and integration tests.
//!
//! WAV clips are written with 16-bit PCM through hound, and feature caches are
//! generated with a seeded RNG so class patterns stay separable and
//! reproducible across runs.

use std::io::Cursor;
use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::cache::FeatureCache;
use crate::config::AppConfig;
use crate::model::{ModelArtifact, UrbanSoundCnn};

fn wav_spec(sample_rate: u32, channels: u16) -> hound::WavSpec {
    hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Encode interleaved samples as an in-memory 16-bit WAV file
pub fn wav_bytes(sample_rate: u32, channels: u16, interleaved: &[f32]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(sample_rate, channels))
            .expect("wav writer over memory buffer");
        for &sample in interleaved {
            writer.write_sample(to_i16(sample)).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}

/// Sine tone at 0.8 amplitude, duplicated across `channels`
pub fn sine_wav_bytes(sample_rate: u32, frequency: f32, frames: usize, channels: u16) -> Vec<u8> {
    let interleaved: Vec<f32> = (0..frames)
        .flat_map(|i| {
            let t = i as f32 / sample_rate as f32;
            let value = 0.8 * (2.0 * std::f32::consts::PI * frequency * t).sin();
            std::iter::repeat(value).take(channels as usize)
        })
        .collect();
    wav_bytes(sample_rate, channels, &interleaved)
}

/// Mono digital silence
pub fn silent_wav_bytes(sample_rate: u32, frames: usize) -> Vec<u8> {
    wav_bytes(sample_rate, 1, &vec![0.0; frames])
}

/// Mono 16-bit PCM in a WAVE_FORMAT_EXTENSIBLE container declaring
/// `valid_bits` valid bits per sample
pub fn extensible_wav_bytes(sample_rate: u32, valid_bits: u16, frames: usize) -> Vec<u8> {
    const PCM_SUBFORMAT: [u8; 16] = [
        0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B,
        0x71,
    ];
    let data_len = (frames * 2) as u32;

    let mut out = Vec::with_capacity(68 + frames * 2);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(60 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&40u32.to_le_bytes());
    out.extend_from_slice(&0xFFFEu16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(&22u16.to_le_bytes());
    out.extend_from_slice(&valid_bits.to_le_bytes());
    out.extend_from_slice(&4u32.to_le_bytes());
    out.extend_from_slice(&PCM_SUBFORMAT);
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames {
        out.extend_from_slice(&(((i % 64) as i16 - 32) * 500).to_le_bytes());
    }
    out
}

/// Write a mono 16-bit WAV file to disk
pub fn write_wav(path: &Path, sample_rate: u32, samples: &[f32]) -> Result<(), hound::Error> {
    let mut writer = hound::WavWriter::create(path, wav_spec(sample_rate, 1))?;
    for &sample in samples {
        writer.write_sample(to_i16(sample))?;
    }
    writer.finalize()
}

/// Write a short mono tone to `path`, creating parent directories
pub fn write_tone(path: &Path, sample_rate: u32, frequency: f32, frames: usize) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create fixture directory");
    }
    let samples: Vec<f32> = (0..frames)
        .map(|i| 0.5 * (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin())
        .collect();
    write_wav(path, sample_rate, &samples).expect("write fixture wav");
}

/// Build a feature cache where class `c` lights up its own horizontal band
///
/// `per_class[c]` samples are generated for class `c`, named `class_<c>`.
pub fn synthetic_cache(per_class: &[usize], n_mels: usize, n_frames: usize, seed: u64) -> FeatureCache {
    let mut rng = StdRng::seed_from_u64(seed);
    let n_classes = per_class.len().max(1);
    let band = (n_mels / n_classes).max(1);

    let mut features = Vec::new();
    let mut labels = Vec::new();
    for (class, &count) in per_class.iter().enumerate() {
        for _ in 0..count {
            for mel in 0..n_mels {
                let lit = mel / band == class;
                for _ in 0..n_frames {
                    let noise: f32 = rng.gen_range(0.0..0.2);
                    features.push(if lit { 0.8 + noise } else { noise });
                }
            }
            labels.push(class as i64);
        }
    }

    let classes = (0..per_class.len()).map(|c| format!("class_{c}")).collect();
    FeatureCache::new(features, labels, classes, n_mels, n_frames)
        .expect("synthetic cache is consistent")
}

/// Configuration sized for fast tests: 0.5 s clips at 8 kHz give (24, 32)
/// spectrograms, with every service path under `dir`.
pub fn small_config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.audio.sample_rate = 8_000;
    config.audio.duration_secs = 0.5;
    config.spectrogram.n_mels = 24;
    config.spectrogram.n_fft = 256;
    config.spectrogram.hop_length = 128;
    config.training.epochs = 2;
    config.training.retrain_epochs = 1;
    config.training.batch_size = 4;
    config.service.model_path = dir.join("models").join("us8k_cnn.safetensors");
    config.service.classes_path = dir.join("models").join("classes.json");
    config.service.feature_cache_dir = dir.join("processed");
    config
}

/// Persist a freshly initialized network for `classes`
pub fn write_untrained_artifact(artifact: &ModelArtifact, classes: &[&str]) {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    UrbanSoundCnn::new(classes.len(), vb).expect("build network");
    let classes: Vec<String> = classes.iter().map(|c| c.to_string()).collect();
    artifact.save(&varmap, &classes).expect("save artifact");
}
