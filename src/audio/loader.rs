// Loader - decodes audio files or uploads into fixed-length mono waveforms
//
// Strategy:
// - PCM WAV is read with hound (fast path, no probing)
// - Anything hound rejects goes through symphonia (compressed formats and
//   WAV variants such as extensible headers)
// - Channels are averaged to mono, the clip is resampled to the target rate,
//   then zero-padded or truncated to exactly `sample_rate * duration` samples

use std::fs;
use std::io::Cursor;
use std::path::Path;

use crate::config::AudioConfig;
use crate::error::AudioError;

use super::resampler::Resampler;

/// Fixed-length mono waveform at a known sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Decoded clip before resampling and length fixing
struct DecodedAudio {
    mono: Vec<f32>,
    sample_rate: u32,
}

/// Audio loader producing waveforms of a fixed rate and length
#[derive(Debug, Clone)]
pub struct AudioLoader {
    sample_rate: u32,
    target_length: usize,
}

impl AudioLoader {
    /// Create a loader for the given target sample rate and clip duration
    pub fn new(sample_rate: u32, duration_secs: f32) -> Self {
        Self {
            sample_rate,
            target_length: (sample_rate as f64 * duration_secs as f64) as usize,
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(config.sample_rate, config.duration_secs)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples in every waveform this loader produces
    pub fn target_length(&self) -> usize {
        self.target_length
    }

    /// Load an audio file from disk
    ///
    /// # Errors
    /// * `AudioError::NotFound` - the path does not exist
    /// * `AudioError::Decode` - the file is not a supported audio encoding
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<Waveform, AudioError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AudioError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let bytes = fs::read(path)?;
        let hint = path.extension().and_then(|ext| ext.to_str());
        self.load_encoded(bytes, hint).map_err(|err| match err {
            AudioError::Decode { reason } => {
                AudioError::decode(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })
    }

    /// Load an in-memory encoded audio buffer (e.g. an HTTP upload)
    pub fn load_bytes(&self, bytes: &[u8]) -> Result<Waveform, AudioError> {
        self.load_encoded(bytes.to_vec(), None)
    }

    fn load_encoded(&self, bytes: Vec<u8>, hint: Option<&str>) -> Result<Waveform, AudioError> {
        if bytes.is_empty() {
            return Err(AudioError::decode("empty input"));
        }

        let decoded = match decode_wav(&bytes) {
            Ok(decoded) => decoded,
            Err(wav_err) => {
                log::debug!(
                    "[AudioLoader] hound rejected input ({}), trying symphonia",
                    wav_err
                );
                decode_with_symphonia(bytes, hint)?
            }
        };

        let resampled = Resampler::resample(&decoded.mono, decoded.sample_rate, self.sample_rate)?;
        Ok(Waveform {
            samples: fix_length(resampled, self.target_length),
            sample_rate: self.sample_rate,
        })
    }
}

/// Zero-pad at the end or truncate to exactly `target_length` samples
pub fn fix_length(mut samples: Vec<f32>, target_length: usize) -> Vec<f32> {
    samples.resize(target_length, 0.0);
    samples
}

/// Average interleaved frames down to one channel
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Largest positive value of a signed integer sample, `bits` in 8..=32
fn full_scale(bits: u16) -> f32 {
    ((1i64 << (bits - 1)) - 1) as f32
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, hound::Error> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let interleaved = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<f32>, _>>()?,
        hound::SampleFormat::Int => match spec.bits_per_sample {
            8 => {
                let max = full_scale(8);
                reader
                    .samples::<i8>()
                    .map(|sample| sample.map(|value| value as f32 / max))
                    .collect::<Result<Vec<f32>, _>>()?
            }
            16 => {
                let max = full_scale(16);
                reader
                    .samples::<i16>()
                    .map(|sample| sample.map(|value| value as f32 / max))
                    .collect::<Result<Vec<f32>, _>>()?
            }
            bits @ (24 | 32) => {
                let max = full_scale(bits);
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 / max))
                    .collect::<Result<Vec<f32>, _>>()?
            }
            // extensible headers may carry any valid-bits value
            _ => return Err(hound::Error::Unsupported),
        },
    };

    Ok(DecodedAudio {
        mono: downmix(&interleaved, spec.channels as usize),
        sample_rate: spec.sample_rate,
    })
}

fn decode_with_symphonia(bytes: Vec<u8>, hint: Option<&str>) -> Result<DecodedAudio, AudioError> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let mut probe_hint = Hint::new();
    if let Some(ext) = hint {
        probe_hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &probe_hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| AudioError::decode(format!("unrecognized format ({})", err)))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| AudioError::decode("no supported audio tracks"))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AudioError::decode("unknown sample rate"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|err| AudioError::decode(format!("decoder init failed ({})", err)))?;

    let mut mono: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(err) => return Err(AudioError::decode(format!("read error ({})", err))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                mono.extend(downmix(buffer.samples(), spec.channels.count()));
            }
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(err) => return Err(AudioError::decode(format!("decode error ({})", err))),
        }
    }

    if mono.is_empty() {
        return Err(AudioError::decode("decoded zero samples"));
    }

    log::debug!(
        "[AudioLoader] symphonia decoded {} mono samples at {} Hz",
        mono.len(),
        sample_rate
    );

    Ok(DecodedAudio { mono, sample_rate })
}
