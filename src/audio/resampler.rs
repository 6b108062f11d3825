//! Audio resampling using rubato

use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::error::AudioError;

/// Offline mono resampler
pub struct Resampler;

impl Resampler {
    /// Resample a whole mono clip from one sample rate to another.
    ///
    /// The sinc filter delay is trimmed, so the output starts aligned with the
    /// input and holds `ceil(len * to_sr / from_sr)` samples.
    pub fn resample(samples: &[f32], from_sr: u32, to_sr: u32) -> Result<Vec<f32>, AudioError> {
        if from_sr == to_sr || samples.is_empty() {
            return Ok(samples.to_vec());
        }
        if from_sr == 0 || to_sr == 0 {
            return Err(AudioError::Resample {
                reason: format!("invalid sample rates {} -> {}", from_sr, to_sr),
            });
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let ratio = to_sr as f64 / from_sr as f64;
        let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, samples.len(), 1)
            .map_err(|err| AudioError::Resample {
                reason: err.to_string(),
            })?;

        let delay = resampler.output_delay();
        let expected = (samples.len() as f64 * ratio).ceil() as usize;

        let input = vec![samples.to_vec()];
        let mut output = resampler
            .process(&input, None)
            .map_err(|err| AudioError::Resample {
                reason: err.to_string(),
            })?
            .into_iter()
            .next()
            .unwrap_or_default();

        // Flush the filter tail so the delay trim does not eat real samples.
        let tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|err| AudioError::Resample {
                reason: err.to_string(),
            })?;
        if let Some(channel) = tail.into_iter().next() {
            output.extend(channel);
        }

        let mut aligned: Vec<f32> = output.into_iter().skip(delay).collect();
        aligned.resize(expected, 0.0);
        Ok(aligned)
    }
}
