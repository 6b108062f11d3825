// STFT module - framed Fast Fourier Transform computation
//
// Frames are centered: the waveform is zero-padded by `fft_size / 2` on both
// ends, so frame `t` is centered on sample `t * hop_length`. Each frame is
// multiplied by a periodic Hann window before the FFT, and only the
// non-negative frequency bins are kept.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// STFT processor that computes power spectra from a waveform
pub struct StftProcessor {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    hop_length: usize,
    /// Periodic Hann window (pre-computed)
    window: Vec<f32>,
}

impl StftProcessor {
    /// Create a new STFT processor
    ///
    /// # Arguments
    /// * `fft_size` - FFT window size in samples
    /// * `hop_length` - Distance between frame centers in samples
    pub fn new(fft_size: usize, hop_length: usize) -> Self {
        let window = (0..fft_size)
            .map(|i| {
                0.5 * (1.0 - ((2.0 * std::f32::consts::PI * i as f32) / fft_size as f32).cos())
            })
            .collect();

        let fft = FftPlanner::new().plan_fft_forward(fft_size);

        Self {
            fft,
            fft_size,
            hop_length,
            window,
        }
    }

    /// Number of frequency bins per frame
    pub fn n_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Number of frames produced for a waveform of `len` samples
    pub fn frame_count(&self, len: usize) -> usize {
        1 + len / self.hop_length
    }

    /// Compute the power spectrogram
    ///
    /// # Returns
    /// One `|X|^2` vector of `n_bins()` values per frame
    pub fn power_spectrogram(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let pad = self.fft_size / 2;
        let frames = self.frame_count(samples.len());
        let mut buffer: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); self.fft_size];

        (0..frames)
            .map(|frame| {
                // Position of the frame start in padded coordinates
                let start = frame * self.hop_length;
                for (j, slot) in buffer.iter_mut().enumerate() {
                    let padded_idx = start + j;
                    let sample = padded_idx
                        .checked_sub(pad)
                        .and_then(|idx| samples.get(idx))
                        .copied()
                        .unwrap_or(0.0);
                    *slot = Complex::new(sample * self.window[j], 0.0);
                }

                self.fft.process(&mut buffer);

                buffer[..self.n_bins()]
                    .iter()
                    .map(|c| c.norm_sqr())
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_count_matches_centered_framing() {
        let stft = StftProcessor::new(2048, 512);
        assert_eq!(stft.frame_count(88_200), 173);
        assert_eq!(stft.n_bins(), 1025);
    }

    #[test]
    fn test_sine_peak_lands_in_expected_bin() {
        let sample_rate = 8_000.0;
        let stft = StftProcessor::new(256, 128);
        // 1000 Hz at 8 kHz with 256-point FFT -> bin 32
        let samples: Vec<f32> = (0..2_048)
            .map(|i| (2.0 * std::f32::consts::PI * 1_000.0 * i as f32 / sample_rate).sin())
            .collect();

        let spec = stft.power_spectrogram(&samples);
        let middle = &spec[spec.len() / 2];
        let (peak_bin, _) = middle
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        assert_eq!(peak_bin, 32);
    }

    #[test]
    fn test_silence_has_zero_power() {
        let stft = StftProcessor::new(64, 16);
        let spec = stft.power_spectrogram(&[0.0; 256]);
        assert_eq!(spec.len(), 17);
        assert!(spec.iter().flatten().all(|&p| p == 0.0));
    }
}
