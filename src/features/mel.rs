// Mel module - Slaney-style mel filterbank
//
// Filters are triangular on the Slaney mel scale (linear below 1 kHz,
// logarithmic above) and area-normalized, matching the usual librosa
// defaults so cached features line up with common reference tooling.

const F_SP: f32 = 200.0 / 3.0;
const MIN_LOG_HZ: f32 = 1_000.0;
const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;

fn log_step() -> f32 {
    6.4f32.ln() / 27.0
}

/// Hz to mel (Slaney scale)
pub fn hz_to_mel(hz: f32) -> f32 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

/// Mel to Hz (Slaney scale)
pub fn mel_to_hz(mel: f32) -> f32 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        mel * F_SP
    }
}

/// Mel filterbank mapping power spectra to mel band energies
pub struct MelFilterbank {
    /// `n_mels` rows of `n_fft / 2 + 1` weights
    filters: Vec<Vec<f32>>,
}

impl MelFilterbank {
    /// Build the filterbank covering 0 Hz to Nyquist
    pub fn new(sample_rate: u32, n_fft: usize, n_mels: usize) -> Self {
        let n_bins = n_fft / 2 + 1;
        let fmax = sample_rate as f32 / 2.0;
        let fft_freqs: Vec<f32> = (0..n_bins)
            .map(|k| k as f32 * sample_rate as f32 / n_fft as f32)
            .collect();

        let mel_max = hz_to_mel(fmax);
        let mel_points: Vec<f32> = (0..n_mels + 2)
            .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
            .collect();

        let filters = (0..n_mels)
            .map(|m| {
                let left = mel_points[m];
                let center = mel_points[m + 1];
                let right = mel_points[m + 2];
                let enorm = 2.0 / (right - left);

                fft_freqs
                    .iter()
                    .map(|&freq| {
                        let lower = (freq - left) / (center - left);
                        let upper = (right - freq) / (right - center);
                        lower.min(upper).max(0.0) * enorm
                    })
                    .collect()
            })
            .collect();

        Self { filters }
    }

    pub fn n_mels(&self) -> usize {
        self.filters.len()
    }

    /// Project one power spectrum frame onto the mel bands
    pub fn apply(&self, power: &[f32]) -> Vec<f32> {
        self.filters
            .iter()
            .map(|filter| filter.iter().zip(power).map(|(w, p)| w * p).sum())
            .collect()
    }
}
