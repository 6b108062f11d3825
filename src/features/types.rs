// Types module - Data structures for spectrogram features

use serde::{Deserialize, Serialize};

/// Normalized log-mel spectrogram
///
/// Values are stored row-major as `(n_mels, n_frames)`: row `m` holds the
/// energy of mel band `m` across time. After extraction every value lies in
/// `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrogram {
    pub n_mels: usize,
    pub n_frames: usize,
    pub data: Vec<f32>,
}

impl Spectrogram {
    /// Shape as `(n_mels, n_frames)`
    pub fn shape(&self) -> (usize, usize) {
        (self.n_mels, self.n_frames)
    }

    /// Value at mel band `mel`, frame `frame`
    pub fn get(&self, mel: usize, frame: usize) -> Option<f32> {
        if mel < self.n_mels && frame < self.n_frames {
            self.data.get(mel * self.n_frames + frame).copied()
        } else {
            None
        }
    }

    pub fn min(&self) -> f32 {
        self.data.iter().copied().fold(f32::INFINITY, f32::min)
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }
}
