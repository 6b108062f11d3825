// Audio module - decoding, mono mixing, resampling and length fixing

pub mod loader;
pub mod resampler;

// Re-export commonly used types for convenience
pub use loader::{fix_length, AudioLoader, Waveform};
pub use resampler::Resampler;
