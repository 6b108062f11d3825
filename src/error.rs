// Error types for the urban sound classification pipeline
//
// Each subsystem owns one error enum with its own numeric code range, so the
// HTTP layer and the CLI can report failures consistently.

use log::error;
use std::fmt;
use std::path::{Path, PathBuf};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the HTTP boundary and the command-line tools.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

/// Log a model error with structured context
pub fn log_model_error(err: &ModelError, context: &str) {
    error!(
        "Model error in {}: code={}, component=Model, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Log a service error with structured context
pub fn log_service_error(err: &ServiceError, context: &str) {
    error!(
        "Service error in {}: code={}, component=Service, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio decoding errors
///
/// Error code range: 1001-1004
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Input is not a supported audio encoding or is corrupt
    Decode { reason: String },

    /// Source file does not exist
    NotFound { path: PathBuf },

    /// Sample-rate conversion failed
    Resample { reason: String },

    /// Reading the source failed
    Io { details: String },
}

impl AudioError {
    pub fn decode(reason: impl Into<String>) -> Self {
        AudioError::Decode {
            reason: reason.into(),
        }
    }
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::Decode { .. } => 1001,
            AudioError::NotFound { .. } => 1002,
            AudioError::Resample { .. } => 1003,
            AudioError::Io { .. } => 1004,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::Decode { reason } => format!("Failed to decode audio: {}", reason),
            AudioError::NotFound { path } => {
                format!("Audio file not found: {}", path.display())
            }
            AudioError::Resample { reason } => format!("Resampling failed: {}", reason),
            AudioError::Io { details } => format!("Audio I/O error: {}", details),
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AudioError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::Io {
            details: err.to_string(),
        }
    }
}

/// Dataset organization and feature cache errors
///
/// Error code range: 2001-2005
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetError {
    /// Root directory, metadata table or cache file is absent
    NotFound { path: PathBuf },

    /// Arrays are empty or misaligned
    InvalidDataset { reason: String },

    /// A table or array file could not be parsed
    Format { reason: String },

    /// Filesystem failure
    Io { details: String },

    /// Archive download failed
    Download { reason: String },
}

impl DatasetError {
    pub fn not_found(path: &Path) -> Self {
        DatasetError::NotFound {
            path: path.to_path_buf(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        DatasetError::InvalidDataset {
            reason: reason.into(),
        }
    }

    pub fn format(reason: impl Into<String>) -> Self {
        DatasetError::Format {
            reason: reason.into(),
        }
    }
}

impl ErrorCode for DatasetError {
    fn code(&self) -> i32 {
        match self {
            DatasetError::NotFound { .. } => 2001,
            DatasetError::InvalidDataset { .. } => 2002,
            DatasetError::Format { .. } => 2003,
            DatasetError::Io { .. } => 2004,
            DatasetError::Download { .. } => 2005,
        }
    }

    fn message(&self) -> String {
        match self {
            DatasetError::NotFound { path } => format!("Not found: {}", path.display()),
            DatasetError::InvalidDataset { reason } => format!("Invalid dataset: {}", reason),
            DatasetError::Format { reason } => format!("Malformed data: {}", reason),
            DatasetError::Io { details } => format!("Dataset I/O error: {}", details),
            DatasetError::Download { reason } => format!("Download failed: {}", reason),
        }
    }
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for DatasetError {}

impl From<std::io::Error> for DatasetError {
    fn from(err: std::io::Error) -> Self {
        DatasetError::Io {
            details: err.to_string(),
        }
    }
}

/// Training, persistence and inference errors
///
/// Error code range: 3001-3005
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Model weights or class mapping file is absent
    NotFound { path: PathBuf },

    /// Training data is empty, misaligned or too small for the network
    InvalidDataset { reason: String },

    /// Input does not match the shape the model expects
    ShapeMismatch { expected: String, actual: String },

    /// Tensor backend failure
    Backend { details: String },

    /// Filesystem failure
    Io { details: String },
}

impl ModelError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        ModelError::InvalidDataset {
            reason: reason.into(),
        }
    }
}

impl ErrorCode for ModelError {
    fn code(&self) -> i32 {
        match self {
            ModelError::NotFound { .. } => 3001,
            ModelError::InvalidDataset { .. } => 3002,
            ModelError::ShapeMismatch { .. } => 3003,
            ModelError::Backend { .. } => 3004,
            ModelError::Io { .. } => 3005,
        }
    }

    fn message(&self) -> String {
        match self {
            ModelError::NotFound { path } => {
                format!("Required file not found: {}", path.display())
            }
            ModelError::InvalidDataset { reason } => format!("Invalid dataset: {}", reason),
            ModelError::ShapeMismatch { expected, actual } => {
                format!("Shape mismatch: expected {}, got {}", expected, actual)
            }
            ModelError::Backend { details } => format!("Tensor backend error: {}", details),
            ModelError::Io { details } => format!("Model I/O error: {}", details),
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for ModelError {}

impl From<candle_core::Error> for ModelError {
    fn from(err: candle_core::Error) -> Self {
        ModelError::Backend {
            details: err.to_string(),
        }
    }
}

impl From<std::io::Error> for ModelError {
    fn from(err: std::io::Error) -> Self {
        ModelError::Io {
            details: err.to_string(),
        }
    }
}

impl From<DatasetError> for ModelError {
    fn from(err: DatasetError) -> Self {
        match err {
            DatasetError::NotFound { path } => ModelError::NotFound { path },
            DatasetError::InvalidDataset { reason } | DatasetError::Format { reason } => {
                ModelError::InvalidDataset { reason }
            }
            DatasetError::Io { details } => ModelError::Io { details },
            DatasetError::Download { reason } => ModelError::Io { details: reason },
        }
    }
}

/// Prediction service errors, converted to JSON bodies at the HTTP boundary
///
/// Error code range: 4001-4006
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// No model artifact has been loaded
    NotLoaded,

    /// Request was malformed or its audio could not be decoded
    BadRequest { reason: String },

    /// Inference failed after decoding
    Prediction { reason: String },

    /// Shared model state lock was poisoned
    LockPoisoned { component: String },

    /// Model artifact could not be loaded; the previous state is kept
    LoadFailed { reason: String },

    /// Background retraining did not produce a usable model
    RetrainFailed { reason: String },
}

impl ErrorCode for ServiceError {
    fn code(&self) -> i32 {
        match self {
            ServiceError::NotLoaded => 4001,
            ServiceError::BadRequest { .. } => 4002,
            ServiceError::Prediction { .. } => 4003,
            ServiceError::LockPoisoned { .. } => 4004,
            ServiceError::LoadFailed { .. } => 4005,
            ServiceError::RetrainFailed { .. } => 4006,
        }
    }

    fn message(&self) -> String {
        match self {
            ServiceError::NotLoaded => "Model not loaded".to_string(),
            ServiceError::BadRequest { reason } => reason.clone(),
            ServiceError::Prediction { reason } => format!("Prediction failed: {}", reason),
            ServiceError::LockPoisoned { component } => {
                format!("Lock poisoned for component: {}", component)
            }
            ServiceError::LoadFailed { reason } => format!("Model load failed: {}", reason),
            ServiceError::RetrainFailed { reason } => format!("Retraining failed: {}", reason),
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for ServiceError {}

impl From<AudioError> for ServiceError {
    fn from(err: AudioError) -> Self {
        ServiceError::BadRequest {
            reason: err.message(),
        }
    }
}

impl From<ModelError> for ServiceError {
    fn from(err: ModelError) -> Self {
        ServiceError::Prediction {
            reason: err.message(),
        }
    }
}
