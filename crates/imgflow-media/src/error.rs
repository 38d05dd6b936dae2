//! Error types for image operations.

use imgflow_models::ErrorClass;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while transforming an image.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Unsupported original format for re-encoding: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to encode {format} image: {message}")]
    Encode { format: String, message: String },
}

impl MediaError {
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn encode(format: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encode {
            format: format.into(),
            message: message.into(),
        }
    }

    /// Transforms are deterministic over their input.
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Permanent
    }
}
