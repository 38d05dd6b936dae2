//! Model error types.

use thiserror::Error;

use crate::class::ErrorClass;

pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while decoding inbound messages and transformation parameters.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unsupported transformation type: {0}")]
    UnknownTransformation(String),

    #[error("Invalid {kind} parameters: {reason}")]
    InvalidParameters { kind: String, reason: String },

    #[error("Unsupported angle: {0}. Only 0, 90, 180, 270 supported")]
    UnsupportedRotation(i64),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl ModelError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }

    pub fn invalid_parameters(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameters {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Decoding failures are deterministic; retrying the same bytes cannot help.
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Permanent
    }
}
