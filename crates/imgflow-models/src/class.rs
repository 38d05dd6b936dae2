//! Retry-ability classes shared by every error type in the workspace.

use serde::{Deserialize, Serialize};

/// How a failure should be treated once it reaches an acknowledgment decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Short-lived trouble (timeouts, resets). Eligible for requeue.
    Transient,
    /// Infrastructure failure that retrying this message cannot fix.
    Fatal,
    /// Anything else. Discarded without requeue.
    Permanent,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Fatal => "fatal",
            ErrorClass::Permanent => "permanent",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorClass::Fatal)
    }
}

/// ENOSPC on Linux and macOS.
const NO_SPACE_LEFT: i32 = 28;

/// Class of a local I/O failure.
///
/// Disk and memory exhaustion are host problems, not message problems.
pub fn classify_io(err: &std::io::Error) -> ErrorClass {
    use std::io::ErrorKind;

    if err.raw_os_error() == Some(NO_SPACE_LEFT) {
        return ErrorClass::Fatal;
    }
    match err.kind() {
        ErrorKind::OutOfMemory => ErrorClass::Fatal,
        ErrorKind::TimedOut | ErrorKind::ConnectionReset | ErrorKind::Interrupted => {
            ErrorClass::Transient
        }
        _ => ErrorClass::Permanent,
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
