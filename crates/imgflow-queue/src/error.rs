//! Queue error types.

use std::io;
use std::time::Duration;

use imgflow_models::ErrorClass;
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid broker configuration: {0}")]
    Config(String),

    #[error("Status publisher not ready: {0}")]
    NotReady(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Publish timed out after {0:?}")]
    PublishTimeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

impl QueueError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn channel_closed(msg: impl Into<String>) -> Self {
        Self::ChannelClosed(msg.into())
    }

    /// Retry-ability of this failure.
    pub fn class(&self) -> ErrorClass {
        match self {
            QueueError::NotReady(_) | QueueError::PublishTimeout(_) => ErrorClass::Transient,
            QueueError::ChannelClosed(_) => ErrorClass::Fatal,
            QueueError::Config(_) | QueueError::Serialization(_) => ErrorClass::Permanent,
            QueueError::Amqp(e) => classify_amqp(e),
        }
    }
}

fn classify_amqp(err: &lapin::Error) -> ErrorClass {
    match err {
        lapin::Error::IOError(e) => match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted => {
                ErrorClass::Transient
            }
            _ => ErrorClass::Fatal,
        },
        lapin::Error::ParsingError(_) | lapin::Error::SerialisationError(_) => {
            ErrorClass::Permanent
        }
        // Channel or connection no longer usable: invalid state, protocol close,
        // missed heartbeats, channel limit.
        _ => ErrorClass::Fatal,
    }
}
