//! Worker error types.

use imgflow_models::{classify_io, ErrorClass, FailureCode, ModelError};
use thiserror::Error;

use crate::cleanup::CleanupMode;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Pipeline stage a job failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Download,
    Transform,
    DeriveKey,
    Upload,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Transform => "transform",
            Stage::DeriveKey => "derive_key",
            Stage::Upload => "upload",
        }
    }

    /// Code reported in the FAILED status event.
    pub fn failure_code(&self) -> FailureCode {
        match self {
            Stage::Download => FailureCode::Download,
            Stage::Transform => FailureCode::Transform,
            Stage::DeriveKey => FailureCode::InvalidKey,
            Stage::Upload => FailureCode::Upload,
        }
    }

    /// Residue to remove after a failure in this stage.
    pub fn cleanup_mode(&self) -> CleanupMode {
        match self {
            Stage::Download => CleanupMode::DeleteS3,
            Stage::Transform | Stage::DeriveKey => CleanupMode::DeleteRawAndS3,
            Stage::Upload => CleanupMode::DeleteRawProcessedAndS3,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    /// A pipeline stage failed and the job has been reported FAILED.
    #[error("{stage} stage failed: {source}")]
    Rejected {
        stage: Stage,
        requeue: bool,
        #[source]
        source: Box<WorkerError>,
    },

    #[error("Status publish failed: {0}")]
    PublishFailed(#[source] imgflow_queue::QueueError),

    /// The terminal status could not be published after the job's cleanup
    /// was scheduled. The message must not be redelivered.
    #[error("Terminal status publish failed: {0}")]
    TerminalPublishFailed(#[source] imgflow_queue::QueueError),

    #[error("Job cancelled by shutdown")]
    Cancelled,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Blocking task failed: {0}")]
    TaskFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Storage error: {0}")]
    Storage(#[from] imgflow_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] imgflow_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] imgflow_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Wrap a stage failure. Stage failures are never requeued.
    pub fn rejected(stage: Stage, source: impl Into<WorkerError>) -> Self {
        Self::Rejected {
            stage,
            requeue: false,
            source: Box::new(source.into()),
        }
    }

    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Stage of a rejected job.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            WorkerError::Rejected { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Retry-ability of this failure.
    pub fn class(&self) -> ErrorClass {
        match self {
            WorkerError::Rejected { source, .. } => source.class(),
            WorkerError::PublishFailed(e)
            | WorkerError::TerminalPublishFailed(e)
            | WorkerError::Queue(e) => e.class(),
            WorkerError::Cancelled => ErrorClass::Transient,
            WorkerError::ConfigError(_) => ErrorClass::Fatal,
            WorkerError::Storage(e) => e.class(),
            WorkerError::Media(e) => e.class(),
            WorkerError::Model(e) => e.class(),
            WorkerError::Io(e) => classify_io(e),
            WorkerError::InvalidKey(_) | WorkerError::TaskFailed(_) => ErrorClass::Permanent,
        }
    }
}
