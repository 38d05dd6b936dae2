//! Outbound status events.
//!
//! The status consumer is the system of record for job state; the worker
//! only emits events, it never stores them.

use serde::{Deserialize, Serialize};

use crate::job::ImageJob;

/// Pattern field of every status envelope.
pub const STATUS_PATTERN: &str = "status";

/// Job lifecycle stage reported to the status consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Worker picked the job up
    Processing,
    /// Result uploaded
    Processed,
    /// Job failed at some stage
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "PROCESSING",
            JobStatus::Processed => "PROCESSED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Processed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes carried in `errorMsg` of FAILED events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCode {
    Download,
    Transform,
    InvalidKey,
    Upload,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::Download => "download-error",
            FailureCode::Transform => "transform-error",
            FailureCode::InvalidKey => "invalid-key-error",
            FailureCode::Upload => "upload-error",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub id: String,
    pub user_id: String,
    pub status: JobStatus,
    pub public_url: String,
    pub error_msg: String,
}

impl StatusEvent {
    pub fn processing(job: &ImageJob) -> Self {
        Self::new(job, JobStatus::Processing, String::new(), String::new())
    }

    pub fn processed(job: &ImageJob, public_url: impl Into<String>) -> Self {
        Self::new(job, JobStatus::Processed, public_url.into(), String::new())
    }

    pub fn failed(job: &ImageJob, code: FailureCode) -> Self {
        Self::new(job, JobStatus::Failed, String::new(), code.as_str().to_string())
    }

    fn new(job: &ImageJob, status: JobStatus, public_url: String, error_msg: String) -> Self {
        Self {
            id: job.id.clone(),
            user_id: job.user_id.clone(),
            status,
            public_url,
            error_msg,
        }
    }
}

/// Envelope published to the status exchange: `{pattern: "status", data}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub pattern: String,
    pub data: StatusEvent,
}

impl StatusMessage {
    pub fn new(data: StatusEvent) -> Self {
        Self {
            pattern: STATUS_PATTERN.to_string(),
            data,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
