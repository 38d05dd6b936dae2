//! Inbound job envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::transformation::Transformation;

/// Message envelope as published by the upload service: `{pattern, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    #[serde(default)]
    pub pattern: String,
    pub data: ImageJob,
}

impl JobEnvelope {
    /// Parse and validate a delivery body.
    pub fn parse(body: &[u8]) -> ModelResult<Self> {
        let envelope: JobEnvelope = serde_json::from_slice(body)
            .map_err(|e| ModelError::malformed(format!("failed to parse job envelope: {}", e)))?;

        if envelope.data.id.trim().is_empty() {
            return Err(ModelError::malformed("job id is empty"));
        }
        if envelope.data.s3_raw_key.trim().is_empty() {
            return Err(ModelError::malformed("s3RawKey is empty"));
        }

        Ok(envelope)
    }
}

/// One image-processing job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageJob {
    /// Job ID assigned by the upload service
    pub id: String,
    /// Owner of the image
    pub user_id: String,
    /// Original file name as uploaded
    #[serde(default)]
    pub file_name: Option<String>,
    /// Object key of the raw upload
    pub s3_raw_key: String,
    #[serde(default)]
    pub public_url: Option<String>,
    /// Status as last seen by the producer (informational)
    #[serde(default)]
    pub status: Option<String>,
    /// RESIZE, ROTATE, CONVERT or FORCE_RESIZE
    pub transformation_type: String,
    /// JSON string whose shape depends on the transformation type
    #[serde(default)]
    pub transformation_parameters: Option<String>,
    #[serde(default)]
    pub s3_public_url: Option<String>,
    /// RFC 3339 creation timestamp
    #[serde(default)]
    pub created_at: Option<String>,
}

impl ImageJob {
    /// Resolve the typed transformation for this job.
    pub fn transformation(&self) -> ModelResult<Transformation> {
        Transformation::parse(
            &self.transformation_type,
            self.transformation_parameters.as_deref().unwrap_or_default(),
        )
    }

    /// Creation time, when present and well-formed.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}
