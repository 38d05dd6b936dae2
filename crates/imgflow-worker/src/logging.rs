//! Per-job log lines.
//!
//! Every line carries the job id and the transformation type as sent on the
//! wire, so a job can be followed through the logs even when its
//! transformation turns out to be invalid.

use tracing::{error, info, Span};

/// Logger bound to one job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    transformation: String,
}

impl JobLogger {
    pub fn new(job_id: &str, transformation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            transformation: transformation.to_string(),
        }
    }

    /// Job taken off the queue.
    pub fn log_start(&self, detail: &str) {
        info!(
            job_id = %self.job_id,
            transformation = %self.transformation,
            "Accepted job, {}", detail
        );
    }

    /// A stage finished successfully.
    pub fn log_stage(&self, stage: &str, detail: &str) {
        info!(
            job_id = %self.job_id,
            stage,
            "{} done: {}", stage, detail
        );
    }

    /// Job failed in `stage`; a FAILED status follows.
    pub fn log_failure(&self, stage: &str, reason: &str) {
        error!(
            job_id = %self.job_id,
            transformation = %self.transformation,
            stage,
            "Job failed during {}: {}", stage, reason
        );
    }

    /// Job uploaded and reported PROCESSED.
    pub fn log_completion(&self, detail: &str) {
        info!(
            job_id = %self.job_id,
            transformation = %self.transformation,
            "Processed {}", detail
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn transformation(&self) -> &str {
        &self.transformation
    }

    /// Span wrapping the whole job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "image_job",
            job_id = %self.job_id,
            transformation = %self.transformation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_keeps_wire_transformation() {
        let logger = JobLogger::new("job-123", "SHARPEN");

        assert_eq!(logger.job_id(), "job-123");
        assert_eq!(logger.transformation(), "SHARPEN");
    }
}
