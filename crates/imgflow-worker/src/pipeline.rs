//! Single-job processing pipeline.
//!
//! parse → PROCESSING → download → transform → derive key → upload →
//! PROCESSED, with a FAILED status and a stage-specific cleanup on the way
//! out of any failing stage.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use imgflow_media::{TransformedImage, Transformer};
use imgflow_models::{ImageJob, JobEnvelope, StatusEvent, Transformation};
use imgflow_queue::{QueueError, StatusSink};
use imgflow_storage::ObjectStore;
use tracing::{debug, error, warn, Instrument};

use crate::cleanup::{CleanupMode, CleanupScheduler, CleanupTask};
use crate::error::{Stage, WorkerError, WorkerResult};
use crate::keys::derive_destination_key;
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{retry_async, RetryConfig, RetryResult};
use crate::shutdown::Shutdown;
use crate::staging::StagingArea;

/// A successfully processed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedJob {
    pub job_id: String,
    pub destination_key: String,
    pub public_url: String,
}

/// Collaborators shared by every worker.
pub struct MessagePipeline {
    store: Arc<dyn ObjectStore>,
    transformer: Arc<dyn Transformer>,
    status: Arc<dyn StatusSink>,
    cleanup: Arc<dyn CleanupScheduler>,
    staging: StagingArea,
    retry: RetryConfig,
}

impl MessagePipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        transformer: Arc<dyn Transformer>,
        status: Arc<dyn StatusSink>,
        cleanup: Arc<dyn CleanupScheduler>,
        staging: StagingArea,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            transformer,
            status,
            cleanup,
            staging,
            retry,
        }
    }

    /// Process one delivery body.
    ///
    /// Stage failures come back as [`WorkerError::Rejected`] after the FAILED
    /// status has been published and cleanup scheduled. A fatal failure to
    /// publish PROCESSED or FAILED comes back as
    /// [`WorkerError::TerminalPublishFailed`], also after cleanup was
    /// scheduled. Any other error is left to the caller's classifier.
    pub async fn process(&self, body: &[u8], shutdown: &Shutdown) -> WorkerResult<ProcessedJob> {
        let envelope = JobEnvelope::parse(body)?;
        let job = envelope.data;
        let logger = JobLogger::new(&job.id, &job.transformation_type);
        let span = logger.create_span();

        self.run(&job, &logger, shutdown).instrument(span).await
    }

    async fn run(
        &self,
        job: &ImageJob,
        logger: &JobLogger,
        shutdown: &Shutdown,
    ) -> WorkerResult<ProcessedJob> {
        let started = Instant::now();
        logger.log_start(&format!("source {}", job.s3_raw_key));
        metrics::record_job_started(&job.transformation_type);

        if let Some(created_at) = job.created_at() {
            let delay = Utc::now().signed_duration_since(created_at);
            debug!("Queued for {} ms", delay.num_milliseconds());
            metrics::record_queue_delay(delay.num_milliseconds().max(0) as f64 / 1000.0);
        }

        // Nothing is staged yet, so a shutdown here simply requeues.
        tokio::select! {
            _ = shutdown.wait() => return Err(WorkerError::Cancelled),
            published = self.publish(StatusEvent::processing(job)) => {
                published.map_err(WorkerError::PublishFailed)?
            }
        }

        // Download
        let raw = match self.download(job, shutdown).await {
            Ok(raw) => raw,
            Err(WorkerError::Cancelled) => return Err(WorkerError::Cancelled),
            Err(e) => return self.fail(job, Stage::Download, None, None, e).await,
        };
        let raw_path = match self.staging.write_raw(&job.s3_raw_key, &raw).await {
            Ok(path) => path,
            Err(e) => return self.fail(job, Stage::Download, None, None, e).await,
        };
        logger.log_stage(Stage::Download.as_str(), &format!("{} bytes", raw.len()));

        // Transform
        let (transformation, output) = match self.transform(job, raw).await {
            Ok(result) => result,
            Err(e) => {
                return self
                    .fail(job, Stage::Transform, Some(raw_path), None, e)
                    .await
            }
        };
        logger.log_stage(
            Stage::Transform.as_str(),
            &format!("{}x{} {}", output.width, output.height, output.content_type()),
        );

        // Derive key
        let destination_key = match derive_destination_key(&job.s3_raw_key, &transformation) {
            Ok(key) => key,
            Err(e) => {
                return self
                    .fail(job, Stage::DeriveKey, Some(raw_path), None, e)
                    .await
            }
        };

        // Upload
        let processed_path = self.staging.processed_path(&destination_key).ok();
        let public_url = match self.upload(&destination_key, output, shutdown).await {
            Ok(url) => url,
            Err(WorkerError::Cancelled) => {
                // Requeued: the source object must stay.
                self.cleanup.schedule(
                    CleanupTask::new(CleanupMode::DeleteLocal, &job.s3_raw_key)
                        .with_raw(Some(raw_path))
                        .with_processed(processed_path),
                );
                return Err(WorkerError::Cancelled);
            }
            Err(e) => {
                return self
                    .fail(job, Stage::Upload, Some(raw_path), processed_path, e)
                    .await
            }
        };

        let published = self
            .publish(StatusEvent::processed(job, public_url.clone()))
            .await;
        self.cleanup.schedule(
            CleanupTask::new(CleanupMode::CleanupAll, &job.s3_raw_key)
                .with_raw(Some(raw_path))
                .with_processed(processed_path),
        );
        published.map_err(WorkerError::TerminalPublishFailed)?;

        let elapsed = started.elapsed();
        metrics::record_job_completed(&job.transformation_type, elapsed.as_secs_f64());
        logger.log_completion(&format!("{} in {:?}", destination_key, elapsed));

        Ok(ProcessedJob {
            job_id: job.id.clone(),
            destination_key,
            public_url,
        })
    }

    async fn download(&self, job: &ImageJob, shutdown: &Shutdown) -> WorkerResult<Vec<u8>> {
        let config = self.retry.named("download");
        let key = job.s3_raw_key.as_str();

        match retry_async(&config, shutdown, || self.store.download(key)).await {
            RetryResult::Success(bytes) => Ok(bytes),
            RetryResult::Failed { error, attempts } => {
                warn!("Download of {} failed after {} attempts", key, attempts);
                Err(error.into())
            }
            RetryResult::Cancelled { attempts } => {
                debug!("Download of {} cancelled after {} attempts", key, attempts);
                Err(WorkerError::Cancelled)
            }
        }
    }

    /// Resolve the transformation, then run it off the async threads.
    async fn transform(
        &self,
        job: &ImageJob,
        raw: Vec<u8>,
    ) -> WorkerResult<(Transformation, TransformedImage)> {
        let transformation = job.transformation()?;
        let transformer = Arc::clone(&self.transformer);

        let output = tokio::task::spawn_blocking(move || transformer.transform(&raw, &transformation))
            .await
            .map_err(|e| WorkerError::TaskFailed(e.to_string()))??;

        Ok((transformation, output))
    }

    /// Stage the result locally, then upload it.
    async fn upload(
        &self,
        destination_key: &str,
        output: TransformedImage,
        shutdown: &Shutdown,
    ) -> WorkerResult<String> {
        self.staging
            .write_processed(destination_key, &output.bytes)
            .await?;

        let config = self.retry.named("upload");
        let content_type = output.content_type();
        let bytes = output.bytes;

        let result = retry_async(&config, shutdown, || {
            self.store.upload(destination_key, bytes.clone(), content_type)
        })
        .await;

        match result {
            RetryResult::Success(url) => Ok(url),
            RetryResult::Failed { error, attempts } => {
                warn!("Upload of {} failed after {} attempts", destination_key, attempts);
                Err(error.into())
            }
            RetryResult::Cancelled { attempts } => {
                debug!(
                    "Upload of {} cancelled after {} attempts",
                    destination_key, attempts
                );
                Err(WorkerError::Cancelled)
            }
        }
    }

    /// Report FAILED, schedule the stage's cleanup, reject the job.
    async fn fail(
        &self,
        job: &ImageJob,
        stage: Stage,
        raw_path: Option<PathBuf>,
        processed_path: Option<PathBuf>,
        error: WorkerError,
    ) -> WorkerResult<ProcessedJob> {
        JobLogger::new(&job.id, &job.transformation_type)
            .log_failure(stage.as_str(), &error.to_string());
        metrics::record_job_failed(stage.as_str());

        let published = self
            .publish(StatusEvent::failed(job, stage.failure_code()))
            .await;
        self.cleanup.schedule(
            CleanupTask::new(stage.cleanup_mode(), &job.s3_raw_key)
                .with_raw(raw_path)
                .with_processed(processed_path),
        );
        published.map_err(WorkerError::TerminalPublishFailed)?;

        Err(WorkerError::rejected(stage, error))
    }

    /// Publish a status event. Only fatal publish failures are returned.
    async fn publish(&self, event: StatusEvent) -> Result<(), QueueError> {
        match self.status.publish(&event).await {
            Ok(()) => Ok(()),
            Err(e) if e.class().is_fatal() => {
                error!(status = %event.status, "Fatal status publish failure: {}", e);
                Err(e)
            }
            Err(e) => {
                warn!(status = %event.status, "Status publish failed, continuing: {}", e);
                Ok(())
            }
        }
    }
}
