//! End-to-end pipeline scenarios against in-memory collaborators.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use imgflow_media::ImageTransformer;
use imgflow_models::{JobStatus, StatusEvent};
use imgflow_queue::{QueueError, QueueResult, StatusSink};
use imgflow_storage::{ObjectStore, StorageError, StorageResult};
use imgflow_worker::{
    decide, shutdown_channel, AckDecision, CleanupMode, CleanupScheduler, CleanupTask,
    FatalPolicy, MessagePipeline, RetryConfig, Shutdown, Stage, StagingArea, WorkerError,
};
use tempfile::TempDir;
use tokio::time::Instant;

#[derive(Default)]
struct FakeStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    download_failures: AtomicU32,
    upload_failures: AtomicU32,
    downloads: Mutex<Vec<Instant>>,
    uploads: Mutex<Vec<(String, String, Instant)>>,
}

impl FakeStore {
    fn with_object(key: &str, bytes: Vec<u8>) -> Self {
        let store = Self::default();
        store.objects.lock().unwrap().insert(key.to_string(), bytes);
        store
    }

    fn failing_downloads(self, n: u32) -> Self {
        self.download_failures.store(n, Ordering::SeqCst);
        self
    }

    fn failing_uploads(self, n: u32) -> Self {
        self.upload_failures.store(n, Ordering::SeqCst);
        self
    }

    fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn download(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.downloads.lock().unwrap().push(Instant::now());
        if take_failure(&self.download_failures) {
            return Err(StorageError::timeout(format!("get {}", key)));
        }
        self.object(key).ok_or_else(|| StorageError::not_found(key))
    }

    async fn upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<String> {
        self.uploads
            .lock()
            .unwrap()
            .push((key.to_string(), content_type.to_string(), Instant::now()));
        if take_failure(&self.upload_failures) {
            return Err(StorageError::upload_failed("503 Slow Down"));
        }
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(format!("https://cdn.test/{}", key))
    }

    async fn delete(&self, _key: &str) -> StorageResult<()> {
        Ok(())
    }
}

/// Publish failure injected for one status.
#[derive(Clone, Copy)]
enum Fault {
    ChannelClosed,
    NotReady,
    Timeout,
}

impl Fault {
    fn error(self) -> QueueError {
        match self {
            Fault::ChannelClosed => QueueError::channel_closed("status channel is closed"),
            Fault::NotReady => QueueError::NotReady("status channel not established".into()),
            Fault::Timeout => QueueError::PublishTimeout(Duration::from_secs(10)),
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
    faults: Vec<(JobStatus, Fault)>,
}

impl RecordingSink {
    fn failing(mut self, status: JobStatus, fault: Fault) -> Self {
        self.faults.push((status, fault));
        self
    }

    fn statuses(&self) -> Vec<(JobStatus, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.status, e.error_msg.clone()))
            .collect()
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn publish(&self, event: &StatusEvent) -> QueueResult<()> {
        if let Some((_, fault)) = self.faults.iter().find(|(s, _)| *s == event.status) {
            return Err(fault.error());
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingCleanup {
    tasks: Mutex<Vec<CleanupTask>>,
}

impl RecordingCleanup {
    fn modes(&self) -> Vec<CleanupMode> {
        self.tasks.lock().unwrap().iter().map(|t| t.mode).collect()
    }
}

impl CleanupScheduler for RecordingCleanup {
    fn schedule(&self, task: CleanupTask) {
        self.tasks.lock().unwrap().push(task);
    }
}

struct Harness {
    store: Arc<FakeStore>,
    sink: Arc<RecordingSink>,
    cleanup: Arc<RecordingCleanup>,
    pipeline: MessagePipeline,
    shutdown: Shutdown,
    _trigger: imgflow_worker::ShutdownTrigger,
    _dir: TempDir,
}

fn harness(store: FakeStore, sink: RecordingSink) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(store);
    let sink = Arc::new(sink);
    let cleanup = Arc::new(RecordingCleanup::default());
    let (trigger, shutdown) = shutdown_channel();

    let pipeline = MessagePipeline::new(
        store.clone(),
        Arc::new(ImageTransformer::new()),
        sink.clone(),
        cleanup.clone(),
        StagingArea::new(dir.path().join("raw"), dir.path().join("processed")),
        RetryConfig::new("storage"),
    );

    Harness {
        store,
        sink,
        cleanup,
        pipeline,
        shutdown,
        _trigger: trigger,
        _dir: dir,
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 10])));
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .unwrap();
    buf
}

fn body(key: &str, kind: &str, params: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "pattern": "image_processing",
        "data": {
            "id": "job-1",
            "userId": "user-1",
            "fileName": "a.png",
            "s3RawKey": key,
            "transformationType": kind,
            "transformationParameters": params,
            "createdAt": "2024-05-01T10:00:00.000Z"
        }
    }))
    .unwrap()
}

const RESIZE: &str = r#"{"height":10,"width":10}"#;

#[tokio::test(start_paused = true)]
async fn test_valid_job_is_processed() {
    let h = harness(FakeStore::with_object("raw/a.png", png(40, 20)), RecordingSink::default());

    let outcome = h
        .pipeline
        .process(&body("raw/a.png", "RESIZE", RESIZE), &h.shutdown)
        .await;

    let processed = outcome.as_ref().unwrap();
    assert_eq!(processed.destination_key, "processed/a.png");
    assert_eq!(processed.public_url, "https://cdn.test/processed/a.png");
    assert_eq!(decide(&outcome, FatalPolicy::Continue), AckDecision::Ack);

    assert_eq!(
        h.sink.statuses(),
        vec![
            (JobStatus::Processing, String::new()),
            (JobStatus::Processed, String::new())
        ]
    );
    let events = h.sink.events.lock().unwrap().clone();
    assert_eq!(events[1].public_url, "https://cdn.test/processed/a.png");

    let uploaded = image::load_from_memory(&h.store.object("processed/a.png").unwrap()).unwrap();
    assert_eq!((uploaded.width(), uploaded.height()), (10, 10));

    let tasks = h.cleanup.tasks.lock().unwrap().clone();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].mode, CleanupMode::CleanupAll);
    assert_eq!(tasks[0].source_key, "raw/a.png");
    assert!(tasks[0].raw_path.as_ref().unwrap().exists());
    assert!(tasks[0].processed_path.as_ref().unwrap().exists());
}

#[tokio::test(start_paused = true)]
async fn test_convert_rewrites_extension() {
    let h = harness(FakeStore::with_object("raw/b.png", png(8, 8)), RecordingSink::default());

    let outcome = h
        .pipeline
        .process(&body("raw/b.png", "CONVERT", r#"{"format":"JPEG"}"#), &h.shutdown)
        .await
        .unwrap();

    assert_eq!(outcome.destination_key, "processed/b.jpeg");
    let uploads = h.store.uploads.lock().unwrap().clone();
    assert_eq!(uploads[0].0, "processed/b.jpeg");
    assert_eq!(uploads[0].1, "image/jpeg");
}

#[tokio::test(start_paused = true)]
async fn test_single_segment_key_fails_before_upload() {
    let h = harness(FakeStore::with_object("a.png", png(8, 8)), RecordingSink::default());

    let outcome = h
        .pipeline
        .process(&body("a.png", "RESIZE", RESIZE), &h.shutdown)
        .await;

    let err = outcome.as_ref().unwrap_err();
    assert_eq!(err.stage(), Some(Stage::DeriveKey));
    assert_eq!(
        decide(&outcome, FatalPolicy::Continue),
        AckDecision::Nack { requeue: false }
    );
    assert!(h.store.uploads.lock().unwrap().is_empty());
    assert_eq!(
        h.sink.statuses().last().unwrap(),
        &(JobStatus::Failed, "invalid-key-error".to_string())
    );
    assert_eq!(h.cleanup.modes(), vec![CleanupMode::DeleteRawAndS3]);
}

#[tokio::test(start_paused = true)]
async fn test_download_retries_then_fails() {
    let store = FakeStore::with_object("raw/a.png", png(8, 8)).failing_downloads(u32::MAX);
    let h = harness(store, RecordingSink::default());

    let outcome = h
        .pipeline
        .process(&body("raw/a.png", "RESIZE", RESIZE), &h.shutdown)
        .await;

    let err = outcome.as_ref().unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Download));
    assert_eq!(
        decide(&outcome, FatalPolicy::Continue),
        AckDecision::Nack { requeue: false }
    );

    let attempts = h.store.downloads.lock().unwrap().clone();
    assert_eq!(attempts.len(), 3);
    for pair in attempts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(2));
    }

    assert_eq!(
        h.sink.statuses(),
        vec![
            (JobStatus::Processing, String::new()),
            (JobStatus::Failed, "download-error".to_string())
        ]
    );
    let tasks = h.cleanup.tasks.lock().unwrap().clone();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].mode, CleanupMode::DeleteS3);
    assert!(tasks[0].raw_path.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_download_succeeds_on_second_attempt() {
    let store = FakeStore::with_object("raw/a.png", png(8, 8)).failing_downloads(1);
    let h = harness(store, RecordingSink::default());

    let outcome = h
        .pipeline
        .process(&body("raw/a.png", "RESIZE", RESIZE), &h.shutdown)
        .await;

    assert!(outcome.is_ok());
    assert_eq!(h.store.downloads.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_upload_retries_then_fails() {
    let store = FakeStore::with_object("raw/a.png", png(8, 8)).failing_uploads(u32::MAX);
    let h = harness(store, RecordingSink::default());

    let outcome = h
        .pipeline
        .process(&body("raw/a.png", "ROTATE", r#"{"degree":90}"#), &h.shutdown)
        .await;

    assert_eq!(outcome.as_ref().unwrap_err().stage(), Some(Stage::Upload));

    let uploads = h.store.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 3);
    for pair in uploads.windows(2) {
        assert!(pair[1].2 - pair[0].2 >= Duration::from_secs(2));
    }

    assert_eq!(
        h.sink.statuses().last().unwrap(),
        &(JobStatus::Failed, "upload-error".to_string())
    );
    let tasks = h.cleanup.tasks.lock().unwrap().clone();
    assert_eq!(tasks[0].mode, CleanupMode::DeleteRawProcessedAndS3);
    assert!(tasks[0].raw_path.is_some());
    assert!(tasks[0].processed_path.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_pdf_conversion_is_rejected() {
    let h = harness(FakeStore::with_object("raw/a.png", png(8, 8)), RecordingSink::default());

    let outcome = h
        .pipeline
        .process(&body("raw/a.png", "CONVERT", r#"{"format":"PDF"}"#), &h.shutdown)
        .await;

    let err = outcome.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Transform));
    assert!(err.to_string().contains("PDF"));
    assert!(h.store.uploads.lock().unwrap().is_empty());
    assert_eq!(
        h.sink.statuses().last().unwrap(),
        &(JobStatus::Failed, "transform-error".to_string())
    );
    assert_eq!(h.cleanup.modes(), vec![CleanupMode::DeleteRawAndS3]);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_rotation_is_rejected() {
    let h = harness(FakeStore::with_object("raw/a.png", png(8, 8)), RecordingSink::default());

    let outcome = h
        .pipeline
        .process(&body("raw/a.png", "ROTATE", r#"{"degree":45}"#), &h.shutdown)
        .await;

    let err = outcome.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Transform));
    assert!(h.store.uploads.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_oversized_resize_fails_before_decoding() {
    let h = harness(FakeStore::with_object("raw/a.png", png(8, 8)), RecordingSink::default());

    let outcome = h
        .pipeline
        .process(
            &body("raw/a.png", "FORCE_RESIZE", r#"{"height":200000,"width":200000}"#),
            &h.shutdown,
        )
        .await;

    assert_eq!(outcome.as_ref().unwrap_err().stage(), Some(Stage::Transform));
    assert_eq!(
        decide(&outcome, FatalPolicy::Halt),
        AckDecision::Nack { requeue: false }
    );
    assert_eq!(
        h.sink.statuses().last().unwrap(),
        &(JobStatus::Failed, "transform-error".to_string())
    );
    assert_eq!(h.cleanup.modes(), vec![CleanupMode::DeleteRawAndS3]);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_transformation_still_reports_failure() {
    let h = harness(FakeStore::with_object("raw/a.png", png(8, 8)), RecordingSink::default());

    let outcome = h
        .pipeline
        .process(&body("raw/a.png", "BLUR", "{}"), &h.shutdown)
        .await;

    assert_eq!(outcome.unwrap_err().stage(), Some(Stage::Transform));
    assert_eq!(
        h.sink.statuses().last().unwrap(),
        &(JobStatus::Failed, "transform-error".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_malformed_message_is_discarded_silently() {
    let h = harness(FakeStore::default(), RecordingSink::default());

    let outcome = h.pipeline.process(b"{\"data\": 7}", &h.shutdown).await;

    assert!(matches!(outcome, Err(WorkerError::Model(_))));
    assert_eq!(
        decide(&outcome, FatalPolicy::Halt),
        AckDecision::Nack { requeue: false }
    );
    assert!(h.sink.events.lock().unwrap().is_empty());
    assert!(h.cleanup.tasks.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fatal_publish_aborts_job() {
    let sink = RecordingSink::default().failing(JobStatus::Processing, Fault::ChannelClosed);
    let h = harness(FakeStore::with_object("raw/a.png", png(8, 8)), sink);

    let outcome = h
        .pipeline
        .process(&body("raw/a.png", "RESIZE", RESIZE), &h.shutdown)
        .await;

    assert!(matches!(outcome, Err(WorkerError::PublishFailed(_))));
    assert!(h.store.downloads.lock().unwrap().is_empty());
    assert_eq!(
        decide(&outcome, FatalPolicy::Continue),
        AckDecision::Nack { requeue: false }
    );
    // Nothing was scheduled yet, so halting may hand the job back.
    assert_eq!(
        decide(&outcome, FatalPolicy::Halt),
        AckDecision::Halt { requeue: true }
    );
    assert!(h.cleanup.tasks.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fatal_processed_publish_is_never_requeued() {
    let sink = RecordingSink::default().failing(JobStatus::Processed, Fault::ChannelClosed);
    let h = harness(FakeStore::with_object("raw/a.png", png(8, 8)), sink);

    let outcome = h
        .pipeline
        .process(&body("raw/a.png", "RESIZE", RESIZE), &h.shutdown)
        .await;

    assert!(matches!(outcome, Err(WorkerError::TerminalPublishFailed(_))));
    assert!(h.store.object("processed/a.png").is_some());
    assert_eq!(h.cleanup.modes(), vec![CleanupMode::CleanupAll]);

    // The source is scheduled for deletion; a redelivery could only fail.
    let halt = decide(&outcome, FatalPolicy::Halt);
    assert_eq!(halt, AckDecision::Halt { requeue: false });
    assert!(halt.halts());
    assert_eq!(
        decide(&outcome, FatalPolicy::Continue),
        AckDecision::Nack { requeue: false }
    );
}

#[tokio::test(start_paused = true)]
async fn test_fatal_failed_publish_still_schedules_cleanup() {
    let store = FakeStore::with_object("raw/a.png", png(8, 8)).failing_downloads(u32::MAX);
    let sink = RecordingSink::default().failing(JobStatus::Failed, Fault::ChannelClosed);
    let h = harness(store, sink);

    let outcome = h
        .pipeline
        .process(&body("raw/a.png", "RESIZE", RESIZE), &h.shutdown)
        .await;

    assert!(matches!(outcome, Err(WorkerError::TerminalPublishFailed(_))));
    assert_eq!(h.cleanup.modes(), vec![CleanupMode::DeleteS3]);
    assert_eq!(
        decide(&outcome, FatalPolicy::Halt),
        AckDecision::Halt { requeue: false }
    );
}

#[tokio::test(start_paused = true)]
async fn test_non_fatal_publish_failures_do_not_stop_the_job() {
    let sink = RecordingSink::default()
        .failing(JobStatus::Processing, Fault::NotReady)
        .failing(JobStatus::Processed, Fault::Timeout);
    let h = harness(FakeStore::with_object("raw/a.png", png(8, 8)), sink);

    let outcome = h
        .pipeline
        .process(&body("raw/a.png", "RESIZE", RESIZE), &h.shutdown)
        .await;

    assert_eq!(outcome.as_ref().unwrap().destination_key, "processed/a.png");
    assert_eq!(decide(&outcome, FatalPolicy::Halt), AckDecision::Ack);
    assert!(h.sink.statuses().is_empty());
    assert_eq!(h.cleanup.modes(), vec![CleanupMode::CleanupAll]);
}

#[tokio::test(start_paused = true)]
async fn test_upload_succeeds_on_second_attempt() {
    let store = FakeStore::with_object("raw/a.png", png(8, 8)).failing_uploads(1);
    let h = harness(store, RecordingSink::default());

    let outcome = h
        .pipeline
        .process(&body("raw/a.png", "ROTATE", r#"{"degree":180}"#), &h.shutdown)
        .await;

    assert!(outcome.is_ok());
    let uploads = h.store.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 2);
    assert!(uploads[1].2 - uploads[0].2 >= Duration::from_secs(2));
    assert_eq!(
        h.sink.statuses().last().unwrap(),
        &(JobStatus::Processed, String::new())
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_and_requeues() {
    let store = FakeStore::with_object("raw/a.png", png(8, 8)).failing_downloads(u32::MAX);
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(store);
    let sink = Arc::new(RecordingSink::default());
    let cleanup = Arc::new(RecordingCleanup::default());
    let (trigger, shutdown) = shutdown_channel();

    let pipeline = MessagePipeline::new(
        store.clone(),
        Arc::new(ImageTransformer::new()),
        sink.clone(),
        cleanup.clone(),
        StagingArea::new(dir.path().join("raw"), dir.path().join("processed")),
        RetryConfig::new("storage").with_delay(Duration::from_secs(30)),
    );

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.trigger();
    });

    let outcome = pipeline
        .process(&body("raw/a.png", "RESIZE", RESIZE), &shutdown)
        .await;
    stopper.await.unwrap();

    assert!(matches!(outcome, Err(WorkerError::Cancelled)));
    assert_eq!(
        decide(&outcome, FatalPolicy::Continue),
        AckDecision::Nack { requeue: true }
    );
    assert_eq!(store.downloads.lock().unwrap().len(), 1);
    assert_eq!(sink.statuses(), vec![(JobStatus::Processing, String::new())]);
    assert!(cleanup.tasks.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_upload_removes_local_files_only() {
    let store = FakeStore::with_object("raw/a.png", png(8, 8)).failing_uploads(u32::MAX);
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(store);
    let sink = Arc::new(RecordingSink::default());
    let cleanup = Arc::new(RecordingCleanup::default());
    let (trigger, shutdown) = shutdown_channel();

    let pipeline = MessagePipeline::new(
        store.clone(),
        Arc::new(ImageTransformer::new()),
        sink.clone(),
        cleanup.clone(),
        StagingArea::new(dir.path().join("raw"), dir.path().join("processed")),
        RetryConfig::new("storage").with_delay(Duration::from_secs(30)),
    );

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.trigger();
    });

    let outcome = pipeline
        .process(&body("raw/a.png", "RESIZE", RESIZE), &shutdown)
        .await;
    stopper.await.unwrap();

    assert!(matches!(outcome, Err(WorkerError::Cancelled)));
    assert_eq!(
        decide(&outcome, FatalPolicy::Continue),
        AckDecision::Nack { requeue: true }
    );
    assert_eq!(sink.statuses(), vec![(JobStatus::Processing, String::new())]);

    let tasks = cleanup.tasks.lock().unwrap().clone();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].mode, CleanupMode::DeleteLocal);
    assert!(!tasks[0].mode.removes_source());
    assert!(tasks[0].raw_path.as_ref().unwrap().exists());
    assert!(tasks[0].processed_path.as_ref().unwrap().exists());
}
