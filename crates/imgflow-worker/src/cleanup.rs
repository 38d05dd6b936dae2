//! Post-outcome cleanup.
//!
//! Once a job reaches a terminal outcome, its local staging files and the
//! remote source object are removed in a detached task. Cleanup never feeds
//! back into the acknowledgment decision and is not cancelled by shutdown;
//! shutdown only waits for it for a bounded time.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use imgflow_storage::ObjectStore;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::metrics;

/// Which residue a cleanup task removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CleanupMode {
    /// Remote source only
    #[default]
    DeleteS3,
    /// Local raw file and remote source
    DeleteRawAndS3,
    /// Local raw and processed files and remote source
    DeleteRawProcessedAndS3,
    /// Everything left after a successful job
    CleanupAll,
    /// Local staging files only; the message goes back to the queue
    DeleteLocal,
}

impl CleanupMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupMode::DeleteS3 => "delete_s3",
            CleanupMode::DeleteRawAndS3 => "delete_raw_and_s3",
            CleanupMode::DeleteRawProcessedAndS3 => "delete_raw_processed_and_s3",
            CleanupMode::CleanupAll => "cleanup_all",
            CleanupMode::DeleteLocal => "delete_local",
        }
    }

    /// Whether the local raw file goes.
    pub fn removes_raw(&self) -> bool {
        !matches!(self, CleanupMode::DeleteS3)
    }

    /// Whether the local processed file goes.
    pub fn removes_processed(&self) -> bool {
        matches!(
            self,
            CleanupMode::DeleteRawProcessedAndS3
                | CleanupMode::CleanupAll
                | CleanupMode::DeleteLocal
        )
    }

    /// Whether the remote source object is deleted.
    pub fn removes_source(&self) -> bool {
        !matches!(self, CleanupMode::DeleteLocal)
    }
}

impl std::fmt::Display for CleanupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of cleanup work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupTask {
    pub mode: CleanupMode,
    /// Remote key of the raw upload
    pub source_key: String,
    pub raw_path: Option<PathBuf>,
    pub processed_path: Option<PathBuf>,
}

impl CleanupTask {
    pub fn new(mode: CleanupMode, source_key: impl Into<String>) -> Self {
        Self {
            mode,
            source_key: source_key.into(),
            raw_path: None,
            processed_path: None,
        }
    }

    /// Local raw file to remove, if one was staged.
    pub fn with_raw(mut self, path: Option<PathBuf>) -> Self {
        self.raw_path = path;
        self
    }

    /// Local processed file to remove, if one was staged.
    pub fn with_processed(mut self, path: Option<PathBuf>) -> Self {
        self.processed_path = path;
        self
    }
}

/// Accepts cleanup work. Must return immediately.
pub trait CleanupScheduler: Send + Sync {
    fn schedule(&self, task: CleanupTask);
}

/// Counts outstanding cleanup tasks.
#[derive(Debug, Clone, Default)]
pub struct CleanupTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    pending: AtomicUsize,
    idle: Notify,
}

/// Held by a running cleanup task.
#[derive(Debug)]
pub struct CleanupGuard {
    inner: Arc<TrackerInner>,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.inner.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl CleanupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> CleanupGuard {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        CleanupGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Wait until no task is outstanding. Returns `false` on timeout.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, async {
            loop {
                let notified = self.inner.idle.notified();
                if self.pending() == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

/// Runs cleanup tasks on the runtime, each under its own timeout.
pub struct CleanupOrchestrator {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
    tracker: CleanupTracker,
}

impl CleanupOrchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            tracker: CleanupTracker::new(),
        }
    }

    pub fn tracker(&self) -> CleanupTracker {
        self.tracker.clone()
    }
}

impl CleanupScheduler for CleanupOrchestrator {
    fn schedule(&self, task: CleanupTask) {
        let guard = self.tracker.begin();
        let store = Arc::clone(&self.store);
        let limit = self.timeout;

        tokio::spawn(async move {
            let _guard = guard;
            let mode = task.mode;
            let key = task.source_key.clone();

            match tokio::time::timeout(limit, run_cleanup(store.as_ref(), task)).await {
                Ok(0) => {
                    debug!(mode = %mode, key = %key, "Cleanup finished");
                    metrics::record_cleanup(mode.as_str(), true);
                }
                Ok(failures) => {
                    info!(mode = %mode, key = %key, failures, "Cleanup finished with failures");
                    metrics::record_cleanup(mode.as_str(), false);
                }
                Err(_) => {
                    warn!(mode = %mode, key = %key, "Cleanup timed out after {:?}", limit);
                    metrics::record_cleanup(mode.as_str(), false);
                }
            }
        });
    }
}

/// Run every step of `task`, returning the number of failed steps.
pub async fn run_cleanup(store: &dyn ObjectStore, task: CleanupTask) -> usize {
    let mut failures = 0;

    if task.mode.removes_raw() {
        if let Some(path) = &task.raw_path {
            failures += usize::from(!remove_local(path).await);
        }
    }
    if task.mode.removes_processed() {
        if let Some(path) = &task.processed_path {
            failures += usize::from(!remove_local(path).await);
        }
    }

    if task.mode.removes_source() {
        if let Err(e) = store.delete(&task.source_key).await {
            warn!("Failed to delete source object {}: {}", task.source_key, e);
            failures += 1;
        }
    }

    failures
}

async fn remove_local(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Already gone: {}", path.display());
            true
        }
        Err(e) => {
            warn!("Failed to remove {}: {}", path.display(), e);
            false
        }
    }
}
