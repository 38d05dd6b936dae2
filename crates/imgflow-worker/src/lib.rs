//! Image processing worker.
//!
//! This crate provides:
//! - The per-job message pipeline (download, transform, upload, status)
//! - Destination key derivation and local staging
//! - Detached cleanup of local and remote residue
//! - The worker pool that owns broker links, acks and graceful shutdown

pub mod cleanup;
pub mod config;
pub mod error;
pub mod keys;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod shutdown;
pub mod staging;
pub mod supervisor;

pub use cleanup::{
    CleanupMode, CleanupOrchestrator, CleanupScheduler, CleanupTask, CleanupTracker,
};
pub use config::{FatalPolicy, WorkerConfig};
pub use error::{Stage, WorkerError, WorkerResult};
pub use keys::derive_destination_key;
pub use logging::JobLogger;
pub use pipeline::{MessagePipeline, ProcessedJob};
pub use retry::{FailureTracker, RetryConfig, RetryResult};
pub use shutdown::{shutdown_channel, Shutdown, ShutdownTrigger};
pub use staging::StagingArea;
pub use supervisor::{decide, AckDecision, PoolSettings, WorkerPool};
