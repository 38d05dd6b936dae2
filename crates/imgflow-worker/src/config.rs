//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::{WorkerError, WorkerResult};

/// What a worker does when a job fails with a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatalPolicy {
    /// Log, reject the message without requeue, keep consuming
    #[default]
    Continue,
    /// Requeue the message and stop this worker
    Halt,
}

impl FromStr for FatalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(FatalPolicy::Continue),
            "halt" => Ok(FatalPolicy::Halt),
            other => Err(format!("unknown fatal policy '{}'", other)),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Local staging root for downloaded sources
    pub raw_dir: PathBuf,
    /// Local staging root for transformed results
    pub processed_dir: PathBuf,
    /// Storage attempts per download/upload, including the first
    pub retry_attempts: u32,
    /// Fixed delay between storage attempts
    pub retry_delay: Duration,
    /// Budget for one cleanup task
    pub cleanup_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    pub fatal_policy: FatalPolicy,
    /// Prometheus exporter port; no exporter when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("./images/raw"),
            processed_dir: PathBuf::from("./images/processed"),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(2),
            cleanup_timeout: Duration::from_secs(90),
            shutdown_timeout: Duration::from_secs(30),
            fatal_policy: FatalPolicy::Continue,
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let fatal_policy = match std::env::var("WORKER_FATAL_POLICY") {
            Ok(value) => value.parse().unwrap_or_else(|e| {
                warn!("{}; falling back to 'continue'", e);
                FatalPolicy::Continue
            }),
            Err(_) => defaults.fatal_policy,
        };

        Self {
            raw_dir: std::env::var("WORKER_RAW_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.raw_dir),
            processed_dir: std::env::var("WORKER_PROCESSED_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.processed_dir),
            retry_attempts: std::env::var("WORKER_RETRY_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(3),
            retry_delay: Duration::from_secs(
                std::env::var("WORKER_RETRY_DELAY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            ),
            cleanup_timeout: Duration::from_secs(
                std::env::var("WORKER_CLEANUP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(90),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            fatal_policy,
            metrics_port: std::env::var("METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }
}

impl WorkerConfig {
    /// Reject settings that would make staged files collide.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.raw_dir == self.processed_dir {
            return Err(WorkerError::config_error(format!(
                "raw and processed staging directories must differ (both {})",
                self.raw_dir.display()
            )));
        }
        Ok(())
    }
}
