//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    // Job metrics
    pub const JOBS_STARTED_TOTAL: &str = "imgflow_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "imgflow_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "imgflow_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "imgflow_job_duration_seconds";
    pub const JOB_QUEUE_DELAY_SECONDS: &str = "imgflow_job_queue_delay_seconds";

    // Storage metrics
    pub const STORAGE_RETRIES_TOTAL: &str = "imgflow_storage_retries_total";

    // Cleanup metrics
    pub const CLEANUP_TOTAL: &str = "imgflow_cleanup_total";
    pub const CLEANUP_FAILURES_TOTAL: &str = "imgflow_cleanup_failures_total";

    // Broker metrics
    pub const RECONNECTS_TOTAL: &str = "imgflow_reconnects_total";
    pub const DELIVERIES_TOTAL: &str = "imgflow_deliveries_total";
}

/// Install the Prometheus exporter on `0.0.0.0:<port>`.
pub fn init_exporter(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

pub fn record_job_started(transformation: &str) {
    let labels = [("transformation", transformation.to_string())];
    counter!(names::JOBS_STARTED_TOTAL, &labels).increment(1);
}

pub fn record_job_completed(transformation: &str, duration_secs: f64) {
    let labels = [("transformation", transformation.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_failed(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_queue_delay(delay_secs: f64) {
    histogram!(names::JOB_QUEUE_DELAY_SECONDS).record(delay_secs);
}

pub fn record_storage_retry(operation: &str) {
    let labels = [("operation", operation.to_string())];
    counter!(names::STORAGE_RETRIES_TOTAL, &labels).increment(1);
}

pub fn record_cleanup(mode: &str, clean: bool) {
    let labels = [("mode", mode.to_string())];
    counter!(names::CLEANUP_TOTAL, &labels).increment(1);
    if !clean {
        counter!(names::CLEANUP_FAILURES_TOTAL, &labels).increment(1);
    }
}

pub fn record_reconnect(queue: &str) {
    let labels = [("queue", queue.to_string())];
    counter!(names::RECONNECTS_TOTAL, &labels).increment(1);
}

/// Record how a delivery was resolved (`ack`, `requeue`, `reject`).
pub fn record_delivery(queue: &str, resolution: &str) {
    let labels = [
        ("queue", queue.to_string()),
        ("resolution", resolution.to_string()),
    ];
    counter!(names::DELIVERIES_TOTAL, &labels).increment(1);
}
