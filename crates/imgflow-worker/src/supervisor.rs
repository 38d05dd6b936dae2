//! Worker pool.
//!
//! Each configured queue gets N consumer loops. A loop owns its broker link,
//! processes one delivery at a time and rebuilds the link whenever it breaks.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use imgflow_models::ErrorClass;
use imgflow_queue::{AmqpStatusPublisher, BrokerConfig, BrokerConnector, BrokerLink};
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use lapin::Consumer;
use tracing::{debug, error, info, warn};

use crate::cleanup::CleanupTracker;
use crate::config::FatalPolicy;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::pipeline::{MessagePipeline, ProcessedJob};
use crate::retry::FailureTracker;
use crate::shutdown::Shutdown;

/// Consecutive connection failures logged before going quiet.
const MAX_LOGGED_CONNECT_FAILURES: u32 = 3;

/// How a delivery is resolved with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Nack { requeue: bool },
    /// Nack the message, then stop the worker.
    Halt { requeue: bool },
}

impl AckDecision {
    fn resolution(&self) -> &'static str {
        match self {
            AckDecision::Ack => "ack",
            AckDecision::Nack { requeue: true } | AckDecision::Halt { requeue: true } => "requeue",
            AckDecision::Nack { requeue: false } | AckDecision::Halt { requeue: false } => "reject",
        }
    }

    /// The worker stops after resolving this delivery.
    pub fn halts(&self) -> bool {
        matches!(self, AckDecision::Halt { .. })
    }
}

/// Map a pipeline outcome to an acknowledgment.
///
/// A job whose terminal status was attempted has had its cleanup scheduled,
/// so it is never requeued, even when the worker halts.
pub fn decide(outcome: &WorkerResult<ProcessedJob>, policy: FatalPolicy) -> AckDecision {
    match outcome {
        Ok(_) => AckDecision::Ack,
        Err(WorkerError::Rejected { requeue, .. }) => AckDecision::Nack { requeue: *requeue },
        Err(WorkerError::TerminalPublishFailed(_)) => match policy {
            FatalPolicy::Continue => AckDecision::Nack { requeue: false },
            FatalPolicy::Halt => AckDecision::Halt { requeue: false },
        },
        Err(e) => match e.class() {
            ErrorClass::Transient => AckDecision::Nack { requeue: true },
            ErrorClass::Permanent => AckDecision::Nack { requeue: false },
            ErrorClass::Fatal => match policy {
                FatalPolicy::Continue => AckDecision::Nack { requeue: false },
                FatalPolicy::Halt => AckDecision::Halt { requeue: true },
            },
        },
    }
}

/// Timing knobs for the consumer loops.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub fatal_policy: FatalPolicy,
    pub reconnect_delay: Duration,
    pub channel_closed_pause: Duration,
    pub shutdown_timeout: Duration,
}

impl PoolSettings {
    pub fn new(broker: &BrokerConfig, fatal_policy: FatalPolicy, shutdown_timeout: Duration) -> Self {
        Self {
            fatal_policy,
            reconnect_delay: broker.reconnect_delay,
            channel_closed_pause: broker.channel_closed_pause,
            shutdown_timeout,
        }
    }
}

/// Supervises every consumer loop and the status publisher.
pub struct WorkerPool {
    broker: BrokerConfig,
    connector: BrokerConnector,
    publisher: Arc<AmqpStatusPublisher>,
    pipeline: Arc<MessagePipeline>,
    cleanup: CleanupTracker,
    settings: PoolSettings,
}

impl WorkerPool {
    pub fn new(
        broker: BrokerConfig,
        publisher: Arc<AmqpStatusPublisher>,
        pipeline: Arc<MessagePipeline>,
        cleanup: CleanupTracker,
        settings: PoolSettings,
    ) -> Self {
        let connector = BrokerConnector::new(broker.url.clone());
        Self {
            broker,
            connector,
            publisher,
            pipeline,
            cleanup,
            settings,
        }
    }

    /// Run until `shutdown` fires, then drain.
    pub async fn run(&self, shutdown: Shutdown) -> WorkerResult<()> {
        if self.broker.total_workers() == 0 {
            return Err(WorkerError::config_error("no job queues to consume"));
        }

        if !self.establish_status(&shutdown).await {
            info!("Shutdown before the status publisher was ready");
            return Ok(());
        }

        let mut handles = Vec::new();
        for queue in self.broker.job_queues() {
            info!(queue = %queue.name, workers = queue.workers, "Starting workers");
            for index in 0..queue.workers {
                let worker = ConsumerWorker {
                    queue: queue.name.clone(),
                    label: format!("imgflow-{}-{}", queue.name, index),
                    connector: self.connector.clone(),
                    pipeline: Arc::clone(&self.pipeline),
                    settings: self.settings.clone(),
                    shutdown: shutdown.clone(),
                };
                handles.push(tokio::spawn(worker.run()));
            }
        }

        shutdown.wait().await;
        info!("Shutdown signal received, stopping {} workers", handles.len());

        let joined = tokio::time::timeout(
            self.settings.shutdown_timeout,
            futures::future::join_all(handles),
        )
        .await;
        match joined {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("Worker task panicked: {}", e);
                    }
                }
            }
            Err(_) => warn!(
                "Workers still running after {:?}",
                self.settings.shutdown_timeout
            ),
        }

        self.publisher.close().await;

        let pending = self.cleanup.pending();
        if pending > 0 {
            info!("Waiting for {} cleanup tasks", pending);
            if !self.cleanup.wait_idle(self.settings.shutdown_timeout).await {
                warn!("Abandoning {} cleanup tasks", self.cleanup.pending());
            }
        }

        info!("Worker pool stopped");
        Ok(())
    }

    /// Retry the status link until it is up. Returns `false` on shutdown.
    async fn establish_status(&self, shutdown: &Shutdown) -> bool {
        let mut failures = FailureTracker::new(MAX_LOGGED_CONNECT_FAILURES);

        loop {
            let result = tokio::select! {
                _ = shutdown.wait() => return false,
                result = self.publisher.establish() => result,
            };

            match result {
                Ok(()) => {
                    failures.record_success();
                    return true;
                }
                Err(e) => {
                    if failures.record_failure() {
                        warn!(
                            "Status publisher setup failed, retrying in {:?}: {}",
                            self.settings.reconnect_delay, e
                        );
                    }
                    metrics::record_reconnect(&self.broker.status_queue);
                }
            }

            if !pause(shutdown, self.settings.reconnect_delay).await {
                return false;
            }
        }
    }
}

/// Why a consume loop gave up its link.
enum LoopExit {
    Shutdown,
    ChannelLost,
    Halt,
}

struct ConsumerWorker {
    queue: String,
    label: String,
    connector: BrokerConnector,
    pipeline: Arc<MessagePipeline>,
    settings: PoolSettings,
    shutdown: Shutdown,
}

impl ConsumerWorker {
    async fn run(self) {
        let mut failures = FailureTracker::new(MAX_LOGGED_CONNECT_FAILURES);

        while !self.shutdown.is_triggered() {
            let opened = tokio::select! {
                _ = self.shutdown.wait() => break,
                opened = self.connector.open_consumer(&self.queue, &self.label) => opened,
            };

            let (link, mut consumer) = match opened {
                Ok(pair) => {
                    failures.record_success();
                    pair
                }
                Err(e) => {
                    if failures.record_failure() {
                        warn!(
                            worker = %self.label,
                            "Consumer setup failed, retrying in {:?}: {}",
                            self.settings.reconnect_delay,
                            e
                        );
                    }
                    metrics::record_reconnect(&self.queue);
                    if !pause(&self.shutdown, self.settings.reconnect_delay).await {
                        break;
                    }
                    continue;
                }
            };

            let exit = self.consume(&link, &mut consumer).await;
            link.close().await;

            match exit {
                LoopExit::Shutdown => break,
                LoopExit::Halt => {
                    error!(
                        worker = %self.label,
                        queue = %self.queue,
                        "Worker halted after a fatal error; operator attention required"
                    );
                    return;
                }
                LoopExit::ChannelLost => {
                    metrics::record_reconnect(&self.queue);
                    if !pause(&self.shutdown, self.settings.channel_closed_pause).await {
                        break;
                    }
                }
            }
        }

        debug!(worker = %self.label, "Worker stopped");
    }

    async fn consume(&self, link: &BrokerLink, consumer: &mut Consumer) -> LoopExit {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.wait() => return LoopExit::Shutdown,
                next = consumer.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    warn!(worker = %self.label, "Consumer error: {}", e);
                    return LoopExit::ChannelLost;
                }
                None => {
                    warn!(worker = %self.label, "Consumer closed by broker");
                    return LoopExit::ChannelLost;
                }
            };

            let outcome = self.pipeline.process(&delivery.data, &self.shutdown).await;
            let decision = decide(&outcome, self.settings.fatal_policy);
            self.log_outcome(&outcome, decision);

            if let Err(e) = resolve(&delivery, decision).await {
                warn!(worker = %self.label, "Failed to resolve delivery: {}", e);
                return LoopExit::ChannelLost;
            }
            metrics::record_delivery(&self.queue, decision.resolution());

            if decision.halts() {
                return LoopExit::Halt;
            }
            if !link.is_usable() {
                return LoopExit::ChannelLost;
            }
        }
    }

    fn log_outcome(&self, outcome: &WorkerResult<ProcessedJob>, decision: AckDecision) {
        match outcome {
            Ok(job) => debug!(
                worker = %self.label,
                job_id = %job.job_id,
                "Processed into {}", job.destination_key
            ),
            Err(e) if e.class().is_fatal() => error!(
                worker = %self.label,
                decision = ?decision,
                "Fatal error: {}", e
            ),
            Err(e) => warn!(
                worker = %self.label,
                decision = ?decision,
                class = %e.class(),
                "Delivery not processed: {}", e
            ),
        }
    }
}

async fn resolve(delivery: &Delivery, decision: AckDecision) -> lapin::Result<()> {
    match decision {
        AckDecision::Ack => delivery.ack(BasicAckOptions::default()).await,
        AckDecision::Nack { requeue } | AckDecision::Halt { requeue } => {
            delivery
                .nack(BasicNackOptions {
                    requeue,
                    multiple: false,
                })
                .await
        }
    }
}

/// Sleep unless shutdown arrives first. Returns `false` on shutdown.
async fn pause(shutdown: &Shutdown, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.wait() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
