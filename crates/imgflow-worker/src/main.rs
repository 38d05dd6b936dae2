//! Image processing worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use imgflow_media::ImageTransformer;
use imgflow_queue::{AmqpStatusPublisher, BrokerConfig};
use imgflow_storage::S3Client;
use imgflow_worker::{
    shutdown_channel, CleanupOrchestrator, MessagePipeline, PoolSettings, RetryConfig,
    ShutdownTrigger, StagingArea, WorkerConfig, WorkerPool,
};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lapin=warn,aws_config=warn"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting imgflow-worker");

    // Load configuration
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);
    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    let broker = match BrokerConfig::from_env() {
        Ok(b) => b,
        Err(e) => {
            error!("Invalid broker configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Consuming {} queues with {} workers",
        broker.job_queues().count(),
        broker.total_workers()
    );

    if let Some(port) = config.metrics_port {
        match imgflow_worker::metrics::init_exporter(port) {
            Ok(()) => info!("Metrics exporter listening on :{}", port),
            Err(e) => error!("{}", e),
        }
    }

    let staging = StagingArea::new(&config.raw_dir, &config.processed_dir);
    if let Err(e) = staging.ensure_dirs().await {
        error!("Failed to create staging directories: {}", e);
        std::process::exit(1);
    }

    // Storage and transformer first; everything else is built on them
    let store = match S3Client::from_env().await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to create S3 client: {}", e);
            std::process::exit(1);
        }
    };
    let transformer = Arc::new(ImageTransformer::new());

    let publisher = Arc::new(AmqpStatusPublisher::from_config(&broker));
    let cleanup = Arc::new(CleanupOrchestrator::new(store.clone(), config.cleanup_timeout));
    let tracker = cleanup.tracker();

    let retry = RetryConfig::new("storage")
        .with_attempts(config.retry_attempts)
        .with_delay(config.retry_delay);

    let pipeline = Arc::new(MessagePipeline::new(
        store,
        transformer,
        publisher.clone(),
        cleanup,
        staging,
        retry,
    ));

    let settings = PoolSettings::new(&broker, config.fatal_policy, config.shutdown_timeout);
    let pool = WorkerPool::new(broker, publisher, pipeline, tracker, settings);

    // Setup signal handlers
    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(watch_signals(trigger));

    if let Err(e) = pool.run(shutdown).await {
        error!("Worker pool error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn watch_signals(trigger: ShutdownTrigger) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.ok();

    info!("Received shutdown signal");
    trigger.trigger();
}
