//! Broker configuration.

use std::time::Duration;

use crate::error::{QueueError, QueueResult};

/// A job queue and the number of workers consuming it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerQueue {
    pub name: String,
    pub workers: usize,
}

impl ConsumerQueue {
    /// Parse `name` or `name:workers`.
    pub fn parse(entry: &str, default_workers: usize) -> QueueResult<Self> {
        let (name, workers) = match entry.split_once(':') {
            Some((name, count)) => {
                let workers = count.trim().parse::<usize>().map_err(|_| {
                    QueueError::config(format!("invalid worker count in '{}'", entry))
                })?;
                (name.trim(), workers)
            }
            None => (entry.trim(), default_workers),
        };

        if name.is_empty() {
            return Err(QueueError::config(format!("empty queue name in '{}'", entry)));
        }
        if workers == 0 {
            return Err(QueueError::config(format!("queue '{}' needs at least one worker", name)));
        }

        Ok(Self {
            name: name.to_string(),
            workers,
        })
    }
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// AMQP URI
    pub url: String,
    /// Job queues, in declaration order
    pub queues: Vec<ConsumerQueue>,
    /// Reserved queue the status exchange routes into
    pub status_queue: String,
    pub status_exchange: String,
    pub status_routing_key: String,
    pub publish_timeout: Duration,
    /// Backoff between failed connection attempts
    pub reconnect_delay: Duration,
    /// Pause after the broker closes a consumer
    pub channel_closed_pause: Duration,
}

impl BrokerConfig {
    pub fn new(url: impl Into<String>, queues: Vec<ConsumerQueue>) -> Self {
        Self {
            url: url.into(),
            queues,
            status_queue: "status_queue".to_string(),
            status_exchange: "image_processing".to_string(),
            status_routing_key: "status".to_string(),
            publish_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            channel_closed_pause: Duration::from_secs(2),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        let url = std::env::var("RABBITMQ_URL")
            .map_err(|_| QueueError::config("RABBITMQ_URL not set"))?;
        let list = std::env::var("RABBITMQ_QUEUES")
            .map_err(|_| QueueError::config("RABBITMQ_QUEUES not set"))?;
        let default_workers = env_or("RABBITMQ_DEFAULT_WORKERS", 1usize);

        let mut config = Self::new(url, parse_queue_list(&list, default_workers)?);

        if let Ok(queue) = std::env::var("RABBITMQ_STATUS_QUEUE") {
            config.status_queue = queue;
        }
        if let Ok(exchange) = std::env::var("RABBITMQ_STATUS_EXCHANGE") {
            config.status_exchange = exchange;
        }
        if let Ok(key) = std::env::var("RABBITMQ_STATUS_ROUTING_KEY") {
            config.status_routing_key = key;
        }
        config.publish_timeout =
            Duration::from_secs(env_or("RABBITMQ_PUBLISH_TIMEOUT_SECS", 10));
        config.reconnect_delay =
            Duration::from_secs(env_or("RABBITMQ_RECONNECT_DELAY_SECS", 5));
        config.channel_closed_pause =
            Duration::from_secs(env_or("RABBITMQ_CHANNEL_CLOSED_PAUSE_SECS", 2));

        Ok(config)
    }

    /// Queues that get consumers. The status queue is excluded.
    pub fn job_queues(&self) -> impl Iterator<Item = &ConsumerQueue> {
        self.queues.iter().filter(move |q| q.name != self.status_queue)
    }

    pub fn total_workers(&self) -> usize {
        self.job_queues().map(|q| q.workers).sum()
    }
}

/// Parse a comma separated queue list such as `resize:2,convert`.
pub fn parse_queue_list(list: &str, default_workers: usize) -> QueueResult<Vec<ConsumerQueue>> {
    let queues = list
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| ConsumerQueue::parse(entry, default_workers))
        .collect::<QueueResult<Vec<_>>>()?;

    if queues.is_empty() {
        return Err(QueueError::config("no queues configured"));
    }
    Ok(queues)
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
