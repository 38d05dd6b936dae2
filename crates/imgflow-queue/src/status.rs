//! Status publishing.
//!
//! Job outcomes are reported as `{pattern: "status", data}` messages on a
//! direct exchange. The publisher keeps its own broker link, separate from
//! every consumer, so a broken job channel never takes status reporting
//! down with it (and vice versa).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use imgflow_models::{StatusEvent, StatusMessage};
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, ExchangeKind};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::connector::{declare_durable_queue, BrokerConnector, BrokerLink};
use crate::error::{QueueError, QueueResult};

/// Persistent delivery mode.
const PERSISTENT: u8 = 2;

/// Destination of status messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRoute {
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
}

impl StatusRoute {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            exchange: config.status_exchange.clone(),
            routing_key: config.status_routing_key.clone(),
            queue: config.status_queue.clone(),
        }
    }
}

/// Sink for job status events.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn publish(&self, event: &StatusEvent) -> QueueResult<()>;
}

/// Publishes status events over AMQP.
///
/// Reconnects are serialized: concurrent publishers that find the link
/// missing wait for a single `establish` instead of replacing each other's
/// links.
pub struct AmqpStatusPublisher {
    connector: BrokerConnector,
    route: StatusRoute,
    publish_timeout: Duration,
    link: RwLock<Option<BrokerLink>>,
    reconnect: Mutex<()>,
    established: AtomicBool,
}

impl AmqpStatusPublisher {
    pub fn new(connector: BrokerConnector, route: StatusRoute, publish_timeout: Duration) -> Self {
        Self {
            connector,
            route,
            publish_timeout,
            link: RwLock::new(None),
            reconnect: Mutex::new(()),
            established: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::new(
            BrokerConnector::new(config.url.clone()),
            StatusRoute::from_config(config),
            config.publish_timeout,
        )
    }

    pub fn route(&self) -> &StatusRoute {
        &self.route
    }

    /// Open the status link and declare exchange, queue and binding.
    pub async fn establish(&self) -> QueueResult<()> {
        let _reconnect = self.reconnect.lock().await;
        self.open_link().await
    }

    /// Caller holds the reconnect lock.
    async fn open_link(&self) -> QueueResult<()> {
        let link = self.connector.connect("imgflow-status").await?;

        if let Err(e) = declare_topology(&link.channel, &self.route).await {
            link.close().await;
            return Err(e);
        }

        let previous = self.link.write().await.replace(link);
        if let Some(old) = previous {
            old.close().await;
        }
        self.established.store(true, Ordering::SeqCst);

        info!(
            exchange = %self.route.exchange,
            queue = %self.route.queue,
            routing_key = %self.route.routing_key,
            "Status publisher ready"
        );
        Ok(())
    }

    pub async fn is_ready(&self) -> bool {
        self.link
            .read()
            .await
            .as_ref()
            .map(BrokerLink::is_usable)
            .unwrap_or(false)
    }

    /// Close the status link.
    pub async fn close(&self) {
        if let Some(link) = self.link.write().await.take() {
            link.close().await;
            debug!("Status publisher closed");
        }
    }

    async fn link_state(&self) -> LinkState {
        match self.link.read().await.as_ref() {
            Some(link) if link.is_usable() => LinkState::Usable(link.channel.clone()),
            Some(_) => LinkState::Closed,
            None => LinkState::Missing,
        }
    }

    /// Channel to publish on, rebuilding a dropped link once it has been
    /// established before.
    async fn channel(&self) -> QueueResult<Channel> {
        match self.link_state().await {
            LinkState::Usable(channel) => Ok(channel),
            LinkState::Missing if !self.established.load(Ordering::SeqCst) => Err(
                QueueError::NotReady("status channel has not been established".to_string()),
            ),
            LinkState::Missing => {
                let _reconnect = self.reconnect.lock().await;
                // Another publisher may have reconnected while we waited.
                if let LinkState::Usable(channel) = self.link_state().await {
                    return Ok(channel);
                }
                self.open_link().await?;
                match self.link_state().await {
                    LinkState::Usable(channel) => Ok(channel),
                    _ => Err(QueueError::channel_closed("status link lost right after reconnect")),
                }
            }
            LinkState::Closed => {
                // Fail this publish; the next one reconnects.
                if let Some(link) = self.link.write().await.take() {
                    warn!("Status channel closed; will reconnect on next publish");
                    link.close().await;
                }
                Err(QueueError::channel_closed("status channel is closed"))
            }
        }
    }

    async fn send(&self, payload: &[u8]) -> QueueResult<()> {
        let channel = self.channel().await?;
        channel
            .basic_publish(
                &self.route.exchange,
                &self.route.routing_key,
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(PERSISTENT),
            )
            .await?;
        Ok(())
    }
}

enum LinkState {
    Usable(Channel),
    Closed,
    Missing,
}

#[async_trait]
impl StatusSink for AmqpStatusPublisher {
    /// The timeout covers a lazy reconnect as well as the publish itself.
    async fn publish(&self, event: &StatusEvent) -> QueueResult<()> {
        let payload = StatusMessage::new(event.clone()).to_json()?;

        tokio::time::timeout(self.publish_timeout, self.send(&payload))
            .await
            .map_err(|_| QueueError::PublishTimeout(self.publish_timeout))??;

        debug!(job_id = %event.id, status = %event.status, "Status published");
        Ok(())
    }
}

async fn declare_topology(channel: &Channel, route: &StatusRoute) -> QueueResult<()> {
    channel
        .exchange_declare(
            &route.exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    declare_durable_queue(channel, &route.queue).await?;

    channel
        .queue_bind(
            &route.queue,
            &route.exchange,
            &route.routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    Ok(())
}
