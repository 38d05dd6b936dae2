//! Connection factory.
//!
//! Every consumer loop owns its own connection and channel. Nothing here is
//! shared between workers; a broken link is dropped and a fresh one is built.

use lapin::options::{BasicConsumeOptions, BasicQosOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use tracing::{debug, info, warn};

use crate::error::QueueResult;

/// A connection and the single channel opened on it.
pub struct BrokerLink {
    pub connection: Connection,
    pub channel: Channel,
}

impl BrokerLink {
    /// Both the connection and the channel can still carry frames.
    pub fn is_usable(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    /// Close channel then connection. Errors are logged, not returned.
    pub async fn close(&self) {
        if self.channel.status().connected() {
            if let Err(e) = self.channel.close(200, "worker shutting down").await {
                debug!("Channel close failed: {}", e);
            }
        }
        if self.connection.status().connected() {
            if let Err(e) = self.connection.close(200, "worker shutting down").await {
                debug!("Connection close failed: {}", e);
            }
        }
    }
}

/// Builds broker links from an AMQP URI.
#[derive(Debug, Clone)]
pub struct BrokerConnector {
    url: String,
}

impl BrokerConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Open a connection named `label` with one channel on it.
    pub async fn connect(&self, label: &str) -> QueueResult<BrokerLink> {
        let properties = ConnectionProperties::default().with_connection_name(label.into());
        let connection = Connection::connect(&self.url, properties).await?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = connection.close(200, "channel open failed").await {
                    warn!("Failed to close connection after channel error: {}", close_err);
                }
                return Err(e.into());
            }
        };

        debug!(label = %label, channel = channel.id(), "Broker link opened");
        Ok(BrokerLink {
            connection,
            channel,
        })
    }

    /// Open a link and start consuming `queue` with prefetch 1 and explicit acks.
    pub async fn open_consumer(&self, queue: &str, label: &str) -> QueueResult<(BrokerLink, Consumer)> {
        let link = self.connect(label).await?;

        match Self::start_consumer(&link.channel, queue).await {
            Ok(consumer) => {
                info!(queue = %queue, consumer = %consumer.tag().as_str(), "Consumer started");
                Ok((link, consumer))
            }
            Err(e) => {
                link.close().await;
                Err(e)
            }
        }
    }

    async fn start_consumer(channel: &Channel, queue: &str) -> QueueResult<Consumer> {
        channel.basic_qos(1, BasicQosOptions::default()).await?;
        declare_durable_queue(channel, queue).await?;

        let tag = format!("imgflow-{}", uuid::Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(consumer)
    }
}

/// Declare `queue` as durable. Idempotent on the broker side.
pub async fn declare_durable_queue(channel: &Channel, queue: &str) -> QueueResult<()> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}
