//! AMQP broker plumbing.
//!
//! This crate provides:
//! - Broker configuration loaded from the environment
//! - A connection factory that hands each worker its own connection and channel
//! - The status publisher that reports job outcomes to the status exchange

pub mod config;
pub mod connector;
pub mod error;
pub mod status;

pub use config::{parse_queue_list, BrokerConfig, ConsumerQueue};
pub use connector::{BrokerConnector, BrokerLink};
pub use error::{QueueError, QueueResult};
pub use status::{AmqpStatusPublisher, StatusRoute, StatusSink};
