//! Topic pub/sub bus behind the routers.
//!
//! The routers only see [`BusConnection`] and [`BusChannel`]. Two backends
//! exist: [`InMemoryBus`], an in-process topic exchange used by tests, and
//! [`amqp::AmqpConnection`] for RabbitMQ (feature `amqp`).

#[cfg(feature = "amqp")]
pub mod amqp;
#[cfg(test)]
pub(crate) mod faulty;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use trainings_core::{BindingPattern, RoutingKey};

pub use memory::InMemoryBus;

/// Capacity of the per-queue delivery buffer.
pub const DELIVERY_BUFFER: usize = 256;

/// One message taken off a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub routing_key: RoutingKey,
    pub body: Vec<u8>,
}

/// Receiving half of a consumed queue. Yields `None` once the queue is gone.
pub type DeliveryReceiver = mpsc::Receiver<Delivery>;

/// Errors surfaced by bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("exchange {0:?} is not declared")]
    UnknownExchange(String),
    #[error("queue {0:?} is not declared")]
    UnknownQueue(String),
    #[error("queue {0:?} already has a consumer")]
    AlreadyConsumed(String),
    #[error("channel is closed")]
    ChannelClosed,
    #[cfg(feature = "amqp")]
    #[error("amqp: {0}")]
    Amqp(#[from] lapin::Error),
}

/// A live connection to the bus.
#[async_trait]
pub trait BusConnection: Send + Sync {
    /// Opens a new channel on this connection.
    async fn create_channel(&self) -> Result<Arc<dyn BusChannel>, BusError>;

    /// Closes the connection and every channel opened on it.
    async fn close(&self) -> Result<(), BusError>;
}

/// A channel: the unit that declares topology, consumes and publishes.
#[async_trait]
pub trait BusChannel: Send + Sync {
    /// Declares a topic exchange. Declaring an existing exchange is a no-op.
    async fn declare_exchange(&self, name: &str) -> Result<(), BusError>;

    /// Declares a queue and returns its name.
    ///
    /// With `None` the broker picks the name and the queue is exclusive to
    /// this channel's connection and deleted when it goes away.
    async fn declare_queue(&self, name: Option<&str>) -> Result<String, BusError>;

    async fn bind_queue(
        &self,
        queue: &str,
        pattern: &BindingPattern,
        exchange: &str,
    ) -> Result<(), BusError>;

    /// Starts an auto-ack consumer on `queue`.
    async fn consume(&self, queue: &str) -> Result<DeliveryReceiver, BusError>;

    /// Publishes `body` without waiting for a broker confirm.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &RoutingKey,
        body: &[u8],
    ) -> Result<(), BusError>;

    async fn close(&self) -> Result<(), BusError>;
}
