use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{Delivery, QueueSpec, Result};

/// A stream of deliveries from one queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery>> + Send>>;

/// Transport primitives the saga needs from a message broker.
///
/// Implementations:
/// - `AmqpBroker`: RabbitMQ via AMQP 0-9-1
/// - `InMemoryBroker`: in-process broker for tests
///
/// Every declaration is idempotent: declaring an existing exchange, queue or
/// binding with the same arguments succeeds without changing it.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declares a durable, non-auto-deleted direct exchange.
    async fn declare_exchange(&self, exchange: &str) -> Result<()>;

    /// Declares a durable, non-exclusive queue.
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()>;

    /// Binds a queue to an exchange with a routing key.
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Publishes a persistent message and waits for the broker to confirm it.
    ///
    /// Fails if the message could not be routed to any queue.
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()>;

    /// Starts a manual-ack consumer with one unacknowledged delivery in flight.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;
}
