//! Exchanges, queues and bindings used by the saga.
//!
//! Each saga channel is a direct exchange bound to one work queue with a
//! fixed routing key, plus a dead-letter exchange and queue that receive
//! rejected messages:
//! ```text
//! inventory_check ──inventory_check_key──► inventory_check
//!                                               │ reject / delivery limit
//! inventory_check.dlx ──inventory_check_key──► inventory_check.dead
//! ```

use crate::{Broker, Result};

/// One logical saga channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SagaChannel {
    pub exchange: &'static str,
    pub queue: &'static str,
    pub routing_key: &'static str,
}

impl SagaChannel {
    /// Name of the exchange rejected messages are routed to.
    pub fn dead_letter_exchange(&self) -> String {
        format!("{}.dlx", self.exchange)
    }

    /// Name of the queue holding rejected messages.
    pub fn dead_letter_queue(&self) -> String {
        format!("{}.dead", self.queue)
    }
}

/// Inventory check requests from the order service to the inventory service.
pub const INVENTORY_CHECK: SagaChannel = SagaChannel {
    exchange: "inventory_check",
    queue: "inventory_check",
    routing_key: "inventory_check_key",
};

/// Order status updates from the inventory service to the order service.
pub const ORDER_UPDATE: SagaChannel = SagaChannel {
    exchange: "order_update",
    queue: "order_update",
    routing_key: "order_update_key",
};

/// Where a queue sends messages it drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub exchange: String,
    pub routing_key: String,
}

/// Declaration parameters of a durable queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub dead_letter: Option<DeadLetter>,
    /// Number of returns to the queue after which the broker dead-letters a
    /// message instead of redelivering it. Requires a quorum queue on RabbitMQ.
    pub delivery_limit: Option<u32>,
}

impl QueueSpec {
    /// A plain durable queue without dead-lettering.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dead_letter: None,
            delivery_limit: None,
        }
    }
}

/// Declares the saga topology.
///
/// Every service must use the same `Topology` settings: RabbitMQ refuses to
/// redeclare a queue with different arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    delivery_limit: Option<u32>,
}

impl Topology {
    /// Default number of redeliveries before a message is dead-lettered.
    pub const DEFAULT_DELIVERY_LIMIT: u32 = 5;

    /// Creates a topology with the default delivery limit.
    pub fn new() -> Self {
        Self {
            delivery_limit: Some(Self::DEFAULT_DELIVERY_LIMIT),
        }
    }

    /// Sets the delivery limit; `None` requeues transient failures forever.
    pub fn with_delivery_limit(mut self, limit: Option<u32>) -> Self {
        self.delivery_limit = limit;
        self
    }

    /// Returns the configured delivery limit.
    pub fn delivery_limit(&self) -> Option<u32> {
        self.delivery_limit
    }

    /// Returns the work queue declaration for a channel.
    pub fn work_queue(&self, channel: &SagaChannel) -> QueueSpec {
        QueueSpec {
            name: channel.queue.to_string(),
            dead_letter: Some(DeadLetter {
                exchange: channel.dead_letter_exchange(),
                routing_key: channel.routing_key.to_string(),
            }),
            delivery_limit: self.delivery_limit,
        }
    }

    /// Declares one channel's exchanges, queues and bindings.
    ///
    /// Safe to call on every startup and before every publish.
    #[tracing::instrument(skip(self, broker), fields(exchange = channel.exchange))]
    pub async fn ensure_channel<B: Broker + ?Sized>(
        &self,
        broker: &B,
        channel: &SagaChannel,
    ) -> Result<()> {
        let dlx = channel.dead_letter_exchange();
        let dlq = channel.dead_letter_queue();

        broker.declare_exchange(&dlx).await?;
        broker.declare_queue(&QueueSpec::durable(&dlq)).await?;
        broker.bind_queue(&dlq, &dlx, channel.routing_key).await?;

        broker.declare_exchange(channel.exchange).await?;
        broker.declare_queue(&self.work_queue(channel)).await?;
        broker
            .bind_queue(channel.queue, channel.exchange, channel.routing_key)
            .await?;

        tracing::debug!(queue = channel.queue, "saga channel declared");
        Ok(())
    }

    /// Declares every saga channel.
    pub async fn ensure_topology<B: Broker + ?Sized>(&self, broker: &B) -> Result<()> {
        for channel in [INVENTORY_CHECK, ORDER_UPDATE] {
            self.ensure_channel(broker, &channel).await?;
        }
        Ok(())
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}
