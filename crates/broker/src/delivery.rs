//! Consumed messages and their settlement.

use async_trait::async_trait;

use crate::error::Result;

/// Settles a single delivery with the broker it came from.
#[async_trait]
pub trait Acker: Send + Sync {
    /// Acknowledges the delivery; the broker drops the message.
    async fn ack(&self) -> Result<()>;

    /// Negatively acknowledges the delivery.
    ///
    /// With `requeue` the broker redelivers the message later; without it the
    /// message is dead-lettered (or dropped if the queue has no dead-letter
    /// exchange).
    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// A message consumed from a saga queue.
///
/// Every settlement method takes the delivery by value, so a delivery is
/// acknowledged or rejected exactly once.
pub struct Delivery {
    data: Vec<u8>,
    redelivered: bool,
    acker: Box<dyn Acker>,
}

impl Delivery {
    /// Creates a delivery from a raw payload and the handle that settles it.
    pub fn new(data: Vec<u8>, redelivered: bool, acker: impl Acker + 'static) -> Self {
        Self {
            data,
            redelivered,
            acker: Box::new(acker),
        }
    }

    /// Returns the message payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns true if the broker delivered this message before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Marks the message as fully processed.
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    /// Returns the message to the queue for a later retry.
    pub async fn requeue(self) -> Result<()> {
        self.acker.nack(true).await
    }

    /// Rejects the message without requeue.
    pub async fn reject(self) -> Result<()> {
        self.acker.nack(false).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.data.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
