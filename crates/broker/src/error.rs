use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to the message broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The connection to the broker could not be established or was lost.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// An exchange, queue or binding could not be declared.
    #[error("Failed to declare {kind} '{name}': {reason}")]
    Declare {
        kind: &'static str,
        name: String,
        reason: String,
    },

    /// A message could not be published or was not confirmed by the broker.
    #[error("Publish to '{exchange}' failed: {reason}")]
    Publish { exchange: String, reason: String },

    /// The publisher confirm did not arrive within the configured timeout.
    #[error("Publish to '{exchange}' timed out after {timeout:?}")]
    PublishTimeout { exchange: String, timeout: Duration },

    /// A consumer could not be started on a queue.
    #[error("Consume from '{queue}' failed: {reason}")]
    Consume { queue: String, reason: String },

    /// A delivery could not be acknowledged or rejected.
    #[error("Acknowledgement failed: {0}")]
    Ack(String),

    /// A message could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A low-level AMQP protocol error.
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

/// Errors produced when a consumed payload is not a valid saga message.
///
/// A decode error is never retried: the delivery is rejected without requeue.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not valid JSON or is missing a required field.
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// An inventory check carried no line items.
    #[error("Message has no line items")]
    NoLineItems,

    /// A line item requested zero units.
    #[error("Line item {index} has invalid quantity {quantity} (must be greater than 0)")]
    InvalidQuantity { index: usize, quantity: u32 },

    /// A line item carried a price that is not a positive finite number.
    #[error("Line item {index} has invalid price {price}")]
    InvalidPrice { index: usize, price: f64 },
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
