//! Saga messages and their JSON wire codec.
//!
//! Wire formats:
//! ```text
//! inventory_check: {"order_id": "<uuid>", "order_items": [{"product_id": "<uuid>", "price": 10.0, "quantity": 2}]}
//! order_update:    {"order_id": "<uuid>", "status": "confirmed" | "cancelled"}
//! ```

use common::{Money, OrderId, VariantId};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{BrokerError, DecodeError};

/// A message exchanged between the two saga participants.
pub trait SagaMessage: Serialize + DeserializeOwned {
    /// Checks invariants serde cannot express.
    fn validate(&self) -> Result<(), DecodeError>;

    /// The order this message is about.
    fn order_id(&self) -> OrderId;
}

/// Encodes a saga message as a JSON payload.
pub fn encode<M: SagaMessage>(message: &M) -> Result<Vec<u8>, BrokerError> {
    Ok(serde_json::to_vec(message)?)
}

/// Decodes and validates a saga message from a JSON payload.
pub fn decode<M: SagaMessage>(payload: &[u8]) -> Result<M, DecodeError> {
    let message: M = serde_json::from_slice(payload)?;
    message.validate()?;
    Ok(message)
}

/// One requested line of an inventory check.
///
/// `price` is the unit price the customer saw when ordering. It is carried
/// for information only; the inventory side charges the price stored on the
/// variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemPayload {
    pub product_id: VariantId,
    pub price: f64,
    pub quantity: u32,
}

impl LineItemPayload {
    /// Creates a payload line from a typed price.
    pub fn new(product_id: VariantId, price: Money, quantity: u32) -> Self {
        Self {
            product_id,
            price: price.as_decimal(),
            quantity,
        }
    }
}

/// Request from the order service to reserve stock for an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryCheckMessage {
    pub order_id: OrderId,
    pub order_items: Vec<LineItemPayload>,
}

impl SagaMessage for InventoryCheckMessage {
    fn validate(&self) -> Result<(), DecodeError> {
        if self.order_items.is_empty() {
            return Err(DecodeError::NoLineItems);
        }
        for (index, item) in self.order_items.iter().enumerate() {
            if item.quantity == 0 {
                return Err(DecodeError::InvalidQuantity {
                    index,
                    quantity: item.quantity,
                });
            }
            if !item.price.is_finite() || item.price <= 0.0 {
                return Err(DecodeError::InvalidPrice {
                    index,
                    price: item.price,
                });
            }
        }
        Ok(())
    }

    fn order_id(&self) -> OrderId {
        self.order_id
    }
}

/// Definitive outcome of an inventory check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// Stock was reserved for every line item.
    Confirmed,
    /// The order cannot be fulfilled.
    Cancelled,
}

impl OutcomeStatus {
    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Confirmed => "confirmed",
            OutcomeStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status update from the inventory service back to the order service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusMessage {
    pub order_id: OrderId,
    pub status: OutcomeStatus,
}

impl OrderStatusMessage {
    pub fn confirmed(order_id: OrderId) -> Self {
        Self {
            order_id,
            status: OutcomeStatus::Confirmed,
        }
    }

    pub fn cancelled(order_id: OrderId) -> Self {
        Self {
            order_id,
            status: OutcomeStatus::Cancelled,
        }
    }
}

impl SagaMessage for OrderStatusMessage {
    fn validate(&self) -> Result<(), DecodeError> {
        Ok(())
    }

    fn order_id(&self) -> OrderId {
        self.order_id
    }
}
