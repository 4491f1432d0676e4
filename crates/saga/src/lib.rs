//! Order fulfillment saga.
//!
//! Two services cooperate through the broker:
//! 1. The order service stores a pending order and publishes an inventory check.
//! 2. The inventory service reserves stock and publishes `confirmed` or
//!    `cancelled`.
//! 3. The order service moves the order to that terminal status.
//!
//! Stock is either reserved for every line item or for none, so a cancelled
//! order needs no compensation.

pub mod consumer;
pub mod error;
pub mod inventory_side;
pub mod order_side;

pub use consumer::{DeliveryHandler, Handled, run_consumer};
pub use error::{Result, SagaError};
pub use inventory_side::InventorySaga;
pub use order_side::OrderSaga;
