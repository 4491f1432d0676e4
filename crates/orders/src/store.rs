//! Order persistence.

use async_trait::async_trait;
use common::{OrderId, UserId};

use crate::{Order, OrderStatus, Result};

/// Result of a conditional status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    /// The order was pending and now has the requested status.
    Applied,
    /// The order had already left `pending`; nothing was written.
    AlreadyTerminal(OrderStatus),
}

/// Storage for orders.
///
/// Implementations:
/// - `PostgresOrderStore`: orders and line items in PostgreSQL
/// - `InMemoryOrderStore`: for tests and local runs
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists an order and its line items atomically.
    async fn create(&self, order: &Order) -> Result<()>;

    /// Loads an order with its line items.
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists a user's orders, newest first.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Moves a pending order to a terminal status.
    ///
    /// The write only applies while the order is still `pending`, so
    /// concurrent or repeated updates cannot move an order twice. Fails with
    /// `NotFound` for an unknown order and `InvalidTransition` when `status`
    /// is not terminal.
    async fn transition_status(&self, id: OrderId, status: OrderStatus)
    -> Result<StatusTransition>;
}
