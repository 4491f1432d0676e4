use common::OrderId;
use thiserror::Error;

use crate::OrderStatus;

/// Errors that can occur when creating, reading or updating orders.
#[derive(Debug, Error)]
pub enum OrderStoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The order does not exist.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The order request is invalid.
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// The requested status change is not allowed.
    #[error("Invalid status transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// A stored row could not be mapped back to an order.
    #[error("Corrupt order {order_id}: {reason}")]
    Corrupt { order_id: OrderId, reason: String },

    /// The store is temporarily unable to serve requests.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// SQLSTATE codes worth retrying: serialization failure, deadlock, lock
/// timeout, admin shutdown and too many connections.
const TRANSIENT_SQLSTATES: [&str; 5] = ["40001", "40P01", "55P03", "57P01", "53300"];

impl OrderStoreError {
    /// Returns true if retrying the operation later may succeed.
    ///
    /// Only connectivity, pool and lock contention failures qualify. Decode
    /// and schema errors will fail the same way on every attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            OrderStoreError::Unavailable(_) => true,
            OrderStoreError::Database(e) => is_transient_sqlx(e),
            _ => false,
        }
    }
}

fn is_transient_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| {
            // Class 08 is connection exceptions.
            code.starts_with("08") || TRANSIENT_SQLSTATES.contains(&code.as_ref())
        }),
        _ => false,
    }
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, OrderStoreError>;
