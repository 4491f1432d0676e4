use common::{OrderId, VariantId};
use thiserror::Error;

/// Errors that can occur when reading or writing variant stock.
///
/// Every variant of this error is treated as transient by the reservation
/// engine: nothing was committed and the request may be retried.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred (connectivity, lock timeout, serialization).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The store is temporarily unable to serve requests.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A write targeted a variant this transaction has not locked.
    #[error("Variant {0} is not locked by this transaction")]
    NotLocked(VariantId),

    /// A stored stock value does not fit the stock type.
    #[error("Stock quantity out of range for variant {variant_id}: {value}")]
    StockOutOfRange { variant_id: VariantId, value: i64 },

    /// The reservation total does not fit a money amount.
    #[error("Reservation total overflows at variant {0}")]
    TotalOverflow(VariantId),

    /// A reservation outcome could not be recorded or read back.
    #[error("Invalid reservation record for order {order_id}: {reason}")]
    InvalidReservation { order_id: OrderId, reason: String },
}

/// Result type for variant store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
