//! Saga error types.

use broker::BrokerError;
use common::OrderId;
use orders::OrderStoreError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A broker operation failed.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// An order store operation failed.
    #[error("Order store error: {0}")]
    OrderStore(#[from] OrderStoreError),

    /// The order was stored but the inventory check could not be published.
    ///
    /// The order stays `pending`.
    #[error("Inventory check for order {order_id} was not published: {source}")]
    PublishFailed {
        order_id: OrderId,
        #[source]
        source: BrokerError,
    },
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
