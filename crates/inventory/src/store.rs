//! Transactional access to variant stock.

use async_trait::async_trait;
use common::{OrderId, VariantId};

use crate::{Outcome, ProductVariant, Result};

/// Storage for product variants.
///
/// Implementations:
/// - `PostgresVariantStore`: row locks in PostgreSQL
/// - `InMemoryVariantStore`: a single table lock, for tests and local runs
#[async_trait]
pub trait VariantStore: Send + Sync {
    /// Starts a transaction over the stock table.
    async fn begin(&self) -> Result<Box<dyn StockTransaction>>;

    /// Inserts a variant or replaces the stored one with the same id.
    async fn upsert(&self, variant: &ProductVariant) -> Result<()>;

    /// Reads a variant without locking it.
    async fn get(&self, id: VariantId) -> Result<Option<ProductVariant>>;
}

/// An open stock transaction.
///
/// Rows locked with `lock_variant` stay locked until the transaction ends.
/// Dropping a transaction without committing it rolls it back.
#[async_trait]
pub trait StockTransaction: Send {
    /// Reads a variant and locks it against concurrent writers.
    async fn lock_variant(&mut self, id: VariantId) -> Result<Option<ProductVariant>>;

    /// Sets the stock of a variant locked by this transaction.
    async fn write_stock(&mut self, id: VariantId, stock_quantity: u32) -> Result<()>;

    /// Reads the outcome recorded for an order, if any.
    async fn recorded_outcome(&mut self, order_id: OrderId) -> Result<Option<Outcome>>;

    /// Records the definitive outcome of reserving stock for an order.
    ///
    /// At most one outcome is recorded per order. Transient failures are
    /// never recorded.
    async fn record_outcome(&mut self, order_id: OrderId, outcome: &Outcome) -> Result<()>;

    /// Makes every write of this transaction visible.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards every write of this transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
