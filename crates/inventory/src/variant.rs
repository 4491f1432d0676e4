//! Product variants.

use chrono::{DateTime, Utc};
use common::{Money, VariantId};

/// A sellable variant of a product with its own price and stock level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductVariant {
    pub id: VariantId,
    pub sku: String,
    /// Authoritative unit price. Reservation totals are computed from this.
    pub price: Money,
    pub stock_quantity: u32,
    pub updated_at: DateTime<Utc>,
}

impl ProductVariant {
    /// Creates a variant with a fresh id.
    pub fn new(sku: impl Into<String>, price: Money, stock_quantity: u32) -> Self {
        Self::with_id(VariantId::new(), sku, price, stock_quantity)
    }

    /// Creates a variant with a known id.
    pub fn with_id(
        id: VariantId,
        sku: impl Into<String>,
        price: Money,
        stock_quantity: u32,
    ) -> Self {
        Self {
            id,
            sku: sku.into(),
            price,
            stock_quantity,
            updated_at: Utc::now(),
        }
    }

    /// Returns true if `quantity` units can be taken from stock.
    pub fn can_fulfill(&self, quantity: u64) -> bool {
        quantity <= u64::from(self.stock_quantity)
    }
}
