//! Orders and line items.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, UserId, VariantId};

use crate::{OrderStatus, OrderStoreError, Result};

/// One requested variant within an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLineItem {
    pub variant_id: VariantId,
    /// Unit price quoted when the order was placed.
    pub unit_price: Money,
    pub quantity: u32,
}

impl OrderLineItem {
    pub fn new(variant_id: VariantId, unit_price: Money, quantity: u32) -> Self {
        Self {
            variant_id,
            unit_price,
            quantity,
        }
    }

    /// Returns unit price times quantity.
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A request to place an order, validated by `into_order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub items: Vec<OrderLineItem>,
}

impl NewOrder {
    pub fn new(user_id: UserId, items: Vec<OrderLineItem>) -> Self {
        Self { user_id, items }
    }

    /// Validates the request and builds a pending order with a fresh id.
    pub fn into_order(self) -> Result<Order> {
        if self.items.is_empty() {
            return Err(OrderStoreError::InvalidOrder(
                "order must contain at least one line item".to_string(),
            ));
        }
        let mut total = Money::zero();
        for (index, item) in self.items.iter().enumerate() {
            if item.quantity == 0 {
                return Err(OrderStoreError::InvalidOrder(format!(
                    "line item {index}: quantity must be positive"
                )));
            }
            if !item.unit_price.is_positive() {
                return Err(OrderStoreError::InvalidOrder(format!(
                    "line item {index}: price must be positive"
                )));
            }
            total = item
                .unit_price
                .checked_multiply(item.quantity)
                .and_then(|line| total.checked_add(line))
                .ok_or_else(|| {
                    OrderStoreError::InvalidOrder("order total is too large".to_string())
                })?;
        }

        let now = Utc::now();
        Ok(Order {
            id: OrderId::new(),
            user_id: self.user_id,
            quantity: self.items.iter().map(|i| u64::from(i.quantity)).sum(),
            items: self.items,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }
}

/// An order owned by the order service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    /// Sum of the line item quantities.
    pub quantity: u64,
    pub items: Vec<OrderLineItem>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Returns the order total at the quoted prices.
    pub fn total(&self) -> Money {
        self.items.iter().map(OrderLineItem::line_total).sum()
    }
}
