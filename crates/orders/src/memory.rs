//! In-memory order store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, UserId};
use tokio::sync::RwLock;

use crate::{Order, OrderStatus, OrderStore, OrderStoreError, Result, StatusTransition};

/// In-memory order store for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    fail_on_transition: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `transition_status` fail with `Unavailable` while set.
    pub fn set_fail_on_transition(&self, fail: bool) {
        self.fail_on_transition.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of stored orders.
    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Returns true if no orders are stored.
    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(OrderStoreError::InvalidOrder(format!(
                "order {} already exists",
                order.id
            )));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn transition_status(
        &self,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<StatusTransition> {
        if self.fail_on_transition.load(Ordering::SeqCst) {
            return Err(OrderStoreError::Unavailable(
                "simulated database outage".to_string(),
            ));
        }
        if !status.is_terminal() {
            return Err(OrderStoreError::InvalidTransition {
                order_id: id,
                from: OrderStatus::Pending,
                to: status,
            });
        }

        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or(OrderStoreError::NotFound(id))?;
        if !order.status.can_transition_to(status) {
            return Ok(StatusTransition::AlreadyTerminal(order.status));
        }

        order.status = status;
        order.updated_at = Utc::now();
        Ok(StatusTransition::Applied)
    }
}
