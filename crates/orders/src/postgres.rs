//! PostgreSQL order store.

use std::collections::HashMap;

use async_trait::async_trait;
use common::{Money, OrderId, UserId, VariantId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Order, OrderLineItem, OrderStatus, OrderStore, OrderStoreError, Result, StatusTransition,
};

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the order database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations/orders")
            .run(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_order(row: &PgRow) -> Result<Order> {
        let id = OrderId::from_uuid(row.try_get::<Uuid, _>("id")?);
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<OrderStatus>()
            .map_err(|reason| OrderStoreError::Corrupt { order_id: id, reason })?;
        let quantity: i64 = row.try_get("quantity")?;
        let quantity = u64::try_from(quantity).map_err(|_| OrderStoreError::Corrupt {
            order_id: id,
            reason: format!("negative quantity {quantity}"),
        })?;

        Ok(Order {
            id,
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            quantity,
            items: Vec::new(),
            status,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_item(order_id: OrderId, row: &PgRow) -> Result<OrderLineItem> {
        let quantity: i32 = row.try_get("quantity")?;
        let quantity = u32::try_from(quantity).map_err(|_| OrderStoreError::Corrupt {
            order_id,
            reason: format!("negative line item quantity {quantity}"),
        })?;

        Ok(OrderLineItem {
            variant_id: VariantId::from_uuid(row.try_get::<Uuid, _>("variant_id")?),
            unit_price: Money::from_cents(row.try_get("price_cents")?),
            quantity,
        })
    }

    /// Loads the line items of the given orders, keyed by order id.
    async fn load_items(&self, ids: &[Uuid]) -> Result<HashMap<OrderId, Vec<OrderLineItem>>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, variant_id, price_cents, quantity
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position ASC
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<OrderId, Vec<OrderLineItem>> = HashMap::new();
        for row in &rows {
            let order_id = OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?);
            items
                .entry(order_id)
                .or_default()
                .push(Self::row_to_item(order_id, row)?);
        }
        Ok(items)
    }

    async fn current_status(&self, id: OrderId) -> Result<Option<OrderStatus>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        status
            .map(|s| {
                s.parse::<OrderStatus>()
                    .map_err(|reason| OrderStoreError::Corrupt {
                        order_id: id,
                        reason,
                    })
            })
            .transpose()
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn create(&self, order: &Order) -> Result<()> {
        let quantity = i64::try_from(order.quantity)
            .map_err(|_| OrderStoreError::InvalidOrder("quantity out of range".to_string()))?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, total_cents, quantity, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.total().cents())
        .bind(quantity)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            let quantity = i32::try_from(item.quantity).map_err(|_| {
                OrderStoreError::InvalidOrder(format!("line item {position}: quantity out of range"))
            })?;

            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, position, variant_id, price_cents, quantity)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(position as i32)
            .bind(item.variant_id.as_uuid())
            .bind(item.unit_price.cents())
            .bind(quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, quantity, status, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut order = Self::row_to_order(&row)?;
        order.items = self
            .load_items(&[id.as_uuid()])
            .await?
            .remove(&id)
            .unwrap_or_default();
        Ok(Some(order))
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, quantity, status, created_at, updated_at
            FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let mut orders = rows
            .iter()
            .map(Self::row_to_order)
            .collect::<Result<Vec<_>>>()?;
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id.as_uuid()).collect();
        let mut items = self.load_items(&ids).await?;
        for order in &mut orders {
            order.items = items.remove(&order.id).unwrap_or_default();
        }
        Ok(orders)
    }

    async fn transition_status(
        &self,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<StatusTransition> {
        if !status.is_terminal() {
            return Err(OrderStoreError::InvalidTransition {
                order_id: id,
                from: OrderStatus::Pending,
                to: status,
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(StatusTransition::Applied);
        }

        match self.current_status(id).await? {
            Some(current) => Ok(StatusTransition::AlreadyTerminal(current)),
            None => Err(OrderStoreError::NotFound(id)),
        }
    }
}
