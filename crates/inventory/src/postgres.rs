//! PostgreSQL variant store.

use std::time::Duration;

use async_trait::async_trait;
use common::{Money, OrderId, VariantId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{Outcome, ProductVariant, Result, StockTransaction, StoreError, VariantStore};

/// PostgreSQL-backed variant store.
///
/// `lock_variant` takes a row lock (`SELECT ... FOR UPDATE`), so concurrent
/// reservations touching the same variant are serialized by the database.
#[derive(Clone)]
pub struct PostgresVariantStore {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PostgresVariantStore {
    /// Creates a new PostgreSQL variant store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Bounds how long a transaction waits for a row lock.
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the inventory database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations/inventory")
            .run(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_variant(row: PgRow) -> Result<ProductVariant> {
        let id = VariantId::from_uuid(row.try_get::<Uuid, _>("id")?);
        let stock: i32 = row.try_get("stock_quantity")?;
        let stock_quantity = u32::try_from(stock).map_err(|_| StoreError::StockOutOfRange {
            variant_id: id,
            value: i64::from(stock),
        })?;

        Ok(ProductVariant {
            id,
            sku: row.try_get("sku")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            stock_quantity,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Maps a `reservations` row back to the outcome it records.
fn row_to_outcome(order_id: OrderId, row: PgRow) -> Result<Outcome> {
    let invalid = |reason: &str| StoreError::InvalidReservation {
        order_id,
        reason: reason.to_string(),
    };
    let outcome: String = row.try_get("outcome")?;
    let total: Option<i64> = row.try_get("total_cents")?;
    let variant_id = row
        .try_get::<Option<Uuid>, _>("variant_id")?
        .map(VariantId::from_uuid);
    let requested: Option<i64> = row.try_get("requested")?;
    let available: Option<i64> = row.try_get("available")?;

    match outcome.as_str() {
        "reserved" => Ok(Outcome::Reserved {
            total: Money::from_cents(total.ok_or_else(|| invalid("missing total"))?),
        }),
        "insufficient_stock" => Ok(Outcome::InsufficientStock {
            variant_id: variant_id.ok_or_else(|| invalid("missing variant"))?,
            requested: requested
                .and_then(|q| u64::try_from(q).ok())
                .ok_or_else(|| invalid("invalid requested quantity"))?,
            available: available
                .and_then(|q| u32::try_from(q).ok())
                .ok_or_else(|| invalid("invalid available quantity"))?,
        }),
        "not_found" => Ok(Outcome::NotFound(
            variant_id.ok_or_else(|| invalid("missing variant"))?,
        )),
        other => Err(invalid(&format!("unknown outcome '{other}'"))),
    }
}

fn stock_column(id: VariantId, stock_quantity: u32) -> Result<i32> {
    i32::try_from(stock_quantity).map_err(|_| StoreError::StockOutOfRange {
        variant_id: id,
        value: i64::from(stock_quantity),
    })
}

#[async_trait]
impl VariantStore for PostgresVariantStore {
    async fn begin(&self) -> Result<Box<dyn StockTransaction>> {
        let mut tx = self.pool.begin().await?;

        if let Some(timeout) = self.lock_timeout {
            // SET does not accept bind parameters.
            sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis()))
                .execute(&mut *tx)
                .await?;
        }

        Ok(Box::new(PgStockTransaction { tx }))
    }

    async fn upsert(&self, variant: &ProductVariant) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO product_variants (id, sku, price_cents, stock_quantity, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET sku = EXCLUDED.sku,
                price_cents = EXCLUDED.price_cents,
                stock_quantity = EXCLUDED.stock_quantity,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(variant.id.as_uuid())
        .bind(&variant.sku)
        .bind(variant.price.cents())
        .bind(stock_column(variant.id, variant.stock_quantity)?)
        .bind(variant.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: VariantId) -> Result<Option<ProductVariant>> {
        let row = sqlx::query(
            r#"
            SELECT id, sku, price_cents, stock_quantity, updated_at
            FROM product_variants
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_variant).transpose()
    }
}

struct PgStockTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StockTransaction for PgStockTransaction {
    async fn lock_variant(&mut self, id: VariantId) -> Result<Option<ProductVariant>> {
        let row = sqlx::query(
            r#"
            SELECT id, sku, price_cents, stock_quantity, updated_at
            FROM product_variants
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(PostgresVariantStore::row_to_variant).transpose()
    }

    async fn write_stock(&mut self, id: VariantId, stock_quantity: u32) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE product_variants
            SET stock_quantity = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(stock_column(id, stock_quantity)?)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotLocked(id));
        }
        Ok(())
    }

    async fn recorded_outcome(&mut self, order_id: OrderId) -> Result<Option<Outcome>> {
        let row = sqlx::query(
            r#"
            SELECT outcome, total_cents, variant_id, requested, available
            FROM reservations
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(|row| row_to_outcome(order_id, row)).transpose()
    }

    async fn record_outcome(&mut self, order_id: OrderId, outcome: &Outcome) -> Result<()> {
        let (total, variant_id, requested, available) = match outcome {
            Outcome::Reserved { total } => (Some(total.cents()), None, None, None),
            Outcome::InsufficientStock {
                variant_id,
                requested,
                available,
            } => (
                None,
                Some(variant_id.as_uuid()),
                Some(i64::try_from(*requested).unwrap_or(i64::MAX)),
                Some(i64::from(*available)),
            ),
            Outcome::NotFound(variant_id) => (None, Some(variant_id.as_uuid()), None, None),
            Outcome::TransientFailure(_) => {
                return Err(StoreError::InvalidReservation {
                    order_id,
                    reason: "transient outcomes are not recorded".to_string(),
                });
            }
        };

        // A concurrent duplicate hits the primary key and rolls back.
        sqlx::query(
            r#"
            INSERT INTO reservations
                (order_id, outcome, total_cents, variant_id, requested, available)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(outcome.label())
        .bind(total)
        .bind(variant_id)
        .bind(requested)
        .bind(available)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
