//! In-memory variant store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, VariantId};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{Outcome, ProductVariant, Result, StockTransaction, StoreError, VariantStore};

#[derive(Debug, Default)]
struct Table {
    variants: HashMap<VariantId, ProductVariant>,
    reservations: HashMap<OrderId, Outcome>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_on_begin: AtomicBool,
    fail_on_commit: AtomicBool,
}

/// In-memory variant store.
///
/// A transaction holds the lock on the whole table, so transactions run one
/// after another. Writes are staged and applied on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVariantStore {
    table: Arc<Mutex<Table>>,
    faults: Arc<Faults>,
    commits: Arc<AtomicUsize>,
}

impl InMemoryVariantStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `begin` fail with `StoreError::Unavailable` while set.
    pub fn set_fail_on_begin(&self, fail: bool) {
        self.faults.fail_on_begin.store(fail, Ordering::SeqCst);
    }

    /// Makes `commit` fail with `StoreError::Unavailable` while set.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.faults.fail_on_commit.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of committed transactions.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Returns the current stock of a variant.
    pub async fn stock_of(&self, id: VariantId) -> Option<u32> {
        self.table
            .lock()
            .await
            .variants
            .get(&id)
            .map(|v| v.stock_quantity)
    }

    /// Returns the committed outcome recorded for an order.
    pub async fn outcome_of(&self, order_id: OrderId) -> Option<Outcome> {
        self.table.lock().await.reservations.get(&order_id).cloned()
    }
}

#[async_trait]
impl VariantStore for InMemoryVariantStore {
    async fn begin(&self) -> Result<Box<dyn StockTransaction>> {
        if self.faults.fail_on_begin.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "simulated connection failure".to_string(),
            ));
        }

        let table = Arc::clone(&self.table).lock_owned().await;
        Ok(Box::new(MemoryStockTransaction {
            table,
            locked: HashSet::new(),
            staged: HashMap::new(),
            recorded: None,
            faults: Arc::clone(&self.faults),
            commits: Arc::clone(&self.commits),
        }))
    }

    async fn upsert(&self, variant: &ProductVariant) -> Result<()> {
        self.table
            .lock()
            .await
            .variants
            .insert(variant.id, variant.clone());
        Ok(())
    }

    async fn get(&self, id: VariantId) -> Result<Option<ProductVariant>> {
        Ok(self.table.lock().await.variants.get(&id).cloned())
    }
}

struct MemoryStockTransaction {
    table: OwnedMutexGuard<Table>,
    locked: HashSet<VariantId>,
    staged: HashMap<VariantId, u32>,
    recorded: Option<(OrderId, Outcome)>,
    faults: Arc<Faults>,
    commits: Arc<AtomicUsize>,
}

#[async_trait]
impl StockTransaction for MemoryStockTransaction {
    async fn lock_variant(&mut self, id: VariantId) -> Result<Option<ProductVariant>> {
        let Some(mut variant) = self.table.variants.get(&id).cloned() else {
            return Ok(None);
        };
        if let Some(&staged) = self.staged.get(&id) {
            variant.stock_quantity = staged;
        }
        self.locked.insert(id);
        Ok(Some(variant))
    }

    async fn write_stock(&mut self, id: VariantId, stock_quantity: u32) -> Result<()> {
        if !self.locked.contains(&id) {
            return Err(StoreError::NotLocked(id));
        }
        self.staged.insert(id, stock_quantity);
        Ok(())
    }

    async fn recorded_outcome(&mut self, order_id: OrderId) -> Result<Option<Outcome>> {
        if let Some((staged_id, outcome)) = &self.recorded {
            if *staged_id == order_id {
                return Ok(Some(outcome.clone()));
            }
        }
        Ok(self.table.reservations.get(&order_id).cloned())
    }

    async fn record_outcome(&mut self, order_id: OrderId, outcome: &Outcome) -> Result<()> {
        if !outcome.is_definitive() {
            return Err(StoreError::InvalidReservation {
                order_id,
                reason: "transient outcomes are not recorded".to_string(),
            });
        }
        if self.recorded.is_some() || self.table.reservations.contains_key(&order_id) {
            return Err(StoreError::InvalidReservation {
                order_id,
                reason: "an outcome is already recorded".to_string(),
            });
        }
        self.recorded = Some((order_id, outcome.clone()));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.faults.fail_on_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated commit failure".to_string()));
        }

        let now = Utc::now();
        let staged = std::mem::take(&mut self.staged);
        for (id, stock_quantity) in staged {
            if let Some(variant) = self.table.variants.get_mut(&id) {
                variant.stock_quantity = stock_quantity;
                variant.updated_at = now;
            }
        }
        if let Some((order_id, outcome)) = self.recorded.take() {
            self.table.reservations.insert(order_id, outcome);
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
