//! All-or-nothing stock reservation.
//!
//! A reservation either decrements the stock of every requested variant or
//! leaves every stock level untouched. The algorithm:
//!
//! 1. Merge lines naming the same variant by summing their quantities.
//! 2. Sort the merged lines by variant id so every transaction takes row
//!    locks in the same order.
//! 3. In one transaction, lock and check every variant, then write every
//!    decremented stock level and commit.
//!
//! `reserve_for_order` also records the outcome against the order in that
//! transaction, which makes a redelivered request a no-op.

use std::collections::BTreeMap;
use std::time::Instant;

use common::{Money, OrderId, VariantId};
use tracing::{debug, info, warn};

use crate::{Result, StoreError, VariantStore};

/// One requested variant and quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationLine {
    pub variant_id: VariantId,
    pub quantity: u32,
}

impl ReservationLine {
    pub fn new(variant_id: VariantId, quantity: u32) -> Self {
        Self {
            variant_id,
            quantity,
        }
    }
}

/// Result of a reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every line was reserved. `total` is computed from stored prices.
    Reserved { total: Money },
    /// A variant has less stock than requested. Nothing was written.
    InsufficientStock {
        variant_id: VariantId,
        requested: u64,
        available: u32,
    },
    /// A variant does not exist. Nothing was written.
    NotFound(VariantId),
    /// The store failed. Nothing was committed and the request may be retried.
    TransientFailure(String),
}

impl Outcome {
    /// Returns true for outcomes that will not change on retry.
    pub fn is_definitive(&self) -> bool {
        !matches!(self, Outcome::TransientFailure(_))
    }

    /// Returns true if the stock was reserved.
    pub fn is_reserved(&self) -> bool {
        matches!(self, Outcome::Reserved { .. })
    }

    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Reserved { .. } => "reserved",
            Outcome::InsufficientStock { .. } => "insufficient_stock",
            Outcome::NotFound(_) => "not_found",
            Outcome::TransientFailure(_) => "transient_failure",
        }
    }
}

/// Merges duplicate variants and orders the result by variant id.
fn merge_lines(lines: &[ReservationLine]) -> BTreeMap<VariantId, u64> {
    let mut merged = BTreeMap::new();
    for line in lines {
        *merged.entry(line.variant_id).or_insert(0u64) += u64::from(line.quantity);
    }
    merged
}

/// Reserves stock against a variant store.
#[derive(Debug, Clone)]
pub struct ReservationEngine<S> {
    store: S,
}

impl<S: VariantStore> ReservationEngine<S> {
    /// Creates an engine over a variant store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Atomically reserves every line, or nothing.
    ///
    /// An empty request reserves nothing and succeeds with a zero total
    /// without touching the store.
    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn reserve(&self, lines: &[ReservationLine]) -> Outcome {
        self.run(None, lines).await
    }

    /// Reserves stock for an order at most once.
    ///
    /// The definitive outcome is recorded against `order_id` in the same
    /// transaction as the stock writes. Asking again for the same order
    /// returns the recorded outcome and leaves stock untouched.
    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn reserve_for_order(
        &self,
        order_id: OrderId,
        lines: &[ReservationLine],
    ) -> Outcome {
        self.run(Some(order_id), lines).await
    }

    async fn run(&self, order_id: Option<OrderId>, lines: &[ReservationLine]) -> Outcome {
        let start = Instant::now();
        let merged = merge_lines(lines);

        let (outcome, replayed) = if merged.is_empty() {
            (
                Outcome::Reserved {
                    total: Money::zero(),
                },
                false,
            )
        } else {
            match self.reserve_sorted(order_id, &merged).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "reservation failed");
                    (Outcome::TransientFailure(e.to_string()), false)
                }
            }
        };

        if replayed {
            metrics::counter!("inventory_reservations_replayed_total").increment(1);
            info!(outcome = outcome.label(), "replaying recorded reservation outcome");
            return outcome;
        }

        metrics::counter!("inventory_reservations_total", "outcome" => outcome.label())
            .increment(1);
        metrics::histogram!("reservation_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        match &outcome {
            Outcome::Reserved { total } => info!(%total, "stock reserved"),
            other => debug!(outcome = other.label(), "stock not reserved"),
        }
        outcome
    }

    /// Returns the outcome and whether it was replayed from an earlier record.
    async fn reserve_sorted(
        &self,
        order_id: Option<OrderId>,
        lines: &BTreeMap<VariantId, u64>,
    ) -> Result<(Outcome, bool)> {
        let mut tx = self.store.begin().await?;

        if let Some(order_id) = order_id {
            if let Some(recorded) = tx.recorded_outcome(order_id).await? {
                if let Err(e) = tx.rollback().await {
                    warn!(error = %e, "rollback failed");
                }
                return Ok((recorded, true));
            }
        }

        let mut writes = Vec::with_capacity(lines.len());
        let mut total = Money::zero();

        for (&variant_id, &requested) in lines {
            let rejection = match tx.lock_variant(variant_id).await? {
                None => Some(Outcome::NotFound(variant_id)),
                Some(variant) => match u32::try_from(requested)
                    .ok()
                    .filter(|&q| variant.can_fulfill(u64::from(q)))
                {
                    Some(quantity) => {
                        total = variant
                            .price
                            .checked_multiply(quantity)
                            .and_then(|line| total.checked_add(line))
                            .ok_or(StoreError::TotalOverflow(variant_id))?;
                        writes.push((variant_id, variant.stock_quantity - quantity));
                        None
                    }
                    None => Some(Outcome::InsufficientStock {
                        variant_id,
                        requested,
                        available: variant.stock_quantity,
                    }),
                },
            };

            if let Some(outcome) = rejection {
                match order_id {
                    // Rejections are recorded as well; no stock was written.
                    Some(order_id) => {
                        tx.record_outcome(order_id, &outcome).await?;
                        tx.commit().await?;
                    }
                    None => {
                        // Nothing was written yet, a failed rollback still leaves stock intact.
                        if let Err(e) = tx.rollback().await {
                            warn!(error = %e, "rollback failed");
                        }
                    }
                }
                return Ok((outcome, false));
            }
        }

        for (variant_id, stock_quantity) in writes {
            tx.write_stock(variant_id, stock_quantity).await?;
        }
        let outcome = Outcome::Reserved { total };
        if let Some(order_id) = order_id {
            tx.record_outcome(order_id, &outcome).await?;
        }
        tx.commit().await?;

        Ok((outcome, false))
    }
}
