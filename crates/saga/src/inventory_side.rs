//! Inventory service side of the saga.
//!
//! Reserves stock for each inventory check and reports the outcome to the
//! order service.

use async_trait::async_trait;
use broker::message::{decode, encode};
use broker::{
    Broker, Delivery, INVENTORY_CHECK, InventoryCheckMessage, ORDER_UPDATE, OrderStatusMessage,
    Topology,
};
use common::OrderId;
use inventory::{Outcome, ReservationEngine, ReservationLine, VariantStore};
use tracing::{error, info, warn};

use crate::{DeliveryHandler, Handled, Result};

/// Coordinates the inventory side of the fulfillment saga.
pub struct InventorySaga<V, B> {
    engine: ReservationEngine<V>,
    broker: B,
    topology: Topology,
}

impl<V, B> InventorySaga<V, B>
where
    V: VariantStore,
    B: Broker,
{
    /// Creates a coordinator over a variant store and a broker.
    pub fn new(store: V, broker: B, topology: Topology) -> Self {
        Self {
            engine: ReservationEngine::new(store),
            broker,
            topology,
        }
    }

    /// Returns the reservation engine.
    pub fn engine(&self) -> &ReservationEngine<V> {
        &self.engine
    }

    /// Reserves stock for an inventory check and publishes the outcome.
    ///
    /// Definitive outcomes are acked before the status update is published.
    /// A store failure requeues the delivery and publishes nothing. A
    /// redelivered check for an order that was already handled publishes the
    /// recorded outcome again and leaves stock untouched.
    #[tracing::instrument(skip_all)]
    pub async fn on_inventory_check_message(&self, delivery: Delivery) -> Result<Handled> {
        let message: InventoryCheckMessage = match decode(delivery.data()) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "rejecting undecodable inventory check");
                metrics::counter!(
                    "saga_messages_rejected_total",
                    "queue" => INVENTORY_CHECK.queue
                )
                .increment(1);
                return Handled::Rejected.settle(delivery).await;
            }
        };

        let order_id = message.order_id;
        let lines: Vec<ReservationLine> = message
            .order_items
            .iter()
            .map(|item| ReservationLine::new(item.product_id, item.quantity))
            .collect();

        let update = match self.engine.reserve_for_order(order_id, &lines).await {
            Outcome::Reserved { total } => {
                info!(%order_id, %total, "order confirmed");
                OrderStatusMessage::confirmed(order_id)
            }
            Outcome::InsufficientStock {
                variant_id,
                requested,
                available,
            } => {
                info!(
                    %order_id,
                    %variant_id,
                    requested,
                    available,
                    "order cancelled, insufficient stock"
                );
                OrderStatusMessage::cancelled(order_id)
            }
            Outcome::NotFound(variant_id) => {
                info!(%order_id, %variant_id, "order cancelled, unknown variant");
                OrderStatusMessage::cancelled(order_id)
            }
            Outcome::TransientFailure(cause) => {
                warn!(%order_id, %cause, "reservation failed, requeueing");
                return Handled::Requeued.settle(delivery).await;
            }
        };

        // The outcome is recorded, so a redelivery after a failed ack
        // republishes the same status without reserving again.
        let settled = Handled::Acked.settle(delivery).await;
        self.publish_outcome(order_id, &update).await;
        settled
    }

    async fn publish_outcome(&self, order_id: OrderId, update: &OrderStatusMessage) {
        let published = async {
            let payload = encode(update)?;
            self.topology
                .ensure_channel(&self.broker, &ORDER_UPDATE)
                .await?;
            self.broker
                .publish(ORDER_UPDATE.exchange, ORDER_UPDATE.routing_key, &payload)
                .await
        }
        .await;

        if let Err(e) = published {
            // The reservation is committed; the order stays pending.
            error!(
                %order_id,
                status = %update.status,
                error = %e,
                "failed to publish order status"
            );
            metrics::counter!("saga_outcome_publish_failures_total").increment(1);
        }
    }
}

#[async_trait]
impl<V, B> DeliveryHandler for InventorySaga<V, B>
where
    V: VariantStore,
    B: Broker,
{
    async fn handle(&self, delivery: Delivery) -> Result<Handled> {
        self.on_inventory_check_message(delivery).await
    }
}
