//! Order service side of the saga.
//!
//! Creates orders, asks the inventory service to reserve stock for them, and
//! applies the confirmed/cancelled outcome it sends back.

use async_trait::async_trait;
use broker::message::{decode, encode};
use broker::{
    Broker, Delivery, INVENTORY_CHECK, InventoryCheckMessage, LineItemPayload, ORDER_UPDATE,
    OrderStatusMessage, OutcomeStatus, Topology,
};
use common::{OrderId, UserId};
use orders::{
    NewOrder, Order, OrderLineItem, OrderStatus, OrderStore, OrderStoreError, StatusTransition,
};
use tracing::{debug, info, warn};

use crate::{DeliveryHandler, Handled, Result, SagaError};

fn record_rejected() {
    metrics::counter!("saga_messages_rejected_total", "queue" => ORDER_UPDATE.queue).increment(1);
}

/// Coordinates the order side of the fulfillment saga.
pub struct OrderSaga<S, B> {
    store: S,
    broker: B,
    topology: Topology,
}

impl<S, B> OrderSaga<S, B>
where
    S: OrderStore,
    B: Broker,
{
    /// Creates a coordinator over an order store and a broker.
    pub fn new(store: S, broker: B, topology: Topology) -> Self {
        Self {
            store,
            broker,
            topology,
        }
    }

    /// Returns the order store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the broker.
    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Persists a new pending order and returns its id.
    #[tracing::instrument(skip(self, items), fields(%user_id, items = items.len()))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        items: Vec<OrderLineItem>,
    ) -> Result<OrderId> {
        let order = NewOrder::new(user_id, items).into_order()?;
        self.store.create(&order).await?;

        metrics::counter!("orders_created_total").increment(1);
        info!(order_id = %order.id, total = %order.total(), "order created");
        Ok(order.id)
    }

    /// Asks the inventory service to reserve stock for an order.
    ///
    /// Returns once the broker has confirmed the message.
    #[tracing::instrument(skip(self, items), fields(%order_id))]
    pub async fn publish_inventory_check(
        &self,
        order_id: OrderId,
        items: &[OrderLineItem],
    ) -> Result<()> {
        let message = InventoryCheckMessage {
            order_id,
            order_items: items
                .iter()
                .map(|item| LineItemPayload::new(item.variant_id, item.unit_price, item.quantity))
                .collect(),
        };
        let payload = encode(&message)?;

        self.topology
            .ensure_channel(&self.broker, &INVENTORY_CHECK)
            .await?;
        self.broker
            .publish(
                INVENTORY_CHECK.exchange,
                INVENTORY_CHECK.routing_key,
                &payload,
            )
            .await?;

        metrics::counter!("inventory_check_published_total").increment(1);
        debug!("inventory check published");
        Ok(())
    }

    /// Creates an order, then publishes its inventory check.
    ///
    /// The check is only published after the order is stored. If publishing
    /// fails the order stays pending and the error carries its id.
    pub async fn place_order(
        &self,
        user_id: UserId,
        items: Vec<OrderLineItem>,
    ) -> Result<OrderId> {
        let order_id = self.create_order(user_id, items.clone()).await?;

        match self.publish_inventory_check(order_id, &items).await {
            Ok(()) => Ok(order_id),
            Err(SagaError::Broker(source)) => {
                warn!(
                    %order_id,
                    error = %source,
                    "order left pending, inventory check not published"
                );
                Err(SagaError::PublishFailed { order_id, source })
            }
            Err(e) => Err(e),
        }
    }

    /// Applies an order status update from the inventory service.
    ///
    /// The delivery is acked only after the status write succeeded. Updates
    /// for orders that already left `pending` are acked without effect.
    #[tracing::instrument(skip_all)]
    pub async fn on_order_status_message(&self, delivery: Delivery) -> Result<Handled> {
        let message: OrderStatusMessage = match decode(delivery.data()) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "rejecting undecodable order status message");
                record_rejected();
                return Handled::Rejected.settle(delivery).await;
            }
        };

        let order_id = message.order_id;
        let status = match message.status {
            OutcomeStatus::Confirmed => OrderStatus::Confirmed,
            OutcomeStatus::Cancelled => OrderStatus::Cancelled,
        };

        let (handled, result) = match self.store.transition_status(order_id, status).await {
            Ok(StatusTransition::Applied) => {
                info!(%order_id, %status, "order status updated");
                (Handled::Acked, "applied")
            }
            Ok(StatusTransition::AlreadyTerminal(current)) => {
                debug!(%order_id, %current, requested = %status, "order already terminal");
                (Handled::Acked, "already_terminal")
            }
            Err(OrderStoreError::NotFound(_)) => {
                warn!(%order_id, "rejecting status update for unknown order");
                record_rejected();
                (Handled::Rejected, "unknown_order")
            }
            Err(e) if e.is_transient() => {
                warn!(%order_id, error = %e, "status update failed, requeueing");
                (Handled::Requeued, "store_error")
            }
            Err(e) => {
                warn!(%order_id, error = %e, "rejecting status update");
                record_rejected();
                (Handled::Rejected, "invalid")
            }
        };

        metrics::counter!("order_status_updates_total", "result" => result).increment(1);
        handled.settle(delivery).await
    }

    /// Loads an order.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.store.get(order_id).await?)
    }

    /// Lists a user's orders, newest first.
    pub async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.store.list_for_user(user_id).await?)
    }
}

#[async_trait]
impl<S, B> DeliveryHandler for OrderSaga<S, B>
where
    S: OrderStore,
    B: Broker,
{
    async fn handle(&self, delivery: Delivery) -> Result<Handled> {
        self.on_order_status_message(delivery).await
    }
}
