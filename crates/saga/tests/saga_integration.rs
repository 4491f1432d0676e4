//! Integration tests for the order fulfillment saga.

use std::sync::Arc;
use std::time::Duration;

use broker::message::{decode, encode};
use broker::{
    Broker, INVENTORY_CHECK, InMemoryBroker, InventoryCheckMessage, LineItemPayload,
    ORDER_UPDATE, OrderStatusMessage, OutcomeStatus, Topology,
};
use common::{Money, OrderId, UserId, VariantId};
use inventory::{InMemoryVariantStore, Outcome, ProductVariant, VariantStore};
use orders::{InMemoryOrderStore, OrderLineItem, OrderStatus};
use saga::{Handled, InventorySaga, OrderSaga, SagaError, run_consumer};
use tokio::sync::watch;

type TestOrderSaga = OrderSaga<InMemoryOrderStore, InMemoryBroker>;
type TestInventorySaga = InventorySaga<InMemoryVariantStore, InMemoryBroker>;

struct TestHarness {
    broker: InMemoryBroker,
    orders: InMemoryOrderStore,
    variants: InMemoryVariantStore,
    order_saga: TestOrderSaga,
    inventory_saga: TestInventorySaga,
}

impl TestHarness {
    fn new() -> Self {
        let broker = InMemoryBroker::new();
        let orders = InMemoryOrderStore::new();
        let variants = InMemoryVariantStore::new();

        let order_saga = OrderSaga::new(orders.clone(), broker.clone(), Topology::new());
        let inventory_saga =
            InventorySaga::new(variants.clone(), broker.clone(), Topology::new());

        Self {
            broker,
            orders,
            variants,
            order_saga,
            inventory_saga,
        }
    }

    async fn seed_variant(&self, price_cents: i64, stock: u32) -> VariantId {
        let variant = ProductVariant::new(
            format!("SKU-{}", VariantId::new()),
            Money::from_cents(price_cents),
            stock,
        );
        self.variants.upsert(&variant).await.unwrap();
        variant.id
    }

    async fn stock_of(&self, id: VariantId) -> u32 {
        self.variants.stock_of(id).await.unwrap()
    }

    async fn status_of(&self, id: OrderId) -> OrderStatus {
        self.order_saga
            .get_order(id)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    /// Delivers the next inventory check to the inventory side.
    async fn process_inventory_check(&self) -> Handled {
        let delivery = self
            .broker
            .try_next(INVENTORY_CHECK.queue)
            .await
            .expect("inventory check queued");
        self.inventory_saga
            .on_inventory_check_message(delivery)
            .await
            .unwrap()
    }

    /// Delivers the next status update to the order side.
    async fn process_order_update(&self) -> Handled {
        let delivery = self
            .broker
            .try_next(ORDER_UPDATE.queue)
            .await
            .expect("order update queued");
        self.order_saga
            .on_order_status_message(delivery)
            .await
            .unwrap()
    }

    async fn publish_raw(&self, channel: &broker::SagaChannel, payload: &[u8]) {
        Topology::new()
            .ensure_channel(&self.broker, channel)
            .await
            .unwrap();
        self.broker
            .publish(channel.exchange, channel.routing_key, payload)
            .await
            .unwrap();
    }
}

fn line(variant_id: VariantId, price_cents: i64, quantity: u32) -> OrderLineItem {
    OrderLineItem::new(variant_id, Money::from_cents(price_cents), quantity)
}

#[tokio::test]
async fn test_end_to_end_confirm() {
    let h = TestHarness::new();
    let a = h.seed_variant(1000, 5).await;
    let b = h.seed_variant(500, 3).await;

    let order_id = h
        .order_saga
        .place_order(UserId::new(), vec![line(a, 1000, 2), line(b, 500, 1)])
        .await
        .unwrap();
    assert_eq!(h.status_of(order_id).await, OrderStatus::Pending);

    assert_eq!(h.process_inventory_check().await, Handled::Acked);
    assert_eq!(h.stock_of(a).await, 3);
    assert_eq!(h.stock_of(b).await, 2);
    assert_eq!(
        h.variants.outcome_of(order_id).await,
        Some(Outcome::Reserved {
            total: Money::from_cents(2500)
        })
    );

    let update: OrderStatusMessage =
        decode(&h.broker.messages(ORDER_UPDATE.queue).await[0]).unwrap();
    assert_eq!(update, OrderStatusMessage::confirmed(order_id));

    assert_eq!(h.process_order_update().await, Handled::Acked);
    assert_eq!(h.status_of(order_id).await, OrderStatus::Confirmed);
    assert_eq!(h.broker.unacked_len(INVENTORY_CHECK.queue).await, 0);
    assert_eq!(h.broker.unacked_len(ORDER_UPDATE.queue).await, 0);
}

#[tokio::test]
async fn test_redelivered_inventory_check_reserves_once() {
    let h = TestHarness::new();
    let a = h.seed_variant(1000, 5).await;
    let order_id = h
        .order_saga
        .place_order(UserId::new(), vec![line(a, 1000, 2)])
        .await
        .unwrap();

    // The broker delivers the same check again, as after a lost ack.
    let payload = h.broker.messages(INVENTORY_CHECK.queue).await[0].clone();
    assert_eq!(h.process_inventory_check().await, Handled::Acked);
    h.publish_raw(&INVENTORY_CHECK, &payload).await;
    assert_eq!(h.process_inventory_check().await, Handled::Acked);

    assert_eq!(h.stock_of(a).await, 3);
    let updates = h.broker.messages(ORDER_UPDATE.queue).await;
    assert_eq!(updates.len(), 2);
    for raw in &updates {
        let update: OrderStatusMessage = decode(raw).unwrap();
        assert_eq!(update, OrderStatusMessage::confirmed(order_id));
    }

    assert_eq!(h.process_order_update().await, Handled::Acked);
    assert_eq!(h.process_order_update().await, Handled::Acked);
    assert_eq!(h.status_of(order_id).await, OrderStatus::Confirmed);
}

#[tokio::test]
async fn test_redelivered_cancelled_check_stays_cancelled_after_restock() {
    let h = TestHarness::new();
    let a = h.seed_variant(1000, 1).await;
    let order_id = h
        .order_saga
        .place_order(UserId::new(), vec![line(a, 1000, 2)])
        .await
        .unwrap();

    let payload = h.broker.messages(INVENTORY_CHECK.queue).await[0].clone();
    h.process_inventory_check().await;
    h.process_order_update().await;
    assert_eq!(h.status_of(order_id).await, OrderStatus::Cancelled);

    let mut restocked = h.variants.get(a).await.unwrap().unwrap();
    restocked.stock_quantity = 10;
    h.variants.upsert(&restocked).await.unwrap();

    h.publish_raw(&INVENTORY_CHECK, &payload).await;
    assert_eq!(h.process_inventory_check().await, Handled::Acked);
    assert_eq!(h.stock_of(a).await, 10);

    let update: OrderStatusMessage =
        decode(&h.broker.messages(ORDER_UPDATE.queue).await[0]).unwrap();
    assert_eq!(update, OrderStatusMessage::cancelled(order_id));
}

#[tokio::test]
async fn test_end_to_end_cancel_leaves_stock_untouched() {
    let h = TestHarness::new();
    let a = h.seed_variant(1000, 5).await;
    let b = h.seed_variant(1000, 1).await;

    let order_id = h
        .order_saga
        .place_order(UserId::new(), vec![line(a, 1000, 2), line(b, 1000, 3)])
        .await
        .unwrap();

    assert_eq!(h.process_inventory_check().await, Handled::Acked);
    assert_eq!(h.stock_of(a).await, 5);
    assert_eq!(h.stock_of(b).await, 1);

    assert_eq!(h.process_order_update().await, Handled::Acked);
    assert_eq!(h.status_of(order_id).await, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_unknown_variant_cancels_order() {
    let h = TestHarness::new();
    let order_id = h
        .order_saga
        .place_order(UserId::new(), vec![line(VariantId::new(), 500, 1)])
        .await
        .unwrap();

    h.process_inventory_check().await;
    h.process_order_update().await;
    assert_eq!(h.status_of(order_id).await, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_total_uses_stored_price_not_message_price() {
    let h = TestHarness::new();
    let a = h.seed_variant(1000, 5).await;

    // The quoted price is stale; the stored price is charged.
    let order_id = h
        .order_saga
        .place_order(UserId::new(), vec![line(a, 1, 2)])
        .await
        .unwrap();
    h.process_inventory_check().await;

    assert_eq!(h.stock_of(a).await, 3);
    assert_eq!(
        h.variants.outcome_of(order_id).await,
        Some(Outcome::Reserved {
            total: Money::from_cents(2000)
        })
    );

    let reserved = h
        .inventory_saga
        .engine()
        .reserve(&[inventory::ReservationLine::new(a, 1)])
        .await;
    assert_eq!(
        reserved,
        Outcome::Reserved {
            total: Money::from_cents(1000)
        }
    );
}

#[tokio::test]
async fn test_poison_inventory_check_is_dead_lettered() {
    let h = TestHarness::new();
    let a = h.seed_variant(1000, 5).await;

    h.publish_raw(&INVENTORY_CHECK, b"{not json").await;
    assert_eq!(h.process_inventory_check().await, Handled::Rejected);

    let empty_items = serde_json::json!({
        "order_id": OrderId::new().to_string(),
        "order_items": []
    });
    h.publish_raw(&INVENTORY_CHECK, empty_items.to_string().as_bytes())
        .await;
    assert_eq!(h.process_inventory_check().await, Handled::Rejected);

    assert_eq!(h.broker.dead_letters(&INVENTORY_CHECK).await.len(), 2);
    assert_eq!(h.broker.queue_len(ORDER_UPDATE.queue).await, 0);
    assert_eq!(h.stock_of(a).await, 5);
}

#[tokio::test]
async fn test_poison_status_update_is_dead_lettered() {
    let h = TestHarness::new();
    let order_id = h
        .order_saga
        .create_order(UserId::new(), vec![line(VariantId::new(), 100, 1)])
        .await
        .unwrap();

    let shipped = serde_json::json!({
        "order_id": order_id.to_string(),
        "status": "shipped"
    });
    h.publish_raw(&ORDER_UPDATE, shipped.to_string().as_bytes())
        .await;

    assert_eq!(h.process_order_update().await, Handled::Rejected);
    assert_eq!(h.broker.dead_letters(&ORDER_UPDATE).await.len(), 1);
    assert_eq!(h.status_of(order_id).await, OrderStatus::Pending);
}

#[tokio::test]
async fn test_status_update_for_unknown_order_is_rejected() {
    let h = TestHarness::new();
    let payload = encode(&OrderStatusMessage::confirmed(OrderId::new())).unwrap();
    h.publish_raw(&ORDER_UPDATE, &payload).await;

    assert_eq!(h.process_order_update().await, Handled::Rejected);
    assert_eq!(h.broker.dead_letters(&ORDER_UPDATE).await.len(), 1);
}

#[tokio::test]
async fn test_terminal_status_is_idempotent() {
    let h = TestHarness::new();
    let order_id = h
        .order_saga
        .create_order(UserId::new(), vec![line(VariantId::new(), 100, 1)])
        .await
        .unwrap();

    for message in [
        OrderStatusMessage::confirmed(order_id),
        OrderStatusMessage::confirmed(order_id),
        OrderStatusMessage::cancelled(order_id),
    ] {
        h.publish_raw(&ORDER_UPDATE, &encode(&message).unwrap())
            .await;
        assert_eq!(h.process_order_update().await, Handled::Acked);
    }

    assert_eq!(h.status_of(order_id).await, OrderStatus::Confirmed);
    assert!(h.broker.dead_letters(&ORDER_UPDATE).await.is_empty());
}

#[tokio::test]
async fn test_transient_reservation_failure_requeues_without_publishing() {
    let h = TestHarness::new();
    let a = h.seed_variant(1000, 5).await;
    let order_id = h
        .order_saga
        .place_order(UserId::new(), vec![line(a, 1000, 1)])
        .await
        .unwrap();

    h.variants.set_fail_on_commit(true);
    assert_eq!(h.process_inventory_check().await, Handled::Requeued);
    assert_eq!(h.broker.queue_len(INVENTORY_CHECK.queue).await, 1);
    assert_eq!(h.broker.queue_len(ORDER_UPDATE.queue).await, 0);
    assert_eq!(h.stock_of(a).await, 5);

    // The redelivery succeeds once the store recovers.
    h.variants.set_fail_on_commit(false);
    assert_eq!(h.process_inventory_check().await, Handled::Acked);
    assert_eq!(h.stock_of(a).await, 4);
    h.process_order_update().await;
    assert_eq!(h.status_of(order_id).await, OrderStatus::Confirmed);
}

#[tokio::test]
async fn test_repeated_transient_failures_hit_delivery_limit() {
    let h = TestHarness::new();
    let a = h.seed_variant(1000, 5).await;
    h.order_saga
        .place_order(UserId::new(), vec![line(a, 1000, 1)])
        .await
        .unwrap();

    h.variants.set_fail_on_begin(true);
    for _ in 0..Topology::DEFAULT_DELIVERY_LIMIT {
        assert_eq!(h.process_inventory_check().await, Handled::Requeued);
    }
    assert_eq!(h.broker.queue_len(INVENTORY_CHECK.queue).await, 1);
    assert!(h.broker.dead_letters(&INVENTORY_CHECK).await.is_empty());

    // One delivery beyond the limit, then the broker dead-letters it.
    assert_eq!(h.process_inventory_check().await, Handled::Requeued);
    assert_eq!(h.broker.queue_len(INVENTORY_CHECK.queue).await, 0);
    assert_eq!(h.broker.dead_letters(&INVENTORY_CHECK).await.len(), 1);
}

#[tokio::test]
async fn test_status_store_failure_requeues() {
    let h = TestHarness::new();
    let order_id = h
        .order_saga
        .create_order(UserId::new(), vec![line(VariantId::new(), 100, 1)])
        .await
        .unwrap();
    h.publish_raw(
        &ORDER_UPDATE,
        &encode(&OrderStatusMessage::cancelled(order_id)).unwrap(),
    )
    .await;

    h.orders.set_fail_on_transition(true);
    assert_eq!(h.process_order_update().await, Handled::Requeued);
    assert_eq!(h.status_of(order_id).await, OrderStatus::Pending);

    h.orders.set_fail_on_transition(false);
    assert_eq!(h.process_order_update().await, Handled::Acked);
    assert_eq!(h.status_of(order_id).await, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_publish_failure_keeps_order_pending() {
    let h = TestHarness::new();
    h.broker.set_fail_publish(true).await;

    let result = h
        .order_saga
        .place_order(UserId::new(), vec![line(VariantId::new(), 100, 1)])
        .await;

    let order_id = match result {
        Err(SagaError::PublishFailed { order_id, .. }) => order_id,
        other => panic!("expected publish failure, got {other:?}"),
    };
    assert_eq!(h.status_of(order_id).await, OrderStatus::Pending);
    assert_eq!(h.orders.len().await, 1);
}

#[tokio::test]
async fn test_outcome_publish_failure_still_acks_reservation() {
    let h = TestHarness::new();
    let a = h.seed_variant(1000, 5).await;
    let order_id = h
        .order_saga
        .place_order(UserId::new(), vec![line(a, 1000, 2)])
        .await
        .unwrap();

    h.broker.set_fail_publish(true).await;
    assert_eq!(h.process_inventory_check().await, Handled::Acked);

    assert_eq!(h.stock_of(a).await, 3);
    assert_eq!(h.broker.queue_len(INVENTORY_CHECK.queue).await, 0);
    assert_eq!(h.broker.queue_len(ORDER_UPDATE.queue).await, 0);
    assert_eq!(h.status_of(order_id).await, OrderStatus::Pending);
}

#[tokio::test]
async fn test_invalid_order_is_not_published() {
    let h = TestHarness::new();
    let result = h.order_saga.place_order(UserId::new(), vec![]).await;

    assert!(matches!(result, Err(SagaError::OrderStore(_))));
    assert!(h.orders.is_empty().await);
    assert_eq!(h.broker.queue_len(INVENTORY_CHECK.queue).await, 0);
}

#[tokio::test]
async fn test_inventory_check_wire_format() {
    let h = TestHarness::new();
    let variant_id = VariantId::new();
    let order_id = h
        .order_saga
        .place_order(UserId::new(), vec![line(variant_id, 1999, 3)])
        .await
        .unwrap();

    let raw = &h.broker.messages(INVENTORY_CHECK.queue).await[0];
    let message: InventoryCheckMessage = decode(raw).unwrap();
    assert_eq!(message.order_id, order_id);
    assert_eq!(
        message.order_items,
        vec![LineItemPayload::new(
            variant_id,
            Money::from_cents(1999),
            3
        )]
    );

    let status: OrderStatusMessage = serde_json::from_value(serde_json::json!({
        "order_id": order_id.to_string(),
        "status": "cancelled"
    }))
    .unwrap();
    assert_eq!(status.status, OutcomeStatus::Cancelled);
}

#[tokio::test]
async fn test_consumers_run_saga_to_completion() {
    let h = Arc::new(TestHarness::new());
    let a = h.seed_variant(1000, 3).await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let inventory_task = {
        let h = Arc::clone(&h);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            run_consumer(
                &h.broker,
                &Topology::new(),
                &INVENTORY_CHECK,
                &h.inventory_saga,
                shutdown,
            )
            .await
        })
    };
    let order_task = {
        let h = Arc::clone(&h);
        tokio::spawn(async move {
            run_consumer(
                &h.broker,
                &Topology::new(),
                &ORDER_UPDATE,
                &h.order_saga,
                shutdown_rx,
            )
            .await
        })
    };

    let user_id = UserId::new();
    let first = h
        .order_saga
        .place_order(user_id, vec![line(a, 1000, 2)])
        .await
        .unwrap();
    let second = h
        .order_saga
        .place_order(user_id, vec![line(a, 1000, 2)])
        .await
        .unwrap();

    let settled = async {
        loop {
            let statuses = (h.status_of(first).await, h.status_of(second).await);
            if statuses.0.is_terminal() && statuses.1.is_terminal() {
                return statuses;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    let statuses = tokio::time::timeout(Duration::from_secs(5), settled)
        .await
        .expect("saga settled");

    assert_eq!(statuses, (OrderStatus::Confirmed, OrderStatus::Cancelled));
    assert_eq!(h.stock_of(a).await, 1);

    let listed = h.order_saga.orders_for_user(user_id).await.unwrap();
    assert_eq!(listed.len(), 2);

    shutdown_tx.send(true).unwrap();
    inventory_task.await.unwrap().unwrap();
    order_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_consumer_survives_poison_message() {
    let h = Arc::new(TestHarness::new());
    let a = h.seed_variant(1000, 5).await;

    let missing_order_id = serde_json::json!({
        "order_items": [{"product_id": a.to_string(), "price": 10.0, "quantity": 1}]
    });
    h.publish_raw(&INVENTORY_CHECK, missing_order_id.to_string().as_bytes())
        .await;
    let order_id = OrderId::new();
    let valid = InventoryCheckMessage {
        order_id,
        order_items: vec![LineItemPayload::new(a, Money::from_cents(1000), 2)],
    };
    h.publish_raw(&INVENTORY_CHECK, &encode(&valid).unwrap())
        .await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = {
        let h = Arc::clone(&h);
        tokio::spawn(async move {
            run_consumer(
                &h.broker,
                &Topology::new(),
                &INVENTORY_CHECK,
                &h.inventory_saga,
                shutdown_rx,
            )
            .await
        })
    };

    let processed = async {
        while h.broker.queue_len(ORDER_UPDATE.queue).await == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), processed)
        .await
        .expect("valid check processed");

    assert_eq!(h.broker.dead_letters(&INVENTORY_CHECK).await.len(), 1);
    assert_eq!(h.stock_of(a).await, 3);
    let update: OrderStatusMessage =
        decode(&h.broker.messages(ORDER_UPDATE.queue).await[0]).unwrap();
    assert_eq!(update, OrderStatusMessage::confirmed(order_id));

    shutdown_tx.send(true).unwrap();
    consumer.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_consumer_fails_when_topology_cannot_be_declared() {
    let h = TestHarness::new();
    h.broker.set_fail_declare(true).await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = run_consumer(
        &h.broker,
        &Topology::new(),
        &INVENTORY_CHECK,
        &h.inventory_saga,
        shutdown_rx,
    )
    .await;
    assert!(result.is_err());
}
