//! Order placement and lookup endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use broker::Broker;
use common::{Money, OrderId, UserId, VariantId};
use orders::{Order, OrderLineItem, OrderStatus, OrderStore};
use saga::OrderSaga;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S, B> {
    pub saga: OrderSaga<S, B>,
}

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub order_items: Vec<OrderItemRequest>,
}

#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    /// Unit price in currency units, e.g. `12.99`.
    pub price: f64,
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub message: &'static str,
    pub order_id: String,
    pub status: OrderStatus,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub user_id: String,
    pub quantity: u64,
    pub status: OrderStatus,
    pub total: f64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub order_items: Vec<OrderItemResponse>,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub price: f64,
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct OrderEnvelope {
    pub order: OrderResponse,
}

#[derive(Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id.to_string(),
            user_id: order.user_id.to_string(),
            quantity: order.quantity,
            status: order.status,
            total: order.total().as_decimal(),
            created_at: order.created_at,
            updated_at: order.updated_at,
            order_items: order
                .items
                .iter()
                .map(|item| OrderItemResponse {
                    product_id: item.variant_id.to_string(),
                    price: item.unit_price.as_decimal(),
                    quantity: item.quantity,
                })
                .collect(),
        }
    }
}

// -- Handlers --

/// POST /orders — store a pending order and request its inventory check.
#[tracing::instrument(skip(state, req))]
pub async fn create<S, B>(
    State(state): State<Arc<AppState<S, B>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError>
where
    S: OrderStore + 'static,
    B: Broker + 'static,
{
    let user_id = UserId::parse(&req.user_id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid user_id: {e}")))?;

    let items = req
        .order_items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let variant_id = VariantId::parse(&item.product_id).map_err(|e| {
                ApiError::BadRequest(format!("order_items[{index}]: invalid product_id: {e}"))
            })?;
            let price = Money::from_decimal(item.price)
                .filter(Money::is_positive)
                .ok_or_else(|| {
                    ApiError::BadRequest(format!("order_items[{index}]: price must be positive"))
                })?;
            Ok(OrderLineItem::new(variant_id, price, item.quantity))
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let order_id = state.saga.place_order(user_id, items).await?;

    let response = OrderCreatedResponse {
        message: "Order request received, processing...",
        order_id: order_id.to_string(),
        status: OrderStatus::Pending,
    };

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /orders/{id} — load one order.
#[tracing::instrument(skip(state))]
pub async fn get<S, B>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderEnvelope>, ApiError>
where
    S: OrderStore + 'static,
    B: Broker + 'static,
{
    let order_id = OrderId::parse(&id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))?;

    let order = state
        .saga
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {order_id} not found")))?;

    Ok(Json(OrderEnvelope {
        order: OrderResponse::from(&order),
    }))
}

/// GET /orders/user/{id} — list a user's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list_for_user<S, B>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderListResponse>, ApiError>
where
    S: OrderStore + 'static,
    B: Broker + 'static,
{
    let user_id =
        UserId::parse(&id).map_err(|e| ApiError::BadRequest(format!("Invalid user id: {e}")))?;

    let orders = state.saga.orders_for_user(user_id).await?;

    Ok(Json(OrderListResponse {
        orders: orders.iter().map(OrderResponse::from).collect(),
    }))
}
