//! HTTP surface and process bootstrap for the saga services.
//!
//! The order service exposes REST endpoints for placing and reading orders,
//! and consumes order status updates. The inventory service only consumes
//! inventory checks. Both use structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod telemetry;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use broker::{Broker, Topology};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::OrderStore;
use saga::OrderSaga;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, B>(state: Arc<AppState<S, B>>, metrics_handle: PrometheusHandle) -> Router
where
    S: OrderStore + 'static,
    B: Broker + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create::<S, B>))
        .route("/orders/{id}", get(routes::orders::get::<S, B>))
        .route(
            "/orders/user/{id}",
            get(routes::orders::list_for_user::<S, B>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the order service state over a store and a broker.
pub fn create_state<S, B>(store: S, broker: B, topology: Topology) -> Arc<AppState<S, B>>
where
    S: OrderStore,
    B: Broker,
{
    Arc::new(AppState {
        saga: OrderSaga::new(store, broker, topology),
    })
}
