//! Order service entry point.

use std::sync::Arc;

use api::config::Config;
use broker::{AmqpBroker, AmqpConfig, ORDER_UPDATE, Topology};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use orders::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    api::telemetry::init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Set up the broker; it connects on first use, so the HTTP API comes
    //    up even while RabbitMQ is unreachable
    let broker = AmqpBroker::new(
        AmqpConfig::new(&config.amqp_url).with_publish_timeout(config.publish_timeout),
    );
    let topology = Topology::new().with_delivery_limit(config.delivery_limit);

    // 4. Open the order store and serve
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to database");
            let store = PostgresOrderStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run order migrations");
            serve(config, store, broker, topology, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory");
            serve(
                config,
                InMemoryOrderStore::new(),
                broker,
                topology,
                metrics_handle,
            )
            .await;
        }
    }
}

async fn serve<S: OrderStore + 'static>(
    config: Config,
    store: S,
    broker: AmqpBroker,
    topology: Topology,
    metrics_handle: PrometheusHandle,
) {
    let state = api::create_state(store, broker.clone(), topology);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // The HTTP API keeps serving if the consumer cannot start.
    let consumer = {
        let state = Arc::clone(&state);
        let broker = broker.clone();
        tokio::spawn(async move {
            if let Err(e) =
                saga::run_consumer(&broker, &topology, &ORDER_UPDATE, &state.saga, shutdown_rx)
                    .await
            {
                tracing::error!(error = %e, "order status consumer stopped");
            }
        })
    };

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting order service");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(api::telemetry::shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    if let Err(e) = consumer.await {
        tracing::error!(error = %e, "order status consumer panicked");
    }
    if let Err(e) = broker.close().await {
        tracing::warn!(error = %e, "failed to close AMQP connection");
    }

    tracing::info!("order service shut down gracefully");
}
