//! Inventory service entry point.

use std::net::SocketAddr;

use api::config::Config;
use broker::{AmqpBroker, AmqpConfig, INVENTORY_CHECK, Topology};
use inventory::{InMemoryVariantStore, PostgresVariantStore, VariantStore};
use metrics_exporter_prometheus::PrometheusBuilder;
use saga::InventorySaga;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    api::telemetry::init_tracing(&config);

    // 2. Serve Prometheus metrics on their own listener
    let metrics_addr: SocketAddr = config
        .metrics_addr()
        .parse()
        .expect("invalid metrics address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("failed to install Prometheus exporter");
    tracing::info!(%metrics_addr, "serving metrics");

    // 3. Connect to the broker
    let broker = AmqpBroker::connect(
        AmqpConfig::new(&config.amqp_url).with_publish_timeout(config.publish_timeout),
    )
    .await
    .expect("failed to connect to AMQP broker");
    let topology = Topology::new().with_delivery_limit(config.delivery_limit);

    // 4. Open the variant store and consume
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to database");
            let store = PostgresVariantStore::new(pool).with_lock_timeout(config.lock_timeout);
            store
                .run_migrations()
                .await
                .expect("failed to run inventory migrations");
            consume(store, broker, topology).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, stock is kept in memory and starts empty");
            consume(InMemoryVariantStore::new(), broker, topology).await;
        }
    }
}

async fn consume<V: VariantStore + 'static>(store: V, broker: AmqpBroker, topology: Topology) {
    let saga = InventorySaga::new(store, broker.clone(), topology);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        api::telemetry::shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    tracing::info!("starting inventory service");
    if let Err(e) =
        saga::run_consumer(&broker, &topology, &INVENTORY_CHECK, &saga, shutdown_rx).await
    {
        tracing::error!(error = %e, "inventory check consumer stopped");
    }

    if let Err(e) = broker.close().await {
        tracing::warn!(error = %e, "failed to close AMQP connection");
    }
    tracing::info!("inventory service shut down gracefully");
}
