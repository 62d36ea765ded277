//! API server entry point.
//!
//! Serves the HTTP API and, unless `RELAY_ENABLED` is off, runs the outbox
//! relay loop in the same process.

use std::sync::Arc;

use api::config::Config;
use api::error::StartupError;
use api::{AppState, create_app, shutdown, telemetry};
use broker::{AmqpBroker, ManagementClient};
use order_store::PostgresOrderStore;
use outbox_relay::OutboxRelay;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    telemetry::init(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Connect the store and the broker
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    let store = PostgresOrderStore::new(pool);
    if config.run_migrations {
        store.run_migrations().await?;
        tracing::info!("migrations applied");
    }

    let broker = Arc::new(AmqpBroker::connect(&config.amqp_url, &config.queue_name).await?);
    let diagnostics = Arc::new(ManagementClient::new(config.management()));

    // 4. Start the relay loop
    let shutdown_token = CancellationToken::new();
    let relay_task = if config.relay_enabled {
        let relay = OutboxRelay::new(store.clone(), Arc::clone(&broker), config.relay());
        let token = shutdown_token.clone();
        Some(tokio::spawn(async move { relay.run(token).await }))
    } else {
        tracing::info!("outbox relay disabled in this process");
        None
    };

    // 5. Build the application and serve
    let state = Arc::new(AppState::new(store.clone(), diagnostics));
    let app = create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let token = shutdown_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown::signal().await;
            token.cancel();
        })
        .await?;

    // 6. Tear down in reverse order
    shutdown_token.cancel();
    if let Some(task) = relay_task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "relay task panicked");
        }
    }
    broker.close().await?;
    store.close().await;

    tracing::info!("server shut down gracefully");
    Ok(())
}
