//! Order worker entry point.
//!
//! Runs `WORKER_CONSUMERS` consumers over one broker connection, each with
//! its own channel and a prefetch of one.

use std::net::{Ipv4Addr, SocketAddr};

use api::config::Config;
use api::error::StartupError;
use api::{shutdown, telemetry};
use broker::{AmqpBroker, MessageBroker};
use order_store::PostgresOrderStore;
use order_worker::{OrderWorker, PREFETCH};
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = Config::from_env();
    telemetry::init(&config);

    let metrics_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.worker_metrics_port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    let store = PostgresOrderStore::new(pool);
    if config.run_migrations {
        store.run_migrations().await?;
    }

    let broker = AmqpBroker::connect(&config.amqp_url, &config.queue_name).await?;

    let shutdown_token = CancellationToken::new();
    let mut consumers = JoinSet::new();
    for consumer in 0..config.worker_consumers {
        let subscription = broker.subscribe(PREFETCH).await?;
        let worker = OrderWorker::new(store.clone());
        let token = shutdown_token.clone();
        consumers.spawn(async move {
            tracing::info!(consumer, "consumer started");
            worker.run(subscription, token).await
        });
    }
    tracing::info!(
        consumers = config.worker_consumers,
        queue = %config.queue_name,
        %metrics_addr,
        "order worker running"
    );

    tokio::select! {
        () = shutdown::signal() => {}
        Some(result) = consumers.join_next() => {
            tracing::error!(?result, "consumer exited early, shutting down");
        }
    }

    shutdown_token.cancel();
    while let Some(result) = consumers.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "consumer failed"),
            Err(e) => tracing::error!(error = %e, "consumer panicked"),
        }
    }

    broker.close().await?;
    store.close().await;

    tracing::info!("order worker shut down gracefully");
    Ok(())
}
