//! Tollgate webhook ingestion service.
//!
//! Main entry point. Loads configuration, connects the datastore, wires the
//! handler catalogue and dispatch pool, and serves until a shutdown signal.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tollgate_api::{create_router, shutdown_signal, start_server, AppState, Config, SenderRegistry};
use tollgate_core::{
    Clock, DatastoreEventLog, MulticastObserver, PgDatastore, RealClock, TracingObserver,
};
use tollgate_ingest::{
    default_registry, DispatchPool, Dispatcher, GatewayNotifier, Ingestor, LogNotifier, Notifier,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log)?;

    info!("Starting Tollgate webhook ingestion service");
    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        senders = config.senders.len(),
        background_dispatch = config.background_dispatch,
        "Configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    let store = Arc::new(PgDatastore::new(db_pool.clone()));
    store.migrate().await.context("Failed to run datastore migrations")?;
    info!("Datastore migrations completed");

    let notifier: Arc<dyn Notifier> = match config.to_gateway_config() {
        Some(gateway) => Arc::new(GatewayNotifier::new(gateway)?),
        None => {
            warn!("No messaging gateway configured, notifications will only be logged");
            Arc::new(LogNotifier)
        },
    };

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let mut observer = MulticastObserver::new();
    observer.add_subscriber(Arc::new(TracingObserver));

    let dispatcher = Dispatcher::new(
        Arc::new(DatastoreEventLog::new(store.clone())),
        Arc::new(observer),
        clock.clone(),
        config.handler_timeout(),
    );
    let registry = Arc::new(default_registry(store, notifier));
    info!(handlers = registry.len(), "Handler catalogue registered");

    let mut ingestor = Ingestor::new(registry, dispatcher.clone());
    let pool = if config.background_dispatch {
        let mut pool =
            DispatchPool::new(dispatcher, config.to_pool_config(), CancellationToken::new());
        pool.spawn_workers();
        ingestor = ingestor.with_queue(pool.queue());
        Some(pool)
    } else {
        None
    };

    let senders = SenderRegistry::from_config(&config.senders);
    let mut state =
        AppState::new(ingestor, senders, clock).with_max_body_bytes(config.max_body_bytes);
    match config.admin_token() {
        Some(token) => state = state.with_admin_token(token),
        None => info!("No admin token set, audit listing disabled"),
    }

    let addr = config.parse_server_addr()?;
    let app = create_router(state, Duration::from_secs(config.request_timeout));

    info!(addr = %addr, "Tollgate is ready to receive webhooks");
    if let Err(e) = start_server(app, addr, shutdown_signal()).await {
        error!(error = %e, "Server failed");
    }

    if let Some(pool) = pool {
        if let Err(e) = pool.shutdown_graceful(config.shutdown_timeout()).await {
            error!(error = %e, "Dispatch pool did not drain cleanly");
        }
    }

    db_pool.close().await;
    info!("Database connections closed");

    info!("Tollgate shutdown complete");
    Ok(())
}

/// Initializes tracing, preferring `RUST_LOG` over the configured filter.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);
    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .idle_timeout(Duration::from_secs(config.database_idle_timeout))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}
