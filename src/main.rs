//! commerce_outbox - outbox dispatcher and operator admin API
//!
//! Runs the background dispatcher that delivers committed domain events to
//! subscribers, next to a small HTTP surface for inspecting and replaying
//! outbox messages.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commerce_outbox::api::{self, AppState};
use commerce_outbox::dispatch::OutboxDispatcher;
use commerce_outbox::store::PgStore;
use commerce_outbox::{aggregate, db, filters, subscribers, Config};

/// Initialize tracing/logging
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "commerce_outbox=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);

    if config.is_production() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;
    init_tracing(&config);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(worker_id = %config.worker_id, "Starting commerce_outbox");
    tracing::info!("Connecting to database...");

    // Create database pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    // Verify database schema
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    // Query filters are built once for every entity type
    let query_filters = aggregate::register_all(filters::QueryFilterBuilder::new()).build();
    tracing::info!(entity_types = query_filters.len(), "Entity types registered");

    let registry = Arc::new(subscribers::sample_registry()?);
    tracing::info!(event_types = ?registry.event_types(), "Subscribers registered");

    let store = PgStore::new(pool.clone());

    // Dispatcher stops between batches once shutdown flips
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher =
        OutboxDispatcher::new(store.clone(), registry, config.dispatcher_config()).start(shutdown_rx);

    let app = api::build_router(AppState::new(store));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down, waiting for dispatcher...");
    shutdown_tx.send(true).ok();
    if let Err(e) = dispatcher.await {
        tracing::error!(error = %e, "Dispatcher task ended abnormally");
    }

    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
