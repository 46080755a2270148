mod account;
mod api;
mod config;
mod db;
mod error;
mod ingest;
mod mail;
mod migration;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use config::AppConfig;
use db::DbStore;
use ingest::{AccountSynchronizer, FileStore, IngestionOrchestrator};
use mail::ProviderClientFactory;
use sea_orm::DatabaseConnection;
use sea_orm_migration::MigratorTrait;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub orchestrator: Arc<IngestionOrchestrator>,
    pub files: FileStore,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = AppConfig::from_env()?;
    tracing::info!("PDF mail ingest starting...");
    tracing::info!("Server: {}:{}", config.server.host, config.server.port);
    tracing::info!(
        "Mailbox: {}, up to {} account(s) at a time",
        config.ingest.mailbox,
        config.ingest.max_concurrent_accounts
    );

    // Create content directory
    let files = FileStore::new(&config.storage.content_dir);
    files.ensure_root().await?;
    tracing::info!("Content directory: {}", files.root().display());

    // Connect to database
    let db = db::connect(&config.database.url).await?;

    // Run migrations
    migration::Migrator::up(&db, None).await?;
    tracing::info!("Database migrations complete");

    // Wire the ingest core
    let store = Arc::new(DbStore::new(db.clone()));
    let clients = Arc::new(ProviderClientFactory::new(
        config.gmail.api_base_url.clone(),
        config.ingest.io_timeout,
    ));
    let synchronizer = AccountSynchronizer::new(
        clients,
        files.clone(),
        store.clone(),
        store.clone(),
        config.ingest.mailbox.clone(),
    );
    let orchestrator = Arc::new(IngestionOrchestrator::new(
        store,
        Arc::new(synchronizer),
        config.ingest.max_concurrent_accounts,
        config.ingest.run_timeout,
    ));
    let shutdown = orchestrator.shutdown_token();

    // Optional background polling
    let poller = config.ingest.poll_interval.map(|interval| {
        tracing::info!("Polling mailboxes every {:?}", interval);
        tokio::spawn(orchestrator.clone().poll(interval))
    });

    // Build router
    let state = AppState {
        db,
        orchestrator,
        files,
    };
    let app = api::router::build_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);
    tracing::info!(
        "Trigger a run with: curl -X POST http://localhost:{}/api/email-ingestion/check-emails",
        config.server.port
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(poller) = poller {
        poller.await?;
    }

    Ok(())
}

/// Resolves on Ctrl-C, cancelling any ingestion run in flight.
async fn shutdown_signal(shutdown: tokio_util::sync::CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
    shutdown.cancel();
}
