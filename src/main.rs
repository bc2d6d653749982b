//! Wallet Ledger - service entry point
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌──────────────┐
//! │  Config  │───▶│    Store     │───▶│ Orchestrator │
//! │  (YAML)  │    │ (PG | memory)│    │    + saga    │
//! └──────────┘    └──────────────┘    └──────────────┘
//!                        │                    │
//!                        ▼                    ▼
//!                 ┌──────────────┐    ┌──────────────┐
//!                 │ Catalog sync │    │ Reconciler   │
//!                 │  (periodic)  │    │  (periodic)  │
//!                 └──────────────┘    └──────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use wallet_ledger::catalog::CatalogSync;
use wallet_ledger::config::AppConfig;
use wallet_ledger::db::Database;
use wallet_ledger::logging::init_logging;
use wallet_ledger::rates::CurrencyConversionService;
use wallet_ledger::store::Store;
use wallet_ledger::store::memory::MemoryStore;
use wallet_ledger::store::postgres::PgStore;
use wallet_ledger::tasks::{Shutdown, spawn_periodic};
use wallet_ledger::transaction::{Orchestrator, ProviderRegistry, ReconciliationWorker};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env).with_context(|| format!("loading config for {}", env))?;
    let _log_guard = init_logging(&config);

    info!(env = %env, "Wallet ledger starting");

    match config.postgres_url.as_deref() {
        Some(url) => {
            let db = Database::connect(url, &config.database)
                .await
                .context("connecting to PostgreSQL")?;
            db.run_migrations().await.context("applying schema")?;
            run(Arc::new(PgStore::new(db.pool().clone())), &config).await
        }
        None => {
            info!("No postgres_url configured, using in-memory store");
            run(Arc::new(MemoryStore::new()), &config).await
        }
    }
}

// ============================================================
// BACKGROUND TASKS
// ============================================================

async fn run<S: Store>(store: Arc<S>, config: &AppConfig) -> anyhow::Result<()> {
    let shutdown = Shutdown::new();
    let mut handles = Vec::new();

    // Providers are registered by the embedding service
    let providers = Arc::new(ProviderRegistry::new());
    let rates = Arc::new(CurrencyConversionService::new(store.clone()));
    let orchestrator = Orchestrator::new(
        store.clone(),
        rates,
        providers.clone(),
        config.settlement.provider_timeout(),
    );

    let reconciler = Arc::new(ReconciliationWorker::new(
        store.clone(),
        providers,
        orchestrator.saga(),
        config.reconciliation.to_config(),
    ));
    handles.push(spawn_periodic(
        "reconciliation",
        config.reconciliation.scan_interval(),
        shutdown.subscribe(),
        move || {
            let reconciler = reconciler.clone();
            async move {
                let report = reconciler.run_once().await?;
                if report.scanned > 0 {
                    info!(
                        scanned = report.scanned,
                        succeeded = report.succeeded,
                        failed = report.failed,
                        still_unknown = report.still_unknown,
                        errors = report.errors,
                        "Reconciliation pass finished"
                    );
                }
                Ok::<(), wallet_ledger::TransactionError>(())
            }
        },
    ));

    if config.catalog_sync.enabled {
        let source = Arc::new(config.catalog_source().context("building catalog source")?);
        let sync = Arc::new(CatalogSync::new(store.clone(), config.catalog_sync.page_size));
        handles.push(spawn_periodic(
            "catalog_sync",
            config.catalog_sync.interval(),
            shutdown.subscribe(),
            move || {
                let source = source.clone();
                let sync = sync.clone();
                async move {
                    let report = sync.sync_gift_cards(source.as_ref()).await?;
                    info!(
                        pages = report.pages,
                        processed = report.processed,
                        succeeded = report.succeeded,
                        failed = report.failed,
                        truncated = report.truncated,
                        "Catalog sync finished"
                    );
                    Ok::<(), wallet_ledger::catalog::CatalogError>(())
                }
            },
        ));
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");
    shutdown.trigger();

    futures::future::join_all(handles).await;
    info!("Wallet ledger stopped");
    Ok(())
}
