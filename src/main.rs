//! ledger_core bootstrap
//!
//! Loads `config/<env>.yaml`, installs logging, connects to PostgreSQL and
//! verifies the store answers inside the configured transfer deadline.
//! The ledger itself is a library; this binary only proves a deployment is
//! wired correctly.

use std::sync::Arc;

use anyhow::Context;
use ledger_core::config::AppConfig;
use ledger_core::db::Database;
use ledger_core::logging::init_logging;
use ledger_core::store::PgStore;
use ledger_core::{Ledger, TxContext};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _guard = init_logging(&config)?;

    tracing::info!(
        env = %env,
        git_hash = env!("GIT_HASH"),
        "Starting ledger_core"
    );

    let db = Database::connect(&config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;
    db.health_check().await.context("Health check failed")?;

    let store = Arc::new(PgStore::from_database(&db));
    let ledger = Ledger::with_retry(store, config.retry.clone());

    // Round-trip one unit of work through the executor
    let ctx = TxContext::background().with_timeout(config.transfer.timeout());
    match ledger.get_account(&ctx, 0).await {
        Ok(_) | Err(ledger_core::LedgerError::AccountNotFound(_)) => {
            tracing::info!("Ledger store ready");
            Ok(())
        }
        Err(e) => Err(e).context("Ledger store not usable"),
    }
}
