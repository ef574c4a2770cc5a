use std::sync::Arc;

use anyhow::Result;
use tokenwatch_common::{ConfigStore, Persistence, PgConfigStore, PgPersistence};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod abi;
mod abis;
mod balance;
mod config;
mod fetch;
mod rpc;
mod strategy;
mod transfer;
mod worker;

#[cfg(test)]
mod testutil;

/// Single control thread per worker; concurrency lives between processes,
/// not inside one.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tokenwatch_indexer=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    tracing::info!(indexer = %config.indexer_name, "starting tokenwatch worker");

    let pool =
        tokenwatch_common::db::connect(&config.database_url(), config.db_max_connections).await?;
    let config_store: Arc<dyn ConfigStore> = Arc::new(PgConfigStore::new(pool.clone()));
    let persistence: Arc<dyn Persistence> = Arc::new(PgPersistence::new(pool));

    // Returns only on a fatal configuration error; the process exit code
    // tells the container runtime this is not worth restarting blindly.
    worker::run_worker(config_store, persistence, &config.indexer_name).await?;
    Ok(())
}
