//! Operator surface for the worker fleet: create, restart and remove one
//! container per indexer row, and tail a worker's logs. Status transitions
//! are written back through the config store so the API and UI see them.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokenwatch_common::{ConfigStore, IndexerStatus, PgConfigStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod runtime;

use runtime::{ContainerRuntime, DockerRuntime};

/// How many log lines the `logs` verb shows.
const LOG_TAIL_LINES: usize = 100;

#[derive(Parser)]
#[command(name = "tokenwatch-launcher", about = "Operate tokenwatch indexer workers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create and start the worker container for an indexer
    Create { name: String },
    /// Recreate the worker container for an indexer
    Restart { name: String },
    /// Stop and remove the worker container for an indexer
    Remove { name: String },
    /// Print the last lines of a worker container's logs
    Logs { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tokenwatch_launcher=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let pool = tokenwatch_common::db::connect(&database_url_from_env()?, 2).await?;
    let store: Arc<dyn ConfigStore> = Arc::new(PgConfigStore::new(pool));
    let docker = DockerRuntime::connect()?;

    match cli.command {
        Command::Create { name } => {
            create(&docker, store.as_ref(), &name, worker_env(&name)?).await?;
            tracing::info!("created container for {name}");
        }
        Command::Restart { name } => {
            restart(&docker, store.as_ref(), &name, worker_env(&name)?).await?;
            tracing::info!("restarted container for {name}");
        }
        Command::Remove { name } => {
            remove(&docker, store.as_ref(), &name).await?;
            tracing::info!("removed container for {name}");
        }
        Command::Logs { name } => {
            print!("{}", docker.logs_tail(&name, LOG_TAIL_LINES).await?);
        }
    }
    Ok(())
}

/// The worker inherits database credentials from the operator environment
/// and learns its identity through INDEXER_NAME.
fn worker_env(name: &str) -> Result<Vec<String>> {
    let mut worker_env = vec![format!("INDEXER_NAME={name}")];
    for key in [
        "POSTGRES_HOST",
        "POSTGRES_PORT",
        "POSTGRES_USER",
        "POSTGRES_PASSWORD",
        "POSTGRES_DB",
    ] {
        let value = env::var(key).with_context(|| format!("{key} must be set"))?;
        worker_env.push(format!("{key}={value}"));
    }
    Ok(worker_env)
}

fn database_url_from_env() -> Result<String> {
    Ok(format!(
        "postgres://{}:{}@{}:{}/{}",
        env::var("POSTGRES_USER").context("POSTGRES_USER must be set")?,
        env::var("POSTGRES_PASSWORD").context("POSTGRES_PASSWORD must be set")?,
        env::var("POSTGRES_HOST").context("POSTGRES_HOST must be set")?,
        env::var("POSTGRES_PORT").unwrap_or_else(|_| "5432".to_string()),
        env::var("POSTGRES_DB").context("POSTGRES_DB must be set")?,
    ))
}

async fn create(
    docker: &dyn ContainerRuntime,
    store: &dyn ConfigStore,
    name: &str,
    env: Vec<String>,
) -> Result<()> {
    let indexer = store.indexer_by_name(name).await?;
    indexer.validate()?;
    docker.run(&indexer.name, env).await?;
    store.set_status(name, IndexerStatus::On).await?;
    Ok(())
}

async fn restart(
    docker: &dyn ContainerRuntime,
    store: &dyn ConfigStore,
    name: &str,
    env: Vec<String>,
) -> Result<()> {
    let indexer = store.indexer_by_name(name).await?;
    indexer.validate()?;
    docker.remove(&indexer.name).await?;
    docker.run(&indexer.name, env).await?;
    store.set_status(name, IndexerStatus::On).await?;
    Ok(())
}

async fn remove(
    docker: &dyn ContainerRuntime,
    store: &dyn ConfigStore,
    name: &str,
) -> Result<()> {
    let indexer = store.indexer_by_name(name).await?;
    docker.remove(&indexer.name).await?;
    store.set_status(name, IndexerStatus::Off).await?;
    Ok(())
}
