mod config;
mod db;
mod error;
mod ingest;
mod schema;
mod scheduler;
mod sources;
mod store;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::PollingConfig;
use crate::ingest::IngestionCycle;
use crate::scheduler::{PollingScheduler, SchedulerState};
use crate::store::{ContentStore, MemoryContentStore, PgContentStore};

#[derive(Parser)]
#[command(name = "content-poller")]
#[command(about = "Polls a course content source and stores new items exactly once")]
struct Cli {
    /// Run a single ingestion cycle and exit
    #[arg(long)]
    once: bool,

    /// Keep ingested items in memory instead of PostgreSQL.
    ///
    /// Useful for checking source credentials and selectors without a
    /// database; nothing survives the process.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "content_poller=info,shared=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    let config = PollingConfig::from_env()?;

    let dry_run_store = cli.dry_run.then(|| Arc::new(MemoryContentStore::new()));
    let store: Arc<dyn ContentStore> = if let Some(memory) = &dry_run_store {
        tracing::warn!("Dry run: content is kept in memory only");
        memory.clone()
    } else {
        let store = PgContentStore::connect(config.require_database_url()?).await?;
        tracing::info!("Database connection pool initialized");
        Arc::new(store)
    };
    tracing::info!(stored = store.count().await?, "Content store ready");

    let source = sources::from_config(&config)?;
    tracing::info!(source = source.name(), "Source adapter configured");
    let cycle = IngestionCycle::new(source, store.clone());

    if cli.once {
        let outcome = cycle.run_cycle().await;
        finish(store.as_ref(), dry_run_store.as_deref()).await;
        outcome?;
        return Ok(());
    }

    let (scheduler, shutdown) = PollingScheduler::new(cycle, config.poll_interval());
    let state = scheduler.state();
    let scheduler_handle = tokio::spawn(scheduler.run());

    tracing::info!("Content poller running. Press Ctrl+C to stop.");
    signal::ctrl_c().await?;
    if *state.borrow() == SchedulerState::Running {
        tracing::info!("Shutdown signal received, waiting for the current cycle to finish...");
    } else {
        tracing::info!("Shutdown signal received, stopping...");
    }

    shutdown.shutdown();
    if let Err(e) = scheduler_handle.await {
        tracing::error!("Scheduler task failed: {:?}", e);
    }
    finish(store.as_ref(), dry_run_store.as_deref()).await;

    tracing::info!("Content poller stopped");
    Ok(())
}

async fn finish(store: &dyn ContentStore, dry_run: Option<&MemoryContentStore>) {
    if let Some(memory) = dry_run {
        for stored in memory.items() {
            tracing::info!(
                identity = %stored.item.identity,
                title = %stored.item.title,
                cycle_id = %stored.cycle_id,
                ingested_at = %stored.ingested_at,
                "Would have stored"
            );
        }
    }
    store.close().await;
}
