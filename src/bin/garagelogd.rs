//! GarageLog scheduling daemon.
//!
//! Opens the engine database, starts the standard job set, and runs until
//! Ctrl-C. Config comes from the user's `garagelog/config.toml` when present.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use garagelog::clock::SystemClock;
use garagelog::config::FileConfig;
use garagelog::scheduler::JobScheduler;
use garagelog::store::SqliteStore;
use garagelog::{GarageLogError, Result};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match FileConfig::default_path() {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            FileConfig::load(&path)?
        }
        None => FileConfig::default(),
    };

    let db_path = SqliteStore::default_path()
        .ok_or_else(|| GarageLogError::Store("no data directory available".to_owned()))?;
    info!(path = %db_path.display(), "opening engine database");
    let store = Arc::new(SqliteStore::open(&db_path)?);

    let scheduler = JobScheduler::standard(store, Arc::new(config), Arc::new(SystemClock));
    scheduler.initialize()?;
    info!("garagelogd running, Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    scheduler.stop_all()?;
    Ok(())
}
