//! Application state

use std::path::Path;
use std::sync::Arc;

use darkpot_core::Database;
use darkpot_net::RelayTransport;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cleanup::run_startup_cleanup;
use crate::config::AppConfig;
use crate::engine::{EngineHandle, PeerEngine};
use crate::error::Result;

/// Main application state
pub struct AppState {
    pub config: AppConfig,
    pub db: Arc<Database>,
    pub cache: Arc<Database>,
}

impl AppState {
    /// Open both databases and clean up after a previous run that died while hosting
    pub fn new(config: AppConfig) -> Result<Self> {
        let db = Arc::new(open_database(&config.database_path)?);
        let cache = Arc::new(open_database(&config.cache_path)?);

        if let Some(report) =
            run_startup_cleanup(&cache, db.as_ref(), config.cleanup_max_age())?
        {
            info!(?report, "Startup cleanup finished");
        }

        Ok(Self { config, db, cache })
    }

    /// Spawn an engine that talks through the configured relay
    pub fn spawn_engine(&self) -> (EngineHandle, JoinHandle<()>) {
        let transport = RelayTransport::new(self.config.relay_addr);
        info!(relay = %transport.addr(), "Using relay transport");

        let (engine, handle) =
            PeerEngine::new(self.db.clone(), Arc::new(transport), self.config.engine());
        let task = engine.with_cache(self.cache.clone()).spawn();
        (handle, task)
    }
}

fn open_database(path: &Path) -> Result<Database> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(Database::open(path)?)
}
