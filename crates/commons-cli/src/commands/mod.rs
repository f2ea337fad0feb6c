//! CLI command implementations.

pub mod evolve;
pub mod init;
pub mod simulate;
pub mod train;

use anyhow::{Context, Result};
use commons::distributed::{EvolutionStore, SqliteStore};
use std::sync::Arc;

use crate::config::Config;

/// Open the shared database named in the config, creating its directory.
pub fn open_store(config: &Config) -> Result<Arc<dyn EvolutionStore>> {
    let path = config.database_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = SqliteStore::open(&path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}
