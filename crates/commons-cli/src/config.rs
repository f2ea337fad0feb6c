//! Configuration management for Commons CLI.

use anyhow::{Context, Result};
use commons::distributed::EvolutionConfig;
use commons::prelude::{TrainingConfig, WorldConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "commons.toml";
pub const DATA_DIR: &str = ".commons";

/// Commons project configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub evolution: EvolutionConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub store: StoreConfig,

    /// Directory the config was loaded from; relative paths resolve here.
    #[serde(skip)]
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds a worker sleeps after finding no work.
    #[serde(default = "default_idle_backoff")]
    pub idle_backoff_secs: u64,
    /// Seconds between orchestrator polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

// Default value functions
fn default_idle_backoff() -> u64 { 5 }
fn default_poll_interval() -> u64 { 30 }
fn default_database() -> PathBuf { Path::new(DATA_DIR).join("commons.db") }

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_backoff_secs: default_idle_backoff(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

impl WorkerConfig {
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_secs(self.idle_backoff_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Config {
    /// Load config from commons.toml in the current or parent directories.
    pub fn load() -> Result<Self> {
        match find_config_file() {
            Some(path) => Self::load_from(&path),
            None => Ok(Config::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.root = path.parent().map(Path::to_path_buf);

        config
            .world
            .validate()
            .with_context(|| format!("Invalid [world] section in {}", path.display()))?;
        config
            .evolution
            .validate()
            .with_context(|| format!("Invalid [evolution] section in {}", path.display()))?;
        config
            .training
            .validate()
            .with_context(|| format!("Invalid [training] section in {}", path.display()))?;
        Ok(config)
    }

    /// Save config to the specified path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Database path, resolved against the directory holding commons.toml.
    pub fn database_path(&self) -> Result<PathBuf> {
        let db = &self.store.database;
        if db.is_absolute() {
            return Ok(db.clone());
        }
        let base = match &self.root {
            Some(root) => root.clone(),
            None => std::env::current_dir()?,
        };
        Ok(base.join(db))
    }
}

/// Find commons.toml in current or parent directories.
fn find_config_file() -> Option<PathBuf> {
    let mut dir = std::env::current_dir().ok()?;
    loop {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }
        if !dir.pop() {
            break;
        }
    }
    None
}
