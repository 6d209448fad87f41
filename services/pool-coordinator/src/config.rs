//! Configuration types and loading
//!
//! Config precedence: CLI `--config` > `CONFIG_PATH` env var > default
//! file name. Values are validated on load so the service fails fast on a
//! bad file instead of misbehaving at runtime.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub admin_listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Durable account store settings
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

/// Pool engine tuning
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub default_cooldown_secs: u64,
    pub reconcile_interval_secs: u64,
    pub availability_window_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            default_cooldown_secs: 300,
            reconcile_interval_secs: 30,
            availability_window_secs: 300,
        }
    }
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if config.server.listen_addr == config.server.admin_listen_addr {
            return Err(common::Error::Config(format!(
                "listen_addr and admin_listen_addr must differ, both are {}",
                config.server.listen_addr
            )));
        }
        if config.store.path.as_os_str().is_empty() {
            return Err(common::Error::Config("store path must not be empty".into()));
        }
        if config.pool.default_cooldown_secs == 0 {
            return Err(common::Error::Config(
                "default_cooldown_secs must be greater than 0".into(),
            ));
        }
        if config.pool.reconcile_interval_secs == 0 {
            return Err(common::Error::Config(
                "reconcile_interval_secs must be greater than 0".into(),
            ));
        }
        if config.pool.availability_window_secs == 0 {
            return Err(common::Error::Config(
                "availability_window_secs must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("pool-coordinator.toml")
    }
}
