//! Gateway configuration, stored in ~/.termgate/config.yaml.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use termgate_cloud::{CloudConfig, DEFAULT_CLOUD_URL, DEFAULT_DEVICE_PORT};
use termgate_devproto::CallerConfig;
use termgate_lanesync::DEFAULT_API_URL;

/// Base directory under the home directory.
pub const DEFAULT_BASE_DIR: &str = ".termgate";
/// Configuration filename.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Local store filename.
pub const DEFAULT_STORE_FILE: &str = "termgate.redb";

/// Gateway configuration. Every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cloud WebSocket endpoint.
    pub cloud_url: String,

    /// Lane registry base URL.
    pub api_url: String,

    /// Local store file (default ~/.termgate/termgate.redb).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,

    /// TCP port of protocol-X terminals.
    pub device_port: u16,

    /// How long a terminal has to answer a charge.
    pub device_timeout_secs: u64,

    /// Terminal response poll interval.
    pub poll_interval_ms: u64,

    pub heartbeat_secs: u64,

    pub backoff_initial_ms: u64,

    pub backoff_max_ms: u64,

    /// How often a running gateway re-reads its lanes from the local store.
    pub reload_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cloud_url: DEFAULT_CLOUD_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            store_path: None,
            device_port: DEFAULT_DEVICE_PORT,
            device_timeout_secs: 240,
            poll_interval_ms: 500,
            heartbeat_secs: 15,
            backoff_initial_ms: 1000,
            backoff_max_ms: 60_000,
            reload_secs: 10,
        }
    }
}

impl Config {
    /// Gets the default config directory.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_BASE_DIR))
    }

    /// Gets the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        Self::default_dir().map(|dir| dir.join(DEFAULT_CONFIG_FILE))
    }

    /// Resolves the local store path.
    pub fn store_path(&self) -> anyhow::Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_dir()
                .map(|dir| dir.join(DEFAULT_STORE_FILE))
                .ok_or_else(|| anyhow::anyhow!("cannot determine store path")),
        }
    }

    pub fn cloud_config(&self) -> CloudConfig {
        CloudConfig {
            url: self.cloud_url.clone(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            backoff_initial: Duration::from_millis(self.backoff_initial_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn caller_config(&self) -> CallerConfig {
        CallerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ..CallerConfig::default()
        }
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.device_timeout_secs)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_secs.max(1))
    }
}

/// Loads the configuration. A missing file yields the defaults.
pub fn load_config(custom_path: Option<&str>) -> anyhow::Result<Config> {
    let path = match custom_path {
        Some(p) => PathBuf::from(p),
        None => Config::default_path()
            .ok_or_else(|| anyhow::anyhow!("cannot determine config path"))?,
    };
    load_from(&path)
}

fn load_from(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(&content)?)
}
