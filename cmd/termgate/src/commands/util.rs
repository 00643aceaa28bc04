//! Helpers shared by commands.

use std::sync::Arc;

use termgate_lanesync::RegistryClient;
use termgate_store::{LaneStore, RedbStore};

use crate::Cli;
use crate::config::{Config, load_config};

/// Loads the configuration named by `--config`.
pub fn get_config(cli: &Cli) -> anyhow::Result<Config> {
    load_config(cli.config.as_deref())
}

/// Opens the local store, creating it if needed.
pub fn open_store(config: &Config) -> anyhow::Result<Arc<RedbStore>> {
    let path = config.store_path()?;
    tracing::debug!(path = %path.display(), "opening local store");
    Ok(Arc::new(RedbStore::open(&path)?))
}

/// Returns the stored access key or explains how to set one.
pub fn require_access_key(store: &dyn LaneStore) -> anyhow::Result<String> {
    store
        .get_access_key()?
        .ok_or_else(|| anyhow::anyhow!("no access key stored, run 'termgate key set <KEY>' first"))
}

/// Builds a lane registry client authenticated with `access_key`.
pub fn registry_client(config: &Config, access_key: &str) -> anyhow::Result<RegistryClient> {
    Ok(RegistryClient::new(config.api_url.as_str(), access_key)?)
}

/// Masks an access key for logs and display: the first four characters only.
pub fn mask_key(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    format!("{}***", visible)
}
