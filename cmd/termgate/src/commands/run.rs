//! Runs the gateway.

use std::sync::Arc;

use clap::Args;
use termgate_cloud::{
    ChargeDispatcher, ConnectionRegistry, SyncSummary, UnconfiguredLegacyTerminal,
};
use termgate_devproto::DeviceGatewayCaller;
use termgate_store::{LaneConfig, LaneStore};
use tracing::{Instrument, debug, info, info_span, warn};

use super::{get_config, mask_key, open_store, require_access_key};
use crate::Cli;
use crate::config::Config;

/// Connect every stored lane and serve charges until Ctrl-C.
///
/// The local store is re-read every `reload_secs`, so lanes added, moved or
/// removed by other commands take effect without a restart.
#[derive(Args)]
pub struct RunCommand {}

impl RunCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = get_config(cli)?;
        let key = {
            let store = open_store(&config)?;
            require_access_key(store.as_ref())?
        };

        let span = info_span!("gateway", merchant = %mask_key(&key));
        async move {
            let caller = DeviceGatewayCaller::new(config.caller_config());
            let dispatcher = ChargeDispatcher::new(caller, Arc::new(UnconfiguredLegacyTerminal))
                .with_device_port(config.device_port)
                .with_device_timeout(config.device_timeout());
            let registry = ConnectionRegistry::new(config.cloud_config(), Arc::new(dispatcher));

            let lanes = read_lanes(&config).await?;
            if lanes.is_empty() {
                warn!("no lanes stored, add one with 'termgate lane add'");
            }
            let (summary, _) = reconcile(&registry, &lanes).await;
            info!(lanes = summary.created, url = %config.cloud_url, "gateway started");

            let period = config.reload_interval();
            let mut reload = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            let mut status = registry.subscribe();
            loop {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        result?;
                        info!("interrupted, shutting down");
                        break;
                    }
                    _ = reload.tick() => reload_lanes(&registry, &config).await,
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let connected = *status.borrow_and_update();
                        if connected {
                            info!("gateway online");
                        } else {
                            warn!("gateway offline, no lane connected");
                        }
                    }
                }
            }

            registry.shutdown().await;
            Ok::<(), anyhow::Error>(())
        }
        .instrument(span)
        .await
    }
}

/// Reads the configured lanes, holding the store only for the read.
async fn read_lanes(config: &Config) -> anyhow::Result<Vec<LaneConfig>> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<LaneConfig>> {
        let store = open_store(&config)?;
        Ok(store.lane_configs()?)
    })
    .await?
}

async fn reload_lanes(registry: &ConnectionRegistry, config: &Config) {
    let lanes = match read_lanes(config).await {
        Ok(lanes) => lanes,
        Err(e) => {
            // Another command may hold the store; the next reload retries.
            warn!(error = %e, "lane reload failed, keeping current connections");
            return;
        }
    };

    let (summary, removed) = reconcile(registry, &lanes).await;
    if summary.created + summary.replaced + removed.len() > 0 {
        info!(
            created = summary.created,
            replaced = summary.replaced,
            removed = removed.len(),
            "lanes reloaded"
        );
    } else {
        debug!(lanes = lanes.len(), "lanes unchanged");
    }
}

/// Makes the registry match `lanes`: connections for lanes no longer listed
/// are closed, new and changed lanes are (re)connected.
async fn reconcile(
    registry: &ConnectionRegistry,
    lanes: &[LaneConfig],
) -> (SyncSummary, Vec<String>) {
    let removed = registry.retain_lanes(lanes).await;
    let summary = registry.sync_connections(lanes).await;
    (summary, removed)
}
