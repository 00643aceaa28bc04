//! Lane commands.

use std::sync::Arc;

use clap::{Args, Subcommand};
use termgate_lanesync::validate::{validate_ip_address, validate_lane_id};
use termgate_lanesync::{LaneRegistry, LaneSyncCoordinator, SyncReport};
use termgate_store::{LaneConfig, LaneStore};

use super::{get_config, open_store, registry_client, require_access_key};
use crate::Cli;

/// Manage lanes.
#[derive(Args)]
pub struct LaneCommand {
    #[command(subcommand)]
    command: LaneSubcommand,
}

#[derive(Subcommand)]
enum LaneSubcommand {
    /// Register a lane (or update its address) remotely and locally
    Add {
        /// Lane id
        lane_id: String,
        /// Terminal IP address
        ip_address: String,
    },
    /// List lanes
    List {
        /// List the lane registry instead of the local store
        #[arg(long)]
        remote: bool,
    },
    /// Delete a lane remotely and locally
    Remove {
        /// Lane id
        lane_id: String,
    },
}

impl LaneCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = get_config(cli)?;
        let store = open_store(&config)?;

        match &self.command {
            LaneSubcommand::Add {
                lane_id,
                ip_address,
            } => {
                let lane_id = lane_id.trim();
                validate_lane_id(lane_id)?;
                let ip = validate_ip_address(ip_address)?;

                let key = require_access_key(store.as_ref())?;
                let client = registry_client(&config, &key)?;
                let coordinator = LaneSyncCoordinator::new(Arc::new(client), store.clone());

                let lane = LaneConfig::new(lane_id, ip.to_string(), key);
                let report = coordinator.sync_lane(&lane).await;
                check_report("add", lane_id, report)?;
                let verb = if report.created_local { "added" } else { "updated" };
                println!("Lane {} {} ({})", lane_id, verb, ip);
                println!("A running gateway picks this up at its next lane reload");
            }
            LaneSubcommand::List { remote: false } => {
                let lanes = store.list_lanes()?;
                if lanes.is_empty() {
                    println!("No lanes stored");
                }
                for lane in lanes {
                    println!("{}\t{}", lane.lane_id, lane.ip_address);
                }
            }
            LaneSubcommand::List { remote: true } => {
                let key = require_access_key(store.as_ref())?;
                let client = registry_client(&config, &key)?;
                for lane in client.list_lanes().await? {
                    println!(
                        "{}\t{}\t{}\t{}",
                        lane.lane_id,
                        lane.ip_address,
                        lane.terminal_type.as_deref().unwrap_or("-"),
                        if lane.is_active { "active" } else { "inactive" }
                    );
                }
            }
            LaneSubcommand::Remove { lane_id } => {
                let key = require_access_key(store.as_ref())?;
                let client = registry_client(&config, &key)?;
                let coordinator = LaneSyncCoordinator::new(Arc::new(client), store.clone());

                let report = coordinator.remove_lane(lane_id).await;
                check_report("remove", lane_id, report)?;
                println!("Lane {} removed", lane_id);
                println!("A running gateway disconnects it at its next lane reload");
            }
        }
        Ok(())
    }
}

fn check_report(action: &str, lane_id: &str, report: SyncReport) -> anyhow::Result<()> {
    if !report.synced_remote {
        anyhow::bail!("lane {}: {} failed at the lane registry, nothing changed", lane_id, action);
    }
    if !report.synced_local {
        anyhow::bail!(
            "lane {}: {} succeeded at the lane registry but the local store was not updated",
            lane_id,
            action
        );
    }
    Ok(())
}
