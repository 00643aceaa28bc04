//! Access key commands.

use clap::{Args, Subcommand};
use termgate_lanesync::LaneRegistry;
use termgate_lanesync::validate::validate_access_key;
use termgate_store::LaneStore;

use super::{get_config, mask_key, open_store, registry_client};
use crate::Cli;

/// Manage the merchant access key.
#[derive(Args)]
pub struct KeyCommand {
    #[command(subcommand)]
    command: KeySubcommand,
}

#[derive(Subcommand)]
enum KeySubcommand {
    /// Validate a key against the lane registry and store it
    Set {
        /// Access key (UUID)
        key: String,
    },
    /// Show the stored key, masked
    Show,
}

impl KeyCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = get_config(cli)?;
        let store = open_store(&config)?;

        match &self.command {
            KeySubcommand::Set { key } => {
                let key = key.trim();
                validate_access_key(key)?;

                let client = registry_client(&config, key)?;
                if !client.ping().await? {
                    anyhow::bail!("access key was rejected by the lane registry");
                }

                store.save_access_key(key)?;
                println!("Access key {} saved", mask_key(key));
            }
            KeySubcommand::Show => match store.get_access_key()? {
                Some(key) => println!("{}", mask_key(&key)),
                None => println!("No access key stored"),
            },
        }
        Ok(())
    }
}
