//! termgate - connects lane payment terminals to the cloud payment service.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{KeyCommand, LaneCommand, RunCommand};

/// termgate - terminal payment gateway.
///
/// Keeps one cloud connection per configured lane and forwards charge
/// instructions to the lane's payment terminal.
///
/// Configuration is read from ~/.termgate/config.yaml; the access key and
/// lanes are kept in a local store next to it.
#[derive(Parser)]
#[command(name = "termgate")]
#[command(about = "Terminal payment gateway")]
#[command(version)]
pub struct Cli {
    /// Config file (default is ~/.termgate/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway until interrupted
    Run(RunCommand),
    /// Manage the merchant access key
    Key(KeyCommand),
    /// Manage lanes
    Lane(LaneCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match &cli.command {
        Commands::Run(cmd) => cmd.run(&cli).await,
        Commands::Key(cmd) => cmd.run(&cli).await,
        Commands::Lane(cmd) => cmd.run(&cli).await,
    }
}
