//! Driftnet Node -- single binary for LAN gossip file sharing.
//!
//! Usage:
//!   driftnet-node                      # Run with default config
//!   driftnet-node --config path.toml   # Run with custom config
//!   driftnet-node init-config          # Write the default config file

use clap::{Parser, Subcommand};

use driftnet_node::config::NodeConfig;
use driftnet_node::expand_tilde;

#[derive(Parser)]
#[command(name = "driftnet-node", about = "Driftnet LAN file-sharing node")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.driftnet/config.toml")]
    config: String,

    /// Override the node ID from the config
    #[arg(long)]
    id: Option<String>,

    /// Override the shared directory from the config
    #[arg(long)]
    shared_dir: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node (default)
    Run,
    /// Write a default config file at the --config path
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "driftnet_node=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let mut cfg = NodeConfig::load_or_default(&config_path)?;
    if let Some(id) = cli.id {
        cfg.node.id = id;
    }
    if let Some(shared_dir) = cli.shared_dir {
        cfg.node.shared_dir = shared_dir;
    }

    match cli.command {
        Some(Commands::InitConfig) => {
            if config_path.exists() {
                anyhow::bail!("{} already exists", config_path.display());
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&config_path, toml::to_string_pretty(&NodeConfig::default())?)?;
            println!("wrote {}", config_path.display());
            Ok(())
        }
        Some(Commands::Run) | None => run(cfg).await,
    }
}

async fn run(cfg: NodeConfig) -> anyhow::Result<()> {
    let node = driftnet_node::start(cfg).await?;
    let mut internal_shutdown = node.subscribe_shutdown();
    tracing::info!("all tasks spawned, press Ctrl-C to stop");

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("shutting down...");
        }
        _ = internal_shutdown.recv() => {
            tracing::error!("node stopped itself, shutting down...");
        }
    }
    node.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}
