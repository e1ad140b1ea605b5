// SPDX-License-Identifier: MIT OR Apache-2.0
//! Courier node CLI.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use courier_config::CourierConfig;
use courier_node::Node;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "courier-node", version, about = "Delay-tolerant bundle courier node")]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node with its background tasks until interrupted.
    Run,
    /// Print cache, forwarding, and trust statistics as JSON.
    Stats,
}

fn load_config(path: Option<&PathBuf>) -> Result<CourierConfig> {
    match path {
        Some(path) => CourierConfig::from_toml_path(path)
            .with_context(|| format!("load config {}", path.display())),
        None => Ok(CourierConfig::default()),
    }
}

fn init_tracing(config: &CourierConfig) {
    let default = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config);

    match cli.command {
        Command::Run => {
            let node = Node::open(config).await?;
            let tasks = node.start_background();
            info!("node running; ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
            info!("shutting down");
            tasks.stop().await;
        }
        Command::Stats => {
            let node = Node::open(config).await?;
            let stats = serde_json::json!({
                "node": node.keys.fingerprint(),
                "cache": node.cache.stats().await?,
                "forwarding": node.policy.stats().await?,
                "trust": node.trust.stats().await,
            });
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}
