//! Coordinator binary

use clap::{Parser, Subcommand};
use memgrid::common::CoordinatorConfig;
use memgrid::Coordinator;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "memgrid-coord")]
#[command(about = "memgrid cluster membership coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Node ID
        #[arg(long)]
        id: String,

        /// Bind address for the HTTP API
        #[arg(long, default_value = "0.0.0.0:5000")]
        bind: String,

        /// Config file (CLI arguments take priority)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Initial number of concurrent update RPCs
        #[arg(long, default_value = "5")]
        concurrent_updates: usize,

        /// Update RPC timeout in milliseconds (0 = infinite)
        #[arg(long, default_value = "0")]
        rpc_timeout_ms: u64,

        /// Crash-verification ping timeout in milliseconds
        #[arg(long, default_value = "250")]
        ping_timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            bind,
            config,
            concurrent_updates,
            rpc_timeout_ms,
            ping_timeout_ms,
        } => {
            let mut coord_config = CoordinatorConfig {
                bind_addr: bind.parse()?,
                concurrent_updates,
                rpc_timeout_ms,
                ping_timeout_ms,
            };

            // Start from the file config when one is given; explicit CLI
            // values above already took priority for the common flags.
            if let Some(path) = config {
                let file_config = memgrid::Config::from_file(&path)?;
                file_config.validate()?;
                if let Some(file_coord) = file_config.coordinator {
                    let defaults = CoordinatorConfig::default();
                    if coord_config.concurrent_updates == defaults.concurrent_updates {
                        coord_config.concurrent_updates = file_coord.concurrent_updates;
                    }
                    if coord_config.rpc_timeout_ms == defaults.rpc_timeout_ms {
                        coord_config.rpc_timeout_ms = file_coord.rpc_timeout_ms;
                    }
                    if coord_config.ping_timeout_ms == defaults.ping_timeout_ms {
                        coord_config.ping_timeout_ms = file_coord.ping_timeout_ms;
                    }
                }
            }

            let coord = Coordinator::new(coord_config, id);
            coord.serve().await?;
        }
    }

    Ok(())
}
