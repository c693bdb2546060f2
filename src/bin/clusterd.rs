//! Management daemon binary

use clap::{Parser, Subcommand};
use clusterd::common::{parse_duration, Config};
use clusterd::Node;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "clusterd")]
#[command(about = "Storage cluster management daemon")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the management daemon
    Serve {
        /// Node ID
        #[arg(long)]
        id: Option<String>,

        /// Bind address for the API and the peer channel
        #[arg(long)]
        bind: Option<String>,

        /// Peer nodes as id=host:port (comma-separated)
        #[arg(long, value_delimiter = ',')]
        peers: Vec<String>,

        /// Node holding the cluster lock table
        #[arg(long)]
        lock_authority: Option<String>,

        /// Directory for daemon pidfiles
        #[arg(long)]
        run_dir: Option<PathBuf>,

        /// Lock acquisition timeout (e.g. "30s")
        #[arg(long)]
        lock_timeout: Option<String>,

        /// Transaction deadline (e.g. "2m")
        #[arg(long)]
        txn_timeout: Option<String>,

        /// Track daemons in memory instead of spawning them
        #[arg(long)]
        simulate_daemons: bool,
    },
}

fn parse_peer(peer: &str) -> anyhow::Result<(String, String)> {
    match peer.split_once('=') {
        Some((id, addr)) if !id.is_empty() && !addr.is_empty() => {
            Ok((id.to_string(), addr.to_string()))
        }
        _ => anyhow::bail!("peer must be <id>=<host:port>: {}", peer),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config from file and environment, then override with CLI arguments
    let mut config = Config::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            id,
            bind,
            peers,
            lock_authority,
            run_dir,
            lock_timeout,
            txn_timeout,
            simulate_daemons,
        } => {
            if let Some(id) = id {
                config.node_id = id;
            }
            if let Some(bind) = bind {
                config.bind_addr = bind.parse()?;
            }
            for peer in &peers {
                let (id, addr) = parse_peer(peer)?;
                config.peers.insert(id, addr);
            }
            if lock_authority.is_some() {
                config.lock_authority = lock_authority;
            }
            if let Some(run_dir) = run_dir {
                config.run_dir = run_dir;
            }
            if let Some(timeout) = lock_timeout {
                config.lock_timeout_ms = parse_duration(&timeout)?.as_millis() as u64;
            }
            if let Some(timeout) = txn_timeout {
                config.txn_timeout_ms = parse_duration(&timeout)?.as_millis() as u64;
            }
            config.validate()?;

            Node::new(config)
                .simulate_daemons(simulate_daemons)
                .serve()
                .await?;
        }
    }

    Ok(())
}
