//! CLI for volume operations

use clap::{Parser, Subcommand};
use clusterd::commands::{CreateVolumeRequest, SetOptionsRequest};
use clusterd::transaction::ErrorBody;
use clusterd::volume::{SubvolType, Volinfo};
use std::collections::BTreeMap;

#[derive(Parser)]
#[command(name = "clusterctl")]
#[command(about = "clusterd volume management CLI")]
#[command(version)]
struct Cli {
    /// Management node URL
    #[arg(long, default_value = "http://localhost:24007")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Volume operations
    #[command(subcommand)]
    Volume(VolumeCommands),
}

#[derive(Subcommand)]
enum VolumeCommands {
    /// Create a volume
    Create {
        name: String,

        /// Bricks as node:/path
        #[arg(required = true)]
        bricks: Vec<String>,

        /// Replica set size
        #[arg(long, conflicts_with = "disperse")]
        replica: Option<usize>,

        /// Disperse set size
        #[arg(long)]
        disperse: Option<usize>,
    },

    /// Start a volume
    Start { name: String },

    /// Stop a volume
    Stop { name: String },

    /// Set a volume option
    Set {
        name: String,
        key: String,
        value: String,
    },

    /// Show a volume
    Info { name: String },

    /// List volumes
    List,
}

async fn check(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(body) => anyhow::bail!("{} ({})", body.error, status),
        Err(_) => anyhow::bail!("request failed ({})", status),
    }
}

fn print_volume(vol: &Volinfo) {
    println!("Volume: {}", vol.name);
    println!("  ID: {}", vol.id);
    println!("  State: {}", vol.state);
    for sv in &vol.subvols {
        println!("  Subvolume {} ({:?}):", sv.name, sv.sv_type);
        for brick in &sv.bricks {
            println!("    {}", brick);
        }
    }
    if !vol.options.is_empty() {
        println!("  Options:");
        for (key, value) in &vol.options {
            println!("    {} = {}", key, value);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = format!("{}/v1/volumes", cli.server.trim_end_matches('/'));

    match cli.command {
        Commands::Volume(cmd) => match cmd {
            VolumeCommands::Create {
                name,
                bricks,
                replica,
                disperse,
            } => {
                let (vol_type, set_size) = match (replica, disperse) {
                    (Some(n), _) => (SubvolType::Replicate, n),
                    (_, Some(n)) => (SubvolType::Disperse, n),
                    _ => (SubvolType::Distribute, 0),
                };
                let req = CreateVolumeRequest {
                    name,
                    vol_type,
                    set_size,
                    bricks,
                    options: BTreeMap::new(),
                };
                let vol: Volinfo = check(client.post(&base).json(&req).send().await?)
                    .await?
                    .json()
                    .await?;
                println!("✓ Volume {} created", vol.name);
            }

            VolumeCommands::Start { name } => {
                let url = format!("{}/{}/start", base, name);
                check(client.post(&url).send().await?).await?;
                println!("✓ Volume {} started", name);
            }

            VolumeCommands::Stop { name } => {
                let url = format!("{}/{}/stop", base, name);
                check(client.post(&url).send().await?).await?;
                println!("✓ Volume {} stopped", name);
            }

            VolumeCommands::Set { name, key, value } => {
                let url = format!("{}/{}/options", base, name);
                let req = SetOptionsRequest {
                    options: BTreeMap::from([(key.clone(), value.clone())]),
                };
                check(client.post(&url).json(&req).send().await?).await?;
                println!("✓ {} set to {} on {}", key, value, name);
            }

            VolumeCommands::Info { name } => {
                let url = format!("{}/{}", base, name);
                let vol: Volinfo = check(client.get(&url).send().await?).await?.json().await?;
                print_volume(&vol);
            }

            VolumeCommands::List => {
                let vols: Vec<Volinfo> = check(client.get(&base).send().await?).await?.json().await?;
                if vols.is_empty() {
                    println!("No volumes");
                }
                for vol in &vols {
                    println!("{}\t{}\t{} bricks", vol.name, vol.state, vol.bricks().count());
                }
            }
        },
    }

    Ok(())
}
