//! Configuration for clusterd

use crate::common::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment prefix for overrides, e.g. `CLUSTERD__NODE_ID=node-2`
pub const ENV_PREFIX: &str = "CLUSTERD";

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier within the cluster)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Bind address for the REST API and the peer channel
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Peer management nodes: node id -> base URL
    #[serde(default)]
    pub peers: HashMap<String, String>,

    /// Node holding the cluster lock table. Defaults to the smallest node id.
    #[serde(default)]
    pub lock_authority: Option<String>,

    /// Directory for pidfiles of managed daemons
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,

    /// Maximum wait for a cluster-wide resource lock
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    /// Deadline for a whole transaction, remote dispatch included
    #[serde(default = "default_txn_timeout")]
    pub txn_timeout_ms: u64,

    /// Connect/call timeout for RPCs to local daemons
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,

    /// Capacity of the notification bus
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Managed daemon binaries
    #[serde(default)]
    pub daemons: DaemonConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Binaries started on behalf of volumes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_brick_binary")]
    pub brick_binary: PathBuf,

    #[serde(default = "default_selfheal_binary")]
    pub selfheal_binary: PathBuf,
}

fn default_node_id() -> String {
    "localhost".to_string()
}
fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 24007))
}
fn default_run_dir() -> PathBuf {
    PathBuf::from("./run")
}
fn default_lock_timeout() -> u64 {
    30_000
}
fn default_txn_timeout() -> u64 {
    120_000
}
fn default_rpc_timeout() -> u64 {
    5_000
}
fn default_event_buffer() -> usize {
    64
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_brick_binary() -> PathBuf {
    PathBuf::from("/usr/sbin/glusterfsd")
}
fn default_selfheal_binary() -> PathBuf {
    PathBuf::from("/usr/sbin/glustershd")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            brick_binary: default_brick_binary(),
            selfheal_binary: default_selfheal_binary(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            bind_addr: default_bind_addr(),
            peers: HashMap::new(),
            lock_authority: None,
            run_dir: default_run_dir(),
            lock_timeout_ms: default_lock_timeout(),
            txn_timeout_ms: default_txn_timeout(),
            rpc_timeout_ms: default_rpc_timeout(),
            event_buffer: default_event_buffer(),
            daemons: DaemonConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply `CLUSTERD__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(crate::Error::InvalidConfig("node_id cannot be empty".into()));
        }
        if self.lock_timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "lock_timeout_ms must be positive".into(),
            ));
        }
        if let Some(authority) = &self.lock_authority {
            if authority != &self.node_id && !self.peers.contains_key(authority) {
                return Err(crate::Error::InvalidConfig(format!(
                    "lock_authority {} is neither this node nor a peer",
                    authority
                )));
            }
        }
        if self.event_buffer == 0 {
            return Err(crate::Error::InvalidConfig(
                "event_buffer must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Node whose lock table serializes transactions cluster-wide
    pub fn lock_authority(&self) -> &str {
        if let Some(authority) = &self.lock_authority {
            return authority;
        }
        self.peers
            .keys()
            .map(String::as_str)
            .chain(std::iter::once(self.node_id.as_str()))
            .min()
            .unwrap_or(self.node_id.as_str())
    }

    pub fn is_lock_authority(&self) -> bool {
        self.lock_authority() == self.node_id
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn txn_timeout(&self) -> Duration {
        Duration::from_millis(self.txn_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}
