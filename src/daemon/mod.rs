//! Daemon lifecycle adapter
//!
//! Storage daemons (brick servers, the self-heal daemon) are supervised
//! outside the transaction engine. Step and actor logic only sees the narrow
//! [`DaemonManager`] contract: start, stop, get an RPC handle, drop the store
//! record.

pub mod memory;
pub mod process;
pub mod rpc;

use crate::common::Result;
use crate::volume::Brick;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{error, info, warn};

pub use memory::{DaemonCall, MemDaemonManager};
pub use process::ProcessManager;
pub use rpc::HttpDaemonClient;

/// Id of the node-wide self-heal daemon
pub const SELFHEAL_DAEMON_ID: &str = "glustershd";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonKind {
    Brick,
    SelfHeal,
}

/// A managed daemon process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Daemon {
    pub id: String,
    pub name: String,
    pub kind: DaemonKind,
    pub binary: PathBuf,
    pub args: Vec<String>,
    /// `host:port` of the daemon's admin RPC endpoint
    pub rpc_addr: Option<String>,
}

impl Daemon {
    pub fn brick(brick: &Brick, binary: PathBuf) -> Self {
        let mut args = vec![
            "--volume".to_string(),
            brick.volume_name.clone(),
            "--brick".to_string(),
            brick.path.clone(),
        ];
        if let Some(port) = brick.port {
            args.push("--port".to_string());
            args.push(port.to_string());
        }
        Self {
            id: brick.id.to_string(),
            name: format!("brick:{}", brick),
            kind: DaemonKind::Brick,
            binary,
            args,
            rpc_addr: brick.port.map(|p| format!("127.0.0.1:{}", p)),
        }
    }

    pub fn selfheal(binary: PathBuf) -> Self {
        Self {
            id: SELFHEAL_DAEMON_ID.to_string(),
            name: SELFHEAL_DAEMON_ID.to_string(),
            kind: DaemonKind::SelfHeal,
            binary,
            args: Vec::new(),
            rpc_addr: None,
        }
    }
}

/// Brick admin operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum BrickOp {
    Terminate = 1,
}

impl BrickOp {
    pub fn method(&self) -> &'static str {
        match self {
            BrickOp::Terminate => "Brick.OpBrickTerminate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickOpRequest {
    /// Target path on the daemon (the brick path)
    pub name: String,
    pub op: i32,
}

impl BrickOpRequest {
    pub fn new(name: &str, op: BrickOp) -> Self {
        Self {
            name: name.to_string(),
            op: op as i32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrickOpResponse {
    pub op_ret: i32,
    #[serde(default)]
    pub op_errstr: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// RPC handle to a running daemon
#[async_trait]
pub trait DaemonRpc: Send + Sync {
    async fn call(&self, method: &str, req: &BrickOpRequest) -> Result<BrickOpResponse>;
}

#[async_trait]
pub trait DaemonManager: Send + Sync {
    /// Start a daemon. Fails with `Error::AlreadyRunning` if it is up.
    async fn start(&self, daemon: &Daemon, wait: bool) -> Result<()>;

    /// Signal-based stop (SIGTERM, SIGKILL when `force`)
    async fn stop(&self, daemon: &Daemon, force: bool) -> Result<()>;

    /// Connect to the daemon's admin endpoint. Fails with `Error::DaemonUnreachable`.
    async fn client(&self, daemon: &Daemon) -> Result<Box<dyn DaemonRpc>>;

    async fn del_daemon_record(&self, daemon: &Daemon) -> Result<()>;
}

/// Start a daemon, treating "already running" as success.
/// Returns false when the daemon was already up.
pub async fn ensure_started(manager: &dyn DaemonManager, daemon: &Daemon) -> Result<bool> {
    match manager.start(daemon, true).await {
        Ok(()) => Ok(true),
        Err(crate::Error::AlreadyRunning(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The daemon accepted the terminate RPC
    Graceful,
    /// Fell back to a signal
    Forced,
}

/// Graceful-then-forceful termination.
///
/// Sends a terminate RPC; if the daemon cannot be reached, reports a non-zero
/// status, or the call errors, falls back to a signal stop right away. The
/// fallback is never retried and its failures are only logged. After a
/// graceful exit the daemon cannot remove its own record, so it is deleted
/// here; a failure there is a warning since stale records are reconciled on
/// the next daemon restart.
pub async fn terminate_gracefully(
    manager: &dyn DaemonManager,
    daemon: &Daemon,
    target_path: &str,
) -> Termination {
    let client = match manager.client(daemon).await {
        Ok(client) => client,
        Err(e) => {
            error!(
                daemon = %daemon.name,
                error = %e,
                "Failed to connect to daemon, sending SIGTERM"
            );
            force_stop(manager, daemon).await;
            return Termination::Forced;
        }
    };

    let op = BrickOp::Terminate;
    let req = BrickOpRequest::new(target_path, op);
    match client.call(op.method(), &req).await {
        Ok(rsp) if rsp.op_ret == 0 => {}
        Ok(rsp) => {
            error!(
                daemon = %daemon.name,
                op_ret = rsp.op_ret,
                op_errstr = %rsp.op_errstr,
                "Terminate RPC rejected, sending SIGTERM"
            );
            force_stop(manager, daemon).await;
            return Termination::Forced;
        }
        Err(e) => {
            error!(
                daemon = %daemon.name,
                error = %e,
                "Failed to send terminate RPC, sending SIGTERM"
            );
            force_stop(manager, daemon).await;
            return Termination::Forced;
        }
    }

    info!(daemon = %daemon.name, "Daemon terminated gracefully");
    if let Err(e) = manager.del_daemon_record(daemon).await {
        warn!(
            name = %daemon.name,
            id = %daemon.id,
            error = %e,
            "Failed to delete daemon entry from store, it may be restarted on next startup"
        );
    }

    Termination::Graceful
}

async fn force_stop(manager: &dyn DaemonManager, daemon: &Daemon) {
    if let Err(e) = manager.stop(daemon, false).await {
        warn!(daemon = %daemon.name, error = %e, "Signal stop failed");
    }
}
