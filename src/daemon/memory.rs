//! In-memory daemon manager
//!
//! Tracks daemons as entries in a map instead of processes. Used for
//! `clusterd --simulate-daemons` and for tests, where individual daemons can
//! be made unreachable or made to reject RPCs.

use super::{BrickOp, BrickOpRequest, BrickOpResponse, Daemon, DaemonManager, DaemonRpc};
use crate::common::Result;
use crate::metadata::MetadataStore;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Calls observed by the manager, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonCall {
    Start { id: String },
    Stop { id: String, force: bool },
    Terminate { id: String, path: String },
    DelRecord { id: String },
}

#[derive(Default)]
struct State {
    running: HashMap<String, Daemon>,
    unreachable: HashSet<String>,
    op_ret: HashMap<String, i32>,
    stop_failures: HashSet<String>,
    calls: Vec<DaemonCall>,
}

#[derive(Clone)]
pub struct MemDaemonManager {
    state: Arc<Mutex<State>>,
    metadata: MetadataStore,
}

impl MemDaemonManager {
    pub fn new(metadata: MetadataStore) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            metadata,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.state().running.contains_key(id)
    }

    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state().running.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn calls(&self) -> Vec<DaemonCall> {
        self.state().calls.clone()
    }

    /// Mark a daemon as started without going through `start`
    pub fn mark_running(&self, daemon: &Daemon) {
        self.state()
            .running
            .insert(daemon.id.clone(), daemon.clone());
    }

    /// `client()` for this daemon fails from now on
    pub fn set_unreachable(&self, id: &str) {
        self.state().unreachable.insert(id.to_string());
    }

    /// RPCs to this daemon answer with the given status
    pub fn set_op_ret(&self, id: &str, op_ret: i32) {
        self.state().op_ret.insert(id.to_string(), op_ret);
    }

    /// Signal stops for this daemon fail
    pub fn set_stop_failure(&self, id: &str) {
        self.state().stop_failures.insert(id.to_string());
    }
}

#[async_trait]
impl DaemonManager for MemDaemonManager {
    async fn start(&self, daemon: &Daemon, _wait: bool) -> Result<()> {
        {
            let mut state = self.state();
            state.calls.push(DaemonCall::Start {
                id: daemon.id.clone(),
            });
            if state.running.contains_key(&daemon.id) {
                return Err(crate::Error::AlreadyRunning(daemon.name.clone()));
            }
            state.running.insert(daemon.id.clone(), daemon.clone());
        }
        self.metadata.put_daemon(daemon).await
    }

    async fn stop(&self, daemon: &Daemon, force: bool) -> Result<()> {
        {
            let mut state = self.state();
            state.calls.push(DaemonCall::Stop {
                id: daemon.id.clone(),
                force,
            });
            if state.stop_failures.contains(&daemon.id) {
                return Err(crate::Error::Other(format!(
                    "failed to signal {}",
                    daemon.name
                )));
            }
            state.running.remove(&daemon.id);
        }
        self.metadata.del_daemon(&daemon.id).await
    }

    async fn client(&self, daemon: &Daemon) -> Result<Box<dyn DaemonRpc>> {
        let state = self.state();
        if state.unreachable.contains(&daemon.id) || !state.running.contains_key(&daemon.id) {
            return Err(crate::Error::DaemonUnreachable(daemon.name.clone()));
        }
        Ok(Box::new(MemDaemonClient {
            state: self.state.clone(),
            id: daemon.id.clone(),
        }))
    }

    async fn del_daemon_record(&self, daemon: &Daemon) -> Result<()> {
        self.state().calls.push(DaemonCall::DelRecord {
            id: daemon.id.clone(),
        });
        self.metadata.del_daemon(&daemon.id).await
    }
}

struct MemDaemonClient {
    state: Arc<Mutex<State>>,
    id: String,
}

#[async_trait]
impl DaemonRpc for MemDaemonClient {
    async fn call(&self, method: &str, req: &BrickOpRequest) -> Result<BrickOpResponse> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if req.op != BrickOp::Terminate as i32 {
            return Err(crate::Error::Rpc(format!("unsupported method {}", method)));
        }
        state.calls.push(DaemonCall::Terminate {
            id: self.id.clone(),
            path: req.name.clone(),
        });

        let op_ret = state.op_ret.get(&self.id).copied().unwrap_or(0);
        if op_ret == 0 {
            state.running.remove(&self.id);
        }
        Ok(BrickOpResponse {
            op_ret,
            op_errstr: if op_ret == 0 {
                String::new()
            } else {
                "terminate refused".to_string()
            },
            payload: None,
        })
    }
}
