//! Step execution on a node, and the channel that carries steps to peers
//!
//! Every node runs a [`StepExecutor`] over the frozen step registry. The
//! coordinator reaches the executors of other nodes through a [`Transport`]:
//! [`HttpTransport`] posts to the peer's internal endpoints, while
//! [`InProcessTransport`] calls executors living in the same process.

use super::{StepRegistry, TxnCtx};
use crate::common::{http_url, Result};
use crate::env::NodeEnv;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRequest {
    pub func: String,
    pub ctx: TxnCtx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResponse {
    pub ctx: TxnCtx,
}

/// Error body returned by the HTTP API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Runs registered step functions against this node's environment
pub struct StepExecutor {
    registry: Arc<StepRegistry>,
    env: Arc<NodeEnv>,
    stash: Mutex<HashMap<Uuid, TxnCtx>>,
}

impl StepExecutor {
    pub fn new(registry: Arc<StepRegistry>, env: Arc<NodeEnv>) -> Self {
        Self {
            registry,
            env,
            stash: Mutex::new(HashMap::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.env.node_id
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn env(&self) -> &NodeEnv {
        &self.env
    }

    /// Run `func` on a copy of `ctx` and return the updated copy
    pub async fn execute(&self, func: &str, mut ctx: TxnCtx) -> Result<TxnCtx> {
        let step = self.registry.lookup(func)?;
        let span = ctx.span();
        async {
            debug!(step = %func, node = %self.env.node_id, "Running step");
            step.run(&self.env, &mut ctx).await
        }
        .instrument(span)
        .await?;

        self.stash
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(ctx.id(), ctx.clone());
        Ok(ctx)
    }

    /// Drop the node-local state of a finished transaction. Idempotent.
    pub fn cleanup(&self, txn_id: Uuid) {
        if self
            .stash
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&txn_id)
            .is_some()
        {
            debug!(txn_id = %txn_id, node = %self.env.node_id, "Transaction state cleaned up");
        }
    }

    /// Transactions with node-local state still held
    pub fn active_txns(&self) -> Vec<Uuid> {
        self.stash
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .copied()
            .collect()
    }
}

/// How the coordinator reaches the step executor of a peer node
#[async_trait]
pub trait Transport: Send + Sync {
    async fn run_step(&self, node: &str, func: &str, ctx: &TxnCtx) -> Result<TxnCtx>;

    async fn cleanup(&self, node: &str, txn_id: Uuid) -> Result<()>;
}

/// Peer channel over the internal HTTP API
pub struct HttpTransport {
    client: reqwest::Client,
    peers: HashMap<String, String>,
}

impl HttpTransport {
    /// `peers` maps node id to `host:port`
    pub fn new(peers: HashMap<String, String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, peers })
    }

    fn base_url(&self, node: &str) -> Result<String> {
        let addr = self
            .peers
            .get(node)
            .ok_or_else(|| crate::Error::RemoteDispatch {
                node: node.to_string(),
                reason: "unknown peer".into(),
            })?;
        Ok(http_url(addr))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn run_step(&self, node: &str, func: &str, ctx: &TxnCtx) -> Result<TxnCtx> {
        let url = format!("{}/internal/v1/txn/step", self.base_url(node)?);
        let dispatch_err = |reason: String| crate::Error::RemoteDispatch {
            node: node.to_string(),
            reason,
        };

        let response = self
            .client
            .post(&url)
            .json(&StepRequest {
                func: func.to_string(),
                ctx: ctx.clone(),
            })
            .send()
            .await
            .map_err(|e| dispatch_err(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let reason = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => format!("peer returned {}", status),
            };
            return Err(dispatch_err(reason));
        }

        let body: StepResponse = response
            .json()
            .await
            .map_err(|e| dispatch_err(format!("invalid response: {}", e)))?;
        Ok(body.ctx)
    }

    async fn cleanup(&self, node: &str, txn_id: Uuid) -> Result<()> {
        let url = format!("{}/internal/v1/txn/{}/cleanup", self.base_url(node)?, txn_id);
        let response =
            self.client
                .post(&url)
                .send()
                .await
                .map_err(|e| crate::Error::RemoteDispatch {
                    node: node.to_string(),
                    reason: e.to_string(),
                })?;
        if !response.status().is_success() {
            return Err(crate::Error::RemoteDispatch {
                node: node.to_string(),
                reason: format!("cleanup returned {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Peer channel to executors in the same process
///
/// The context still makes a JSON round trip so steps only ever see what
/// would have crossed the wire.
#[derive(Default)]
pub struct InProcessTransport {
    nodes: RwLock<HashMap<String, Arc<StepExecutor>>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, executor: Arc<StepExecutor>) {
        self.nodes
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(executor.node_id().to_string(), executor);
    }

    /// Make `node` unreachable
    pub fn remove_node(&self, node: &str) -> Option<Arc<StepExecutor>> {
        self.nodes
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(node)
    }

    fn executor(&self, node: &str) -> Result<Arc<StepExecutor>> {
        self.nodes
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(node)
            .cloned()
            .ok_or_else(|| crate::Error::RemoteDispatch {
                node: node.to_string(),
                reason: "node unreachable".into(),
            })
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn run_step(&self, node: &str, func: &str, ctx: &TxnCtx) -> Result<TxnCtx> {
        let executor = self.executor(node)?;
        let wire = serde_json::to_vec(ctx)?;
        let ctx: TxnCtx = serde_json::from_slice(&wire)?;
        executor.execute(func, ctx).await
    }

    async fn cleanup(&self, node: &str, txn_id: Uuid) -> Result<()> {
        self.executor(node)?.cleanup(txn_id);
        Ok(())
    }
}
