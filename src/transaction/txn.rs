//! Transaction coordinator
//!
//! A [`Txn`] is an ordered list of [`Step`]s run by the node that received
//! the request. Each step is dispatched to all of its target nodes at once;
//! a step succeeds only when every node succeeds. On the first failed step,
//! the steps that completed before it are compensated in reverse order by
//! running their undo functions on the same nodes. Undo is best effort: its
//! failures are logged and the forward error is what the caller sees.
//!
//! ```text
//!   step 1 ──► step 2 ──► step 3 ✗
//!                 │          │
//!   undo 1 ◄── undo 2 ◄──────┘
//! ```

use super::{Step, StepExecutor, Transport, TxnCtx};
use crate::common::{Error, Result};
use futures_util::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Runs transactions from this node
pub struct Engine {
    local: Arc<StepExecutor>,
    transport: Arc<dyn Transport>,
    txn_timeout: Duration,
}

impl Engine {
    pub fn new(local: Arc<StepExecutor>, transport: Arc<dyn Transport>, txn_timeout: Duration) -> Self {
        Self {
            local,
            transport,
            txn_timeout,
        }
    }

    pub fn node_id(&self) -> &str {
        self.local.node_id()
    }

    pub fn executor(&self) -> &Arc<StepExecutor> {
        &self.local
    }

    /// New empty transaction with a fresh id, correlated to `req_id`
    pub fn new_txn(self: &Arc<Self>, req_id: &str) -> Txn {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Txn {
            steps: Vec::new(),
            ctx: TxnCtx::new(req_id),
            engine: self.clone(),
            touched: BTreeSet::new(),
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
            timeout: self.txn_timeout,
            cleaned: false,
        }
    }

    async fn dispatch(&self, node: &str, func: &str, ctx: &TxnCtx) -> Result<TxnCtx> {
        if node == self.node_id() {
            self.local.execute(func, ctx.clone()).await
        } else {
            self.transport.run_step(node, func, ctx).await
        }
    }

    /// Run `func` on every node concurrently; results come back in node order.
    /// A node that has not answered by `deadline` fails with `Error::Timeout`.
    async fn dispatch_all(
        &self,
        nodes: &[String],
        func: &str,
        ctx: &TxnCtx,
        deadline: Instant,
    ) -> Vec<(String, Result<TxnCtx>)> {
        join_all(nodes.iter().map(|node| async move {
            let result = match tokio::time::timeout_at(deadline, self.dispatch(node, func, ctx)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "node {} did not finish {} before the transaction deadline",
                    node, func
                ))),
            };
            (node.clone(), result)
        }))
        .await
    }

    async fn cleanup_nodes(&self, nodes: &BTreeSet<String>, txn_id: Uuid) {
        for node in nodes {
            if node == self.node_id() {
                self.local.cleanup(txn_id);
            } else if let Err(e) = self.transport.cleanup(node, txn_id).await {
                warn!(txn_id = %txn_id, node = %node, error = %e, "Transaction cleanup failed");
            }
        }
    }
}

/// Cancels a running transaction from another task
#[derive(Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

pub struct Txn {
    pub steps: Vec<Step>,
    pub ctx: TxnCtx,
    engine: Arc<Engine>,
    touched: BTreeSet<String>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
    timeout: Duration,
    cleaned: bool,
}

impl Txn {
    pub fn id(&self) -> Uuid {
        self.ctx.id()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel_tx.clone())
    }

    /// Override the engine's deadline for this transaction
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Nodes this transaction has dispatched to so far
    pub fn touched_nodes(&self) -> Vec<String> {
        self.touched.iter().cloned().collect()
    }

    /// Execute all steps, compensating completed ones on failure
    pub async fn run(&mut self) -> Result<()> {
        let span = self.ctx.span();
        self.run_steps().instrument(span).await
    }

    async fn run_steps(&mut self) -> Result<()> {
        let registry = self.engine.local.registry();
        for step in &self.steps {
            registry.lookup(&step.do_func)?;
            if let Some(undo) = step.undo_func() {
                registry.lookup(undo)?;
            }
        }

        let local = self.engine.node_id().to_string();
        let deadline = Instant::now() + self.timeout;
        let steps = self.steps.clone();
        let mut completed: Vec<&Step> = Vec::with_capacity(steps.len());

        for step in &steps {
            let targets = step.targets(&local);
            self.touched.extend(targets.iter().cloned());
            debug!(step = %step.do_func, nodes = ?targets, "Dispatching step");

            if let Err((node, cause)) = self.run_step(step, &targets, deadline).await {
                error!(step = %step.do_func, node = %node, error = %cause, "Step failed, rolling back");
                self.rollback(&completed).await;
                return Err(Error::StepFailed {
                    step: step.do_func.clone(),
                    node,
                    source: Box::new(cause),
                });
            }
            completed.push(step);
        }

        info!(steps = steps.len(), "Transaction committed");
        Ok(())
    }

    /// Dispatch one step. On failure returns the first failing node in target
    /// order; a cancellation is attributed to this node.
    async fn run_step(
        &mut self,
        step: &Step,
        targets: &[String],
        deadline: Instant,
    ) -> std::result::Result<(), (String, Error)> {
        let engine = self.engine.clone();
        let ctx = self.ctx.clone();
        let mut cancel = self.cancel_rx.clone();

        let results = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                warn!(step = %step.do_func, "Transaction cancelled");
                return Err((engine.node_id().to_string(), Error::Cancelled));
            }
            results = engine.dispatch_all(targets, &step.do_func, &ctx, deadline) => results,
        };

        let mut failure = None;
        for (node, result) in results {
            match result {
                Ok(node_ctx) => self.ctx.merge(node_ctx),
                Err(e) if failure.is_none() => failure = Some((node, e)),
                Err(e) => warn!(step = %step.do_func, node = %node, error = %e, "Step also failed on node"),
            }
        }
        failure.map_or(Ok(()), Err)
    }

    async fn rollback(&mut self, completed: &[&Step]) {
        let local = self.engine.node_id().to_string();
        let engine = self.engine.clone();

        for step in completed.iter().rev() {
            let Some(undo) = step.undo_func() else {
                continue;
            };
            let targets = step.targets(&local);
            debug!(step = %undo, nodes = ?targets, "Dispatching undo");

            let deadline = Instant::now() + self.timeout;
            let results = engine.dispatch_all(&targets, undo, &self.ctx, deadline).await;

            for (node, result) in results {
                match result {
                    Ok(node_ctx) => self.ctx.merge(node_ctx),
                    Err(e) => {
                        let failure = Error::UndoFailed {
                            step: undo.to_string(),
                            node,
                            reason: e.to_string(),
                        };
                        warn!(error = %failure, "Undo failed, continuing rollback");
                    }
                }
            }
        }
    }

    /// Release per-transaction state on every node touched. Safe to call twice.
    pub async fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        self.engine.cleanup_nodes(&self.touched, self.ctx.id()).await;
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        if self.cleaned || self.touched.is_empty() {
            return;
        }
        let engine = self.engine.clone();
        let touched = std::mem::take(&mut self.touched);
        let txn_id = self.ctx.id();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { engine.cleanup_nodes(&touched, txn_id).await });
            }
            Err(_) => warn!(txn_id = %txn_id, "Transaction dropped outside a runtime, not cleaned up"),
        }
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::MemDaemonManager;
    use crate::env::NodeEnv;
    use crate::metadata::MetadataStore;
    use crate::transaction::{step_fn, InProcessTransport, StepRegistry};
    use crate::xlator::ActorRegistry;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn engine(register: impl FnOnce(&mut StepRegistry, &Log)) -> (Arc<Engine>, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = StepRegistry::new();
        register(&mut registry, &log);

        let metadata = MetadataStore::in_memory();
        let env = NodeEnv::new(
            "node-1",
            metadata.clone(),
            Arc::new(MemDaemonManager::new(metadata)),
            Arc::new(ActorRegistry::new()),
        );
        let exec = Arc::new(StepExecutor::new(Arc::new(registry), Arc::new(env)));
        let engine = Engine::new(exec, Arc::new(InProcessTransport::new()), Duration::from_secs(5));
        (Arc::new(engine), log)
    }

    fn recording(registry: &mut StepRegistry, log: &Log, name: &'static str, fail: bool) {
        let log = log.clone();
        registry
            .register(
                name,
                step_fn(move |_env, _ctx| {
                    let log = log.clone();
                    Box::pin(async move {
                        log.lock().unwrap().push(name.to_string());
                        if fail {
                            Err(Error::Other(format!("{} failed", name)))
                        } else {
                            Ok(())
                        }
                    })
                }),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let (engine, log) = engine(|r, log| {
            recording(r, log, "a.do", false);
            recording(r, log, "a.undo", false);
            recording(r, log, "b.do", false);
        });
        let mut txn = engine.new_txn("req-1");
        txn.steps = vec![Step::new("a.do").undo("a.undo"), Step::new("b.do")];
        txn.run().await.unwrap();
        txn.cleanup().await;

        assert_eq!(*log.lock().unwrap(), vec!["a.do", "b.do"]);
        assert!(engine.executor().active_txns().is_empty());
    }

    #[tokio::test]
    async fn test_failure_reports_step_and_node() {
        let (engine, log) = engine(|r, log| {
            recording(r, log, "a.do", false);
            recording(r, log, "a.undo", false);
            recording(r, log, "b.do", true);
            recording(r, log, "b.undo", false);
        });
        let mut txn = engine.new_txn("req-1");
        txn.steps = vec![
            Step::new("a.do").undo("a.undo"),
            Step::new("b.do").undo("b.undo"),
        ];
        let err = txn.run().await.unwrap_err();

        match err {
            Error::StepFailed { step, node, .. } => {
                assert_eq!(step, "b.do");
                assert_eq!(node, "node-1");
            }
            other => panic!("unexpected error: {}", other),
        }
        // the failed step itself is not compensated
        assert_eq!(*log.lock().unwrap(), vec!["a.do", "b.do", "a.undo"]);
    }

    #[tokio::test]
    async fn test_missing_func_dispatches_nothing() {
        let (engine, log) = engine(|r, log| recording(r, log, "a.do", false));
        let mut txn = engine.new_txn("req-1");
        txn.steps = vec![Step::new("a.do"), Step::new("b.missing")];

        assert!(matches!(txn.run().await, Err(Error::StepFuncNotFound(f)) if f == "b.missing"));
        assert!(log.lock().unwrap().is_empty());
        assert!(txn.touched_nodes().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_run() {
        let (engine, log) = engine(|r, log| recording(r, log, "a.do", false));
        let mut txn = engine.new_txn("req-1");
        txn.steps = vec![Step::new("a.do")];
        txn.cancel_handle().cancel();

        let err = txn.run().await.unwrap_err();
        assert!(matches!(&err, Error::StepFailed { step, node, .. } if step == "a.do" && node == "node-1"));
        assert!(matches!(err.root_cause(), Error::Cancelled));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_step_past_deadline_fails() {
        let (engine, log) = engine(|r, log| {
            recording(r, log, "a.do", false);
            recording(r, log, "a.undo", false);
            r.register(
                "slow.do",
                step_fn(|_env, _ctx| {
                    Box::pin(async {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok(())
                    })
                }),
            )
            .unwrap();
        });
        let mut txn = engine
            .new_txn("req-1")
            .with_timeout(Duration::from_millis(50));
        txn.steps = vec![Step::new("a.do").undo("a.undo"), Step::new("slow.do")];

        let err = txn.run().await.unwrap_err();
        assert!(matches!(&err, Error::StepFailed { step, .. } if step == "slow.do"));
        assert!(matches!(err.root_cause(), Error::Timeout(_)));
        assert_eq!(*log.lock().unwrap(), vec!["a.do", "a.undo"]);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let (engine, _log) = engine(|r, log| recording(r, log, "a.do", false));
        let mut txn = engine.new_txn("req-1");
        txn.steps = vec![Step::new("a.do")];
        txn.run().await.unwrap();
        assert_eq!(engine.executor().active_txns(), vec![txn.id()]);

        txn.cleanup().await;
        txn.cleanup().await;
        assert!(engine.executor().active_txns().is_empty());
    }

    #[tokio::test]
    async fn test_context_flows_between_steps() {
        let (engine, _log) = engine(|r, _log| {
            r.register(
                "produce",
                step_fn(|_env, ctx| Box::pin(async move { ctx.set("brick-count", &3u32) })),
            )
            .unwrap();
            r.register(
                "consume",
                step_fn(|_env, ctx| {
                    Box::pin(async move {
                        let n: u32 = ctx.get("brick-count")?;
                        ctx.set("doubled", &(n * 2))
                    })
                }),
            )
            .unwrap();
        });
        let mut txn = engine.new_txn("req-1");
        txn.steps = vec![Step::new("produce"), Step::new("consume")];
        txn.run().await.unwrap();
        assert_eq!(txn.ctx.get::<u32>("doubled").unwrap(), 6);
    }
}
