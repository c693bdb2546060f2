//! Volume command handlers
//!
//! Each handler follows the same sequence: take the volume lock, read the
//! volume, check preconditions, build the steps with explicit node sets,
//! run the transaction, persist the new state and publish an event. The
//! lock is released and the transaction cleaned up on every exit path.

pub mod create;
pub mod options;
pub mod start;
pub mod stop;

pub use create::CreateVolumeRequest;
pub use options::SetOptionsRequest;

use crate::common::{Event, EventBus, Result};
use crate::metadata::MetadataStore;
use crate::transaction::{Engine, LockManager, StepRegistry, Txn};
use crate::xlator::{self, ActorRegistry};
use std::future::Future;
use std::sync::Arc;

/// Register the step functions of every command
pub fn register_step_funcs(registry: &mut StepRegistry) -> Result<()> {
    stop::register_step_funcs(registry)?;
    start::register_step_funcs(registry)?;
    xlator::register_step_funcs(registry)?;
    Ok(())
}

/// Startup registration hook: all step functions and option actors.
/// Fails on the first duplicate name.
pub fn register_all(steps: &mut StepRegistry, actors: &mut ActorRegistry) -> Result<()> {
    register_step_funcs(steps)?;
    xlator::register_actors(actors)?;
    Ok(())
}

/// State shared by the command handlers of a node
#[derive(Clone)]
pub struct Cluster {
    pub engine: Arc<Engine>,
    pub locks: LockManager,
    pub metadata: MetadataStore,
    pub events: EventBus,
}

impl Cluster {
    pub fn new(engine: Arc<Engine>, locks: LockManager, metadata: MetadataStore, events: EventBus) -> Self {
        Self {
            engine,
            locks,
            metadata,
            events,
        }
    }

    pub fn node_id(&self) -> &str {
        self.engine.node_id()
    }

    /// Run `f` holding the lock on `name`; the lock is released whatever `f` returns.
    pub(crate) async fn with_lock<T, F, Fut>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut lock = self.locks.lock(name).await?;
        let result = f().await;
        lock.release().await;
        result
    }

    /// Run `txn`, then clean it up whatever the outcome
    pub(crate) async fn run_txn(&self, mut txn: Txn) -> Result<()> {
        let result = txn.run().await;
        txn.cleanup().await;
        result
    }

    pub(crate) fn publish(&self, event: Event) {
        self.events.publish(event);
    }
}
