//! Distributed transaction engine
//!
//! - [`TxnCtx`]: serializable per-transaction key/value context
//! - [`LockManager`]: cluster-wide lock on a resource name
//! - [`StepRegistry`]: name → step function, frozen at startup
//! - [`StepExecutor`] / [`Transport`]: run a step locally or on a peer
//! - [`Engine`] / [`Txn`]: ordered steps with reverse compensation on failure

pub mod context;
pub mod dispatch;
pub mod lock;
pub mod registry;
pub mod step;
pub mod txn;

pub use context::TxnCtx;
pub use dispatch::{
    ErrorBody, HttpTransport, InProcessTransport, StepExecutor, StepRequest, StepResponse, Transport,
};
pub use lock::{HttpLockBackend, LockBackend, LockGuard, LockManager, LockRequest, LockResponse, MemLockBackend};
pub use registry::{step_fn, FnStep, StepFunc, StepRegistry};
pub use step::Step;
pub use txn::{CancelHandle, Engine, Txn};
