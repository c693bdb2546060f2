//! # clusterd
//!
//! Control plane of a clustered storage service. Every management node runs
//! `clusterd`; an administrative request received by any node is applied
//! across the nodes hosting the volume as a distributed transaction:
//! - a cluster-wide lock on the volume name
//! - an ordered list of steps, each dispatched to its nodes concurrently
//! - compensation in reverse order when a step fails (best effort undo)
//! - option actors reacting to configuration changes on each node
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!            REST request
//!                 │
//!        ┌────────▼─────────┐   lock    ┌──────────────────┐
//!        │  coordinating    ├──────────►│  lock authority  │
//!        │  node (Engine)   │           └──────────────────┘
//!        └──┬──────────┬────┘
//!   step    │          │   POST /internal/v1/txn/step
//!   (local) │          └─────────────┬──────────────┐
//!        ┌──▼───────────┐   ┌────────▼─────┐  ┌─────▼────────┐
//!        │ StepExecutor │   │ StepExecutor │  │ StepExecutor │
//!        │  + daemons   │   │  + daemons   │  │  + daemons   │
//!        └──────────────┘   └──────────────┘  └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a node
//! ```bash
//! clusterd serve \
//!   --id node-1 \
//!   --bind 0.0.0.0:24007 \
//!   --peers node-2=10.0.0.2:24007,node-3=10.0.0.3:24007
//! ```
//!
//! ### Use the CLI
//! ```bash
//! clusterctl volume create vol1 --replica 3 node-1:/b/1 node-2:/b/1 node-3:/b/1
//! clusterctl volume start vol1
//! clusterctl volume set vol1 replicate.self-heal-daemon off
//! clusterctl volume stop vol1
//! ```

pub mod commands;
pub mod common;
pub mod daemon;
pub mod env;
pub mod metadata;
pub mod server;
pub mod transaction;
pub mod volume;
pub mod xlator;

// Re-export commonly used types
pub use commands::Cluster;
pub use common::{Config, Error, Result};
pub use env::NodeEnv;
pub use server::Node;
pub use transaction::{Engine, Step, Txn, TxnCtx};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
