//! Management node server
//!
//! Wires the store, daemon manager, registries, transaction engine and lock
//! manager together and serves the HTTP API.
//!
//! The lock authority holds both the lock table and the cluster store; every
//! other node reaches them over HTTP.

pub mod http;

pub use http::{create_router, AppState};

use crate::commands::{self, Cluster};
use crate::common::{http_url, Config, EventBus, HttpStore, KVStore, MemStore, Result};
use crate::daemon::{DaemonManager, MemDaemonManager, ProcessManager};
use crate::env::NodeEnv;
use crate::metadata::MetadataStore;
use crate::transaction::{
    registry, Engine, HttpLockBackend, HttpTransport, LockManager, MemLockBackend, StepExecutor,
    StepRegistry,
};
use crate::xlator::ActorRegistry;
use axum::Router;
use std::sync::Arc;
use tracing::info;

pub struct Node {
    config: Config,
    simulate_daemons: bool,
}

impl Node {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            simulate_daemons: false,
        }
    }

    /// Track daemons in memory instead of spawning processes
    pub fn simulate_daemons(mut self, simulate: bool) -> Self {
        self.simulate_daemons = simulate;
        self
    }

    /// Router over freshly built registries, without touching the process-wide one
    pub fn router(&self) -> Result<Router> {
        let mut steps = StepRegistry::new();
        let mut actors = ActorRegistry::new();
        commands::register_all(&mut steps, &mut actors)?;
        self.build(Arc::new(steps), Arc::new(actors))
    }

    fn build(&self, steps: Arc<StepRegistry>, actors: Arc<ActorRegistry>) -> Result<Router> {
        let config = &self.config;
        let lock_table = Arc::new(MemLockBackend::new());
        let store_table = Arc::new(MemStore::new());

        let (locks, kv): (LockManager, Arc<dyn KVStore>) = if config.is_lock_authority() {
            (
                LockManager::new(lock_table.clone(), config.lock_timeout()),
                store_table.clone() as Arc<dyn KVStore>,
            )
        } else {
            let authority = config.lock_authority();
            let addr = config.peers.get(authority).ok_or_else(|| {
                crate::Error::InvalidConfig(format!("no address for lock authority {}", authority))
            })?;
            let url = http_url(addr);
            (
                LockManager::new(
                    Arc::new(HttpLockBackend::new(url.clone(), config.rpc_timeout())?),
                    config.lock_timeout(),
                ),
                Arc::new(HttpStore::new(url, config.rpc_timeout())?) as Arc<dyn KVStore>,
            )
        };
        let metadata = MetadataStore::new(kv).for_node(&config.node_id);

        let daemons: Arc<dyn DaemonManager> = if self.simulate_daemons {
            Arc::new(MemDaemonManager::new(metadata.clone()))
        } else {
            std::fs::create_dir_all(&config.run_dir)?;
            Arc::new(ProcessManager::new(
                &config.run_dir,
                metadata.clone(),
                config.rpc_timeout(),
            ))
        };

        let env = NodeEnv::new(config.node_id.clone(), metadata.clone(), daemons, actors)
            .with_binaries(config.daemons.clone());
        let executor = Arc::new(StepExecutor::new(steps, Arc::new(env)));
        let transport = HttpTransport::new(config.peers.clone(), config.txn_timeout())?;
        let engine = Arc::new(Engine::new(
            executor.clone(),
            Arc::new(transport),
            config.txn_timeout(),
        ));

        let cluster = Cluster::new(engine, locks, metadata, EventBus::new(config.event_buffer));
        Ok(create_router(AppState {
            cluster,
            executor,
            lock_table,
            store_table,
        }))
    }

    pub async fn serve(self) -> Result<()> {
        let mut steps = StepRegistry::new();
        let mut actors = ActorRegistry::new();
        commands::register_all(&mut steps, &mut actors)?;
        let steps = registry::install(steps)?;
        info!(steps = steps.names().len(), actors = actors.len(), "Registered step functions and option actors");

        let router = self.build(steps, Arc::new(actors))?;

        info!("Starting clusterd: {}", self.config.node_id);
        info!("  API: {}", self.config.bind_addr);
        info!("  Peers: {}", self.config.peers.len());
        info!("  Lock authority: {}", self.config.lock_authority());
        if self.simulate_daemons {
            info!("  Daemons: simulated");
        } else {
            info!("  Run dir: {}", self.config.run_dir.display());
        }

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("clusterd stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
