//! In-process cluster for integration tests
#![allow(dead_code)]

use clusterd::commands::{self, Cluster};
use clusterd::common::EventBus;
use clusterd::daemon::MemDaemonManager;
use clusterd::metadata::MetadataStore;
use clusterd::transaction::{
    Engine, InProcessTransport, LockManager, MemLockBackend, StepExecutor, StepRegistry,
};
use clusterd::xlator::ActorRegistry;
use clusterd::NodeEnv;
use std::sync::Arc;
use std::time::Duration;

pub struct TestNode {
    pub id: String,
    pub executor: Arc<StepExecutor>,
    pub daemons: MemDaemonManager,
    pub metadata: MetadataStore,
}

pub struct TestCluster {
    pub transport: Arc<InProcessTransport>,
    pub nodes: Vec<TestNode>,
    /// Cluster store every node reads and writes
    pub store: MetadataStore,
    pub lock_table: Arc<MemLockBackend>,
}

impl TestCluster {
    /// Nodes sharing one in-process transport, store and lock table.
    /// `register` fills each node's registry.
    pub fn new(ids: &[&str], register: impl Fn(&str, &mut StepRegistry, &mut ActorRegistry)) -> Self {
        let transport = Arc::new(InProcessTransport::new());
        let store = MetadataStore::in_memory();
        let nodes = ids
            .iter()
            .map(|id| {
                let mut steps = StepRegistry::new();
                let mut actors = ActorRegistry::new();
                register(id, &mut steps, &mut actors);

                let metadata = store.for_node(id);
                let daemons = MemDaemonManager::new(metadata.clone());
                let env = NodeEnv::new(
                    *id,
                    metadata.clone(),
                    Arc::new(daemons.clone()),
                    Arc::new(actors),
                );
                let executor = Arc::new(StepExecutor::new(Arc::new(steps), Arc::new(env)));
                transport.add_node(executor.clone());
                TestNode {
                    id: id.to_string(),
                    executor,
                    daemons,
                    metadata,
                }
            })
            .collect();
        Self {
            transport,
            nodes,
            store,
            lock_table: Arc::new(MemLockBackend::new()),
        }
    }

    /// Nodes running the shipped volume commands
    pub fn with_commands(ids: &[&str]) -> Self {
        Self::new(ids, |_, steps, actors| {
            commands::register_all(steps, actors).unwrap();
        })
    }

    pub fn node(&self, id: &str) -> &TestNode {
        self.nodes.iter().find(|n| n.id == id).unwrap()
    }

    /// Transaction engine coordinating from `id`
    pub fn engine(&self, id: &str) -> Arc<Engine> {
        Arc::new(Engine::new(
            self.node(id).executor.clone(),
            self.transport.clone(),
            Duration::from_secs(5),
        ))
    }

    /// Command handlers coordinating from `id`
    pub fn handlers(&self, id: &str, lock_timeout: Duration) -> Cluster {
        Cluster::new(
            self.engine(id),
            LockManager::new(self.lock_table.clone(), lock_timeout),
            self.node(id).metadata.clone(),
            EventBus::new(16),
        )
    }
}
