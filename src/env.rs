//! Services a node exposes to step functions and option actors

use crate::common::DaemonConfig;
use crate::daemon::DaemonManager;
use crate::metadata::MetadataStore;
use crate::xlator::ActorRegistry;
use std::sync::Arc;

pub struct NodeEnv {
    /// Id of the node executing the step
    pub node_id: String,
    pub metadata: MetadataStore,
    pub daemons: Arc<dyn DaemonManager>,
    pub actors: Arc<ActorRegistry>,
    pub binaries: DaemonConfig,
}

impl NodeEnv {
    pub fn new(
        node_id: impl Into<String>,
        metadata: MetadataStore,
        daemons: Arc<dyn DaemonManager>,
        actors: Arc<ActorRegistry>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            metadata,
            daemons,
            actors,
            binaries: DaemonConfig::default(),
        }
    }

    pub fn with_binaries(mut self, binaries: DaemonConfig) -> Self {
        self.binaries = binaries;
        self
    }
}
