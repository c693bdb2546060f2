//! Typed view over the cluster store
//!
//! Stores:
//! - Volume metadata (name → volinfo), shared by every node
//! - Daemon records (node → daemon id → daemon), one namespace per node
//!
//! The transaction engine never writes here directly: request handlers read
//! before and write after running a transaction, and daemon lifecycle code
//! maintains the daemon records.

use crate::common::{KVStore, MemStore, Result};
use crate::daemon::Daemon;
use crate::volume::{VolState, Volinfo};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

const PREFIX_VOLUMES: &str = "volumes/";
const PREFIX_DAEMONS: &str = "daemons/";
const DEFAULT_NODE: &str = "localhost";

#[derive(Clone)]
pub struct MetadataStore {
    kv: Arc<dyn KVStore>,
    node_id: String,
}

impl MetadataStore {
    pub fn new(kv: Arc<dyn KVStore>) -> Self {
        Self {
            kv,
            node_id: DEFAULT_NODE.to_string(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemStore::new()))
    }

    /// Same store, with daemon records kept under `node_id`
    pub fn for_node(&self, node_id: &str) -> Self {
        Self {
            kv: self.kv.clone(),
            node_id: node_id.to_string(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn put_record<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.kv.put(key, bytes).await
    }

    async fn get_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv.get(key).await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_records<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        self.kv
            .list_prefix(prefix)
            .await?
            .into_iter()
            .map(|(_, bytes)| Ok(bincode::deserialize(&bytes)?))
            .collect()
    }

    // === Volume operations ===

    pub async fn get_volume(&self, name: &str) -> Result<Volinfo> {
        self.get_record(&format!("{}{}", PREFIX_VOLUMES, name))
            .await?
            .ok_or_else(|| crate::Error::VolumeNotFound(name.to_string()))
    }

    pub async fn volume_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .kv
            .get(&format!("{}{}", PREFIX_VOLUMES, name))
            .await?
            .is_some())
    }

    pub async fn put_volume(&self, volinfo: &Volinfo) -> Result<()> {
        self.put_record(&format!("{}{}", PREFIX_VOLUMES, volinfo.name), volinfo)
            .await
    }

    pub async fn list_volumes(&self) -> Result<Vec<Volinfo>> {
        self.list_records(PREFIX_VOLUMES).await
    }

    pub async fn started_volumes(&self) -> Result<Vec<Volinfo>> {
        Ok(self
            .list_volumes()
            .await?
            .into_iter()
            .filter(|v| v.state == VolState::Started)
            .collect())
    }

    // === Daemon operations ===

    fn daemon_prefix(&self) -> String {
        format!("{}{}/", PREFIX_DAEMONS, self.node_id)
    }

    fn daemon_key(&self, id: &str) -> String {
        format!("{}{}", self.daemon_prefix(), id)
    }

    pub async fn put_daemon(&self, daemon: &Daemon) -> Result<()> {
        self.put_record(&self.daemon_key(&daemon.id), daemon).await
    }

    pub async fn get_daemon(&self, id: &str) -> Result<Option<Daemon>> {
        self.get_record(&self.daemon_key(id)).await
    }

    pub async fn del_daemon(&self, id: &str) -> Result<()> {
        self.kv.delete(&self.daemon_key(id)).await
    }

    /// Daemon records of this node
    pub async fn list_daemons(&self) -> Result<Vec<Daemon>> {
        self.list_records(&self.daemon_prefix()).await
    }
}
