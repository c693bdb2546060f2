//! Key-value backend abstraction for the cluster store
//!
//! Every management node must see the same volume records, so the store is
//! held by one node (the lock authority) and reached by the others through
//! [`HttpStore`]. [`MemStore`] is the table the authority holds, and the
//! whole store for single-node setups and tests.

use crate::common::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

/// Trait for key-value storage backends
#[async_trait]
pub trait KVStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// All entries whose key starts with `prefix`, in key order
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}

/// In-memory store (default)
#[derive(Default)]
pub struct MemStore {
    map: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> crate::Error {
    crate::Error::StoreUnavailable("memory store lock poisoned".into())
}

#[async_trait]
impl KVStore for MemStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().map_err(|_| poisoned())?.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.map
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.map.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let map = self.map.read().map_err(|_| poisoned())?;
        Ok(map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

// === Wire types of the store endpoints ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreKey {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreEntry {
    pub key: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreValue {
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorePrefix {
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreEntries {
    pub entries: Vec<StoreEntry>,
}

/// Store table of a remote authority node
pub struct HttpStore {
    client: reqwest::Client,
    authority_url: String,
}

impl HttpStore {
    pub fn new(authority_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            authority_url: authority_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize + Sync>(&self, action: &str, body: &B) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/internal/v1/store/{}", self.authority_url, action))
            .json(body)
            .send()
            .await
            .map_err(|e| crate::Error::StoreUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(crate::Error::StoreUnavailable(format!(
                "store authority returned {}",
                response.status()
            )));
        }
        Ok(response)
    }
}

fn bad_reply(e: reqwest::Error) -> crate::Error {
    crate::Error::StoreUnavailable(format!("invalid store reply: {}", e))
}

#[async_trait]
impl KVStore for HttpStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let reply: StoreValue = self
            .post("get", &StoreKey { key: key.to_string() })
            .await?
            .json()
            .await
            .map_err(bad_reply)?;
        Ok(reply.value)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.post(
            "put",
            &StoreEntry {
                key: key.to_string(),
                value,
            },
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.post("delete", &StoreKey { key: key.to_string() }).await?;
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let reply: StoreEntries = self
            .post(
                "list",
                &StorePrefix {
                    prefix: prefix.to_string(),
                },
            )
            .await?
            .json()
            .await
            .map_err(bad_reply)?;
        Ok(reply.entries.into_iter().map(|e| (e.key, e.value)).collect())
    }
}
