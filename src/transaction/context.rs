//! Transaction context
//!
//! A serializable bag of parameters and intermediate results for one
//! transaction. When a step runs on a remote node the whole context travels
//! with the request and the returned copy is merged back.

use crate::common::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxnCtx {
    id: Uuid,
    req_id: String,
    #[serde(default)]
    data: BTreeMap<String, serde_json::Value>,
}

impl TxnCtx {
    /// Fresh context with a new transaction id, inheriting the request's correlation id
    pub fn new(req_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            req_id: req_id.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn req_id(&self) -> &str {
        &self.req_id
    }

    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| crate::Error::Serialization(format!("{}: {}", key, e)))?;
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .data
            .get(key)
            .ok_or_else(|| crate::Error::KeyNotFound(key.to_string()))?;
        T::deserialize(value).map_err(|e| crate::Error::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn delete(&mut self, key: &str) {
        self.data.remove(key);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    /// Fold a copy returned by a node back in. Keys from `other` win.
    pub fn merge(&mut self, other: TxnCtx) {
        if other.id != self.id {
            tracing::warn!(
                txn_id = %self.id,
                other_txn_id = %other.id,
                "Ignoring context merge from another transaction"
            );
            return;
        }
        self.data.extend(other.data);
    }

    /// Span every log line of this transaction is recorded in
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("txn", txn_id = %self.id, req_id = %self.req_id)
    }
}
