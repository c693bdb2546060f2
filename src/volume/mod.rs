//! Volume metadata
//!
//! A volume is the resource most transactions mutate. Its bricks live on
//! cluster nodes; the set of those nodes is the target set of most steps.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolState {
    Created,
    Started,
    Stopped,
}

impl std::fmt::Display for VolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolState::Created => write!(f, "created"),
            VolState::Started => write!(f, "started"),
            VolState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubvolType {
    Distribute,
    Replicate,
    Disperse,
}

/// A brick: one export directory on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brick {
    pub id: Uuid,
    pub node_id: String,
    pub path: String,
    pub volume_name: String,
    /// Admin RPC port of the brick daemon, once it has been started
    #[serde(default)]
    pub port: Option<u16>,
}

impl Brick {
    pub fn new(volume_name: &str, node_id: &str, path: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_id: node_id.to_string(),
            path: path.to_string(),
            volume_name: volume_name.to_string(),
            port: None,
        }
    }
}

impl std::fmt::Display for Brick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.node_id, self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subvol {
    pub name: String,
    #[serde(rename = "type")]
    pub sv_type: SubvolType,
    pub bricks: Vec<Brick>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volinfo {
    pub id: Uuid,
    pub name: String,
    pub state: VolState,
    pub subvols: Vec<Subvol>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Volinfo {
    pub fn new(name: &str, subvols: Vec<Subvol>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            state: VolState::Created,
            subvols,
            options: BTreeMap::new(),
        }
    }

    pub fn bricks(&self) -> impl Iterator<Item = &Brick> {
        self.subvols.iter().flat_map(|sv| sv.bricks.iter())
    }

    /// Bricks hosted on `node_id`
    pub fn local_bricks(&self, node_id: &str) -> Vec<Brick> {
        self.bricks()
            .filter(|b| b.node_id == node_id)
            .cloned()
            .collect()
    }

    /// Distinct nodes hosting at least one brick, sorted
    pub fn nodes(&self) -> Vec<String> {
        self.bricks()
            .map(|b| b.node_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Has at least one replicated or dispersed subvolume
    pub fn is_replicated(&self) -> bool {
        self.subvols
            .iter()
            .any(|sv| matches!(sv.sv_type, SubvolType::Replicate | SubvolType::Disperse))
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// Split an option key of the form `xlator.key` (optionally `graph.xlator.key`)
/// into `(xlator, key)`.
pub fn split_option_key(full: &str) -> crate::Result<(&str, &str)> {
    let parts: Vec<&str> = full.split('.').collect();
    match parts.as_slice() {
        [xlator, key] | [_, xlator, key] if !xlator.is_empty() && !key.is_empty() => {
            Ok((*xlator, *key))
        }
        _ => Err(crate::Error::InvalidOption(format!(
            "option key must be of the form <xlator>.<key>: {}",
            full
        ))),
    }
}
