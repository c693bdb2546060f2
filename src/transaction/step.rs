//! Transaction steps

use serde::{Deserialize, Serialize};

/// One named unit of work and the nodes it must run on.
///
/// An empty node list means "the coordinating node only".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub do_func: String,
    #[serde(default)]
    pub undo_func: Option<String>,
    #[serde(default)]
    pub nodes: Vec<String>,
}

impl Step {
    pub fn new(do_func: impl Into<String>) -> Self {
        Self {
            do_func: do_func.into(),
            undo_func: None,
            nodes: Vec::new(),
        }
    }

    pub fn undo(mut self, undo_func: impl Into<String>) -> Self {
        self.undo_func = Some(undo_func.into());
        self
    }

    pub fn on<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nodes = nodes.into_iter().map(Into::into).collect();
        self
    }

    /// Compensating function, if the step is reversible
    pub fn undo_func(&self) -> Option<&str> {
        self.undo_func.as_deref().filter(|f| !f.is_empty())
    }

    pub fn is_local(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes to dispatch to, duplicates removed, in the order given
    pub fn targets(&self, local_node: &str) -> Vec<String> {
        if self.nodes.is_empty() {
            return vec![local_node.to_string()];
        }
        let mut targets: Vec<String> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !targets.contains(node) {
                targets.push(node.clone());
            }
        }
        targets
    }
}
