//! Option actors and their registry

use crate::common::Result;
use crate::env::NodeEnv;
use crate::volume::{split_option_key, Volinfo};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Node-side side effect of setting a volume option.
///
/// Both directions receive the volume as it looks *after* the change and the
/// value that was set. `undo` performs the inverse of `apply` for that value.
/// Implementations must tolerate the effect already being in place; `apply`
/// returns whether it changed anything on the node.
#[async_trait]
pub trait OptionActor: Send + Sync {
    async fn apply(&self, env: &NodeEnv, volinfo: &Volinfo, key: &str, value: &str) -> Result<bool>;

    async fn undo(&self, env: &NodeEnv, volinfo: &Volinfo, key: &str, value: &str) -> Result<()>;
}

/// Option key (`xlator.key`) → actor
#[derive(Default)]
pub struct ActorRegistry {
    actors: HashMap<String, Arc<dyn OptionActor>>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: &str, actor: Arc<dyn OptionActor>) -> Result<()> {
        let (xlator, short) = split_option_key(key)?;
        let key = format!("{}.{}", xlator, short);
        if self.actors.contains_key(&key) {
            return Err(crate::Error::DuplicateRegistration {
                kind: "option actor",
                name: key,
            });
        }
        self.actors.insert(key, actor);
        Ok(())
    }

    /// Actor for a full option key, with the key it should be called with.
    /// `cluster.afr.self-heal-daemon` resolves like `afr.self-heal-daemon`.
    pub fn find<'k>(&self, key: &'k str) -> Option<(Arc<dyn OptionActor>, &'k str)> {
        let (xlator, short) = split_option_key(key).ok()?;
        self.actors
            .get(&format!("{}.{}", xlator, short))
            .map(|actor| (actor.clone(), short))
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.actors.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl OptionActor for Noop {
        async fn apply(&self, _: &NodeEnv, _: &Volinfo, _: &str, _: &str) -> Result<bool> {
            Ok(false)
        }
        async fn undo(&self, _: &NodeEnv, _: &Volinfo, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_find() {
        let mut registry = ActorRegistry::new();
        registry.register("afr.self-heal-daemon", Arc::new(Noop)).unwrap();

        let (_, short) = registry.find("afr.self-heal-daemon").unwrap();
        assert_eq!(short, "self-heal-daemon");
        assert!(registry.find("cluster.afr.self-heal-daemon").is_some());
        assert!(registry.find("afr.metadata-self-heal").is_none());
        assert!(registry.find("garbage").is_none());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut registry = ActorRegistry::new();
        registry.register("afr.self-heal-daemon", Arc::new(Noop)).unwrap();
        assert!(matches!(
            registry.register("afr.self-heal-daemon", Arc::new(Noop)),
            Err(crate::Error::DuplicateRegistration { .. })
        ));
        assert_eq!(registry.len(), 1);
    }
}
