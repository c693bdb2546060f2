//! Volume option actors
//!
//! Most volume options only change the volume record. Some also need work on
//! every node hosting the volume, such as starting a daemon. Such work lives
//! in an [`OptionActor`] registered for the option key; the generic
//! `vol-option` step functions below look actors up and drive them.

pub mod actor;
pub mod selfheal;

pub use actor::{ActorRegistry, OptionActor};
pub use selfheal::SelfHealActor;

use crate::common::Result;
use crate::env::NodeEnv;
use crate::transaction::{StepFunc, StepRegistry, TxnCtx};
use crate::volume::Volinfo;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const STEP_DO_SET: &str = "vol-option.XlatorActionDoSet";
pub const STEP_UNDO_SET: &str = "vol-option.XlatorActionUndoSet";

/// Register every actor shipped with clusterd
pub fn register_actors(registry: &mut ActorRegistry) -> Result<()> {
    SelfHealActor::register(registry)
}

pub fn register_step_funcs(registry: &mut StepRegistry) -> Result<()> {
    registry.register(STEP_DO_SET, XlatorActionDoSet)?;
    registry.register(STEP_UNDO_SET, XlatorActionUndoSet)?;
    Ok(())
}

fn read_ctx(ctx: &TxnCtx) -> Result<(Volinfo, BTreeMap<String, String>)> {
    Ok((ctx.get("volinfo")?, ctx.get("options")?))
}

/// Applies the actors of each option in the request. If one fails, the
/// actors that changed something in this step are undone before returning.
/// An actor that found nothing to do is left alone.
pub struct XlatorActionDoSet;

#[async_trait]
impl StepFunc for XlatorActionDoSet {
    async fn run(&self, env: &NodeEnv, ctx: &mut TxnCtx) -> Result<()> {
        let (volinfo, options) = read_ctx(ctx)?;
        let mut applied: Vec<(Arc<dyn OptionActor>, &str, &str)> = Vec::new();

        for (full_key, value) in &options {
            let Some((actor, key)) = env.actors.find(full_key) else {
                continue;
            };
            info!(volume = %volinfo.name, option = %full_key, value = %value, "Applying option actor");
            match actor.apply(env, &volinfo, key, value).await {
                Ok(true) => applied.push((actor, key, value.as_str())),
                Ok(false) => {}
                Err(e) => {
                    for (actor, key, value) in applied.iter().rev() {
                        if let Err(undo_err) = actor.undo(env, &volinfo, key, value).await {
                            warn!(volume = %volinfo.name, option = %key, error = %undo_err, "Failed to revert option actor");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

/// Runs the inverse of every option actor; keeps going past failures and
/// returns the first one.
pub struct XlatorActionUndoSet;

#[async_trait]
impl StepFunc for XlatorActionUndoSet {
    async fn run(&self, env: &NodeEnv, ctx: &mut TxnCtx) -> Result<()> {
        let (volinfo, options) = read_ctx(ctx)?;
        let mut first_err = None;

        for (full_key, value) in options.iter().rev() {
            let Some((actor, key)) = env.actors.find(full_key) else {
                continue;
            };
            if let Err(e) = actor.undo(env, &volinfo, key, value).await {
                warn!(volume = %volinfo.name, option = %full_key, error = %e, "Option actor undo failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::{MemDaemonManager, SELFHEAL_DAEMON_ID};
    use crate::metadata::MetadataStore;
    use crate::volume::tests::replica_volume;
    use crate::volume::{SubvolType, VolState};
    use std::sync::Mutex;

    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        fail_apply: bool,
    }

    #[async_trait]
    impl OptionActor for Recorder {
        async fn apply(&self, _: &NodeEnv, _: &Volinfo, key: &str, value: &str) -> Result<bool> {
            self.log.lock().unwrap().push(format!("apply {}={}", key, value));
            if self.fail_apply {
                return Err(crate::Error::Other("apply failed".into()));
            }
            Ok(true)
        }

        async fn undo(&self, _: &NodeEnv, _: &Volinfo, key: &str, value: &str) -> Result<()> {
            self.log.lock().unwrap().push(format!("undo {}={}", key, value));
            Ok(())
        }
    }

    fn env_with(actors: ActorRegistry) -> (NodeEnv, MemDaemonManager) {
        let metadata = MetadataStore::in_memory();
        let daemons = MemDaemonManager::new(metadata.clone());
        let env = NodeEnv::new("node-1", metadata, Arc::new(daemons.clone()), Arc::new(actors));
        (env, daemons)
    }

    fn ctx_for(volinfo: &Volinfo, options: &[(&str, &str)]) -> TxnCtx {
        let options: BTreeMap<String, String> = options
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut ctx = TxnCtx::new("req-1");
        ctx.set("volinfo", volinfo).unwrap();
        ctx.set("options", &options).unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_options_without_actor_are_noops() {
        let (env, daemons) = env_with(ActorRegistry::new());
        let vol = replica_volume("vol1", &["node-1"]);
        let mut ctx = ctx_for(&vol, &[("performance.cache-size", "64MB")]);

        XlatorActionDoSet.run(&env, &mut ctx).await.unwrap();
        XlatorActionUndoSet.run(&env, &mut ctx).await.unwrap();
        assert!(daemons.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_actor_reverts_earlier_ones() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut actors = ActorRegistry::new();
        actors
            .register("a.first", Arc::new(Recorder { log: log.clone(), fail_apply: false }))
            .unwrap();
        actors
            .register("b.second", Arc::new(Recorder { log: log.clone(), fail_apply: true }))
            .unwrap();
        let (env, _) = env_with(actors);
        let vol = replica_volume("vol1", &["node-1"]);
        let mut ctx = ctx_for(&vol, &[("a.first", "on"), ("b.second", "on")]);

        assert!(XlatorActionDoSet.run(&env, &mut ctx).await.is_err());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["apply first=on", "apply second=on", "undo first=on"]
        );
    }

    #[tokio::test]
    async fn test_heal_on_for_distribute_volume_starts_nothing() {
        let mut actors = ActorRegistry::new();
        register_actors(&mut actors).unwrap();
        let (env, daemons) = env_with(actors);

        let mut vol = replica_volume("vol1", &["node-1"]);
        vol.subvols[0].sv_type = SubvolType::Distribute;
        vol.state = VolState::Started;
        vol.options.insert("replicate.self-heal-daemon".into(), "on".into());
        let mut ctx = ctx_for(&vol, &[("replicate.self-heal-daemon", "on")]);

        XlatorActionDoSet.run(&env, &mut ctx).await.unwrap();
        assert!(daemons.calls().is_empty());
    }

    #[tokio::test]
    async fn test_heal_on_for_replicate_volume_starts_daemon() {
        let mut actors = ActorRegistry::new();
        register_actors(&mut actors).unwrap();
        let (env, daemons) = env_with(actors);

        let mut vol = replica_volume("vol1", &["node-1"]);
        vol.state = VolState::Started;
        let mut ctx = ctx_for(&vol, &[("cluster.afr.self-heal-daemon", "on")]);

        XlatorActionDoSet.run(&env, &mut ctx).await.unwrap();
        assert!(daemons.is_running(SELFHEAL_DAEMON_ID));

        XlatorActionUndoSet.run(&env, &mut ctx).await.unwrap();
        assert!(!daemons.is_running(SELFHEAL_DAEMON_ID));
    }

    #[tokio::test]
    async fn test_failed_actor_leaves_running_daemon_alone() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut actors = ActorRegistry::new();
        register_actors(&mut actors).unwrap();
        actors
            .register("z.broken", Arc::new(Recorder { log: log.clone(), fail_apply: true }))
            .unwrap();
        let (env, daemons) = env_with(actors);

        let mut vol = replica_volume("vol1", &["node-1"]);
        vol.state = VolState::Started;
        vol.options.insert("replicate.self-heal-daemon".into(), "on".into());
        env.metadata.put_volume(&vol).await.unwrap();
        let shd = crate::daemon::Daemon::selfheal(env.binaries.selfheal_binary.clone());
        crate::daemon::ensure_started(&daemons, &shd).await.unwrap();

        let mut ctx = ctx_for(
            &vol,
            &[("replicate.self-heal-daemon", "on"), ("z.broken", "on")],
        );
        assert!(XlatorActionDoSet.run(&env, &mut ctx).await.is_err());
        assert!(daemons.is_running(SELFHEAL_DAEMON_ID));
        assert_eq!(*log.lock().unwrap(), vec!["apply broken=on"]);
    }

    #[test]
    fn test_actor_registration_twice_fails() {
        let mut actors = ActorRegistry::new();
        register_actors(&mut actors).unwrap();
        assert!(register_actors(&mut actors).is_err());
        assert_eq!(actors.keys(), vec!["afr.self-heal-daemon", "replicate.self-heal-daemon"]);
    }
}
