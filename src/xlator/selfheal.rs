//! Self-heal daemon actor
//!
//! Toggling `self-heal-daemon` on a replicated or dispersed volume starts or
//! stops the node's self-heal daemon. The daemon is shared by every volume on
//! the node, so it is only stopped when no other started volume needs it.

use super::{ActorRegistry, OptionActor};
use crate::common::Result;
use crate::daemon::{ensure_started, Daemon};
use crate::env::NodeEnv;
use crate::volume::{split_option_key, VolState, Volinfo};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

pub const SELF_HEAL_KEY: &str = "self-heal-daemon";

/// Translators that own the self-heal option
pub const XLATORS: [&str; 2] = ["replicate", "afr"];

pub struct SelfHealActor;

impl SelfHealActor {
    pub fn register(registry: &mut ActorRegistry) -> Result<()> {
        let actor: Arc<dyn OptionActor> = Arc::new(SelfHealActor);
        for xlator in XLATORS {
            registry.register(&format!("{}.{}", xlator, SELF_HEAL_KEY), actor.clone())?;
        }
        Ok(())
    }
}

/// Heal applies to the volume's topology and is not switched off
pub fn is_heal_enabled(volinfo: &Volinfo) -> bool {
    if !volinfo.is_replicated() {
        return false;
    }
    let switched_off = volinfo.options.iter().any(|(key, value)| {
        matches!(
            split_option_key(key),
            Ok((xlator, SELF_HEAL_KEY)) if XLATORS.contains(&xlator)
        ) && value == "off"
    });
    !switched_off
}

/// Whether another started volume with bricks on this node still needs the daemon
async fn others_need_heal(env: &NodeEnv, volinfo: &Volinfo) -> Result<bool> {
    Ok(env.metadata.started_volumes().await?.iter().any(|v| {
        v.id != volinfo.id && is_heal_enabled(v) && !v.local_bricks(&env.node_id).is_empty()
    }))
}

fn daemon(env: &NodeEnv) -> Daemon {
    Daemon::selfheal(env.binaries.selfheal_binary.clone())
}

async fn start(env: &NodeEnv, volinfo: &Volinfo) -> Result<bool> {
    let started = ensure_started(env.daemons.as_ref(), &daemon(env)).await?;
    if started {
        info!(volume = %volinfo.name, "Self-heal daemon started");
    }
    Ok(started)
}

async fn stop_if_unused(env: &NodeEnv, volinfo: &Volinfo) -> Result<bool> {
    let shd = daemon(env);
    if env.metadata.get_daemon(&shd.id).await?.is_none() {
        debug!(volume = %volinfo.name, "Self-heal daemon not running");
        return Ok(false);
    }
    if others_need_heal(env, volinfo).await? {
        debug!(volume = %volinfo.name, "Self-heal daemon still needed by other volumes");
        return Ok(false);
    }
    info!(volume = %volinfo.name, "Stopping self-heal daemon");
    env.daemons.stop(&shd, true).await?;
    Ok(true)
}

#[async_trait]
impl OptionActor for SelfHealActor {
    async fn apply(&self, env: &NodeEnv, volinfo: &Volinfo, key: &str, value: &str) -> Result<bool> {
        if key != SELF_HEAL_KEY {
            return Ok(false);
        }
        match value {
            "on" if is_heal_enabled(volinfo) => start(env, volinfo).await,
            "off" if !is_heal_enabled(volinfo) => stop_if_unused(env, volinfo).await,
            _ => Ok(false),
        }
    }

    async fn undo(&self, env: &NodeEnv, volinfo: &Volinfo, key: &str, value: &str) -> Result<()> {
        if key != SELF_HEAL_KEY {
            return Ok(());
        }
        match value {
            "off" if !is_heal_enabled(volinfo) => {
                if volinfo.state != VolState::Started {
                    return Err(crate::Error::InvalidState(
                        "volume should be in started state".into(),
                    ));
                }
                start(env, volinfo).await.map(|_| ())
            }
            "on" if is_heal_enabled(volinfo) => stop_if_unused(env, volinfo).await.map(|_| ()),
            _ => Ok(()),
        }
    }
}
