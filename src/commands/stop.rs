//! Volume stop

use super::Cluster;
use crate::common::{Event, EventKind, Result};
use crate::daemon::{terminate_gracefully, Daemon, Termination};
use crate::env::NodeEnv;
use crate::transaction::{Step, StepFunc, StepRegistry, TxnCtx};
use crate::volume::{Brick, VolState, Volinfo};
use async_trait::async_trait;
use tracing::{error, info};

pub const STEP_STOP_BRICKS: &str = "vol-stop.StopBricks";

pub fn register_step_funcs(registry: &mut StepRegistry) -> Result<()> {
    registry.register(STEP_STOP_BRICKS, StopBricks)
}

/// Terminate `bricks` gracefully, falling back to a signal per brick
pub(crate) async fn stop_bricks(env: &NodeEnv, volume: &str, bricks: &[Brick]) {
    for brick in bricks {
        info!(volume = %volume, brick = %brick, "Stopping brick");
        let daemon = Daemon::brick(brick, env.binaries.brick_binary.clone());
        if terminate_gracefully(env.daemons.as_ref(), &daemon, &brick.path).await == Termination::Forced {
            info!(volume = %volume, brick = %brick, "Brick stopped by signal");
        }
    }
}

/// Stops the bricks of the volume in `volinfo` hosted on this node.
///
/// Bricks that cannot be terminated over RPC are signalled instead; the step
/// itself never fails because of a brick.
pub struct StopBricks;

#[async_trait]
impl StepFunc for StopBricks {
    async fn run(&self, env: &NodeEnv, ctx: &mut TxnCtx) -> Result<()> {
        let volinfo: Volinfo = ctx.get("volinfo")?;
        let bricks = volinfo.local_bricks(&env.node_id);
        stop_bricks(env, &volinfo.name, &bricks).await;
        Ok(())
    }
}

impl Cluster {
    /// `POST /v1/volumes/{name}/stop`
    pub async fn stop_volume(&self, req_id: &str, name: &str) -> Result<Volinfo> {
        self.with_lock(name, || self.stop_locked(req_id, name)).await
    }

    async fn stop_locked(&self, req_id: &str, name: &str) -> Result<Volinfo> {
        let mut volinfo = self.metadata.get_volume(name).await?;
        if volinfo.state == VolState::Stopped {
            return Err(crate::Error::AlreadyStopped(name.to_string()));
        }

        let mut txn = self.engine.new_txn(req_id);
        txn.steps = vec![Step::new(STEP_STOP_BRICKS).on(volinfo.nodes())];
        txn.ctx.set("volinfo", &volinfo)?;

        if let Err(e) = self.run_txn(txn).await {
            error!(volume = %name, error = %e, "Transaction to stop volume failed");
            return Err(e);
        }

        volinfo.state = VolState::Stopped;
        self.metadata.put_volume(&volinfo).await?;
        self.publish(Event::new(EventKind::VolumeStopped, name, self.node_id()));
        info!(volume = %name, "Volume stopped");
        Ok(volinfo)
    }
}
