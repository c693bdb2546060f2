//! Volume start

use super::stop::{stop_bricks, STEP_STOP_BRICKS};
use super::Cluster;
use crate::common::{Event, EventKind, Result};
use crate::daemon::{ensure_started, Daemon};
use crate::env::NodeEnv;
use crate::transaction::{Step, StepFunc, StepRegistry, TxnCtx};
use crate::volume::{VolState, Volinfo};
use async_trait::async_trait;
use tracing::{error, info};

pub const STEP_START_BRICKS: &str = "vol-start.StartBricks";

pub fn register_step_funcs(registry: &mut StepRegistry) -> Result<()> {
    registry.register(STEP_START_BRICKS, StartBricks)
}

/// Starts the local bricks of the volume in `volinfo`. If one fails, the
/// bricks this step already started are stopped again.
pub struct StartBricks;

#[async_trait]
impl StepFunc for StartBricks {
    async fn run(&self, env: &NodeEnv, ctx: &mut TxnCtx) -> Result<()> {
        let volinfo: Volinfo = ctx.get("volinfo")?;
        let bricks = volinfo.local_bricks(&env.node_id);

        let mut started = Vec::new();
        for brick in &bricks {
            info!(volume = %volinfo.name, brick = %brick, "Starting brick");
            let daemon = Daemon::brick(brick, env.binaries.brick_binary.clone());
            match ensure_started(env.daemons.as_ref(), &daemon).await {
                Ok(true) => started.push(brick.clone()),
                Ok(false) => {}
                Err(e) => {
                    error!(volume = %volinfo.name, brick = %brick, error = %e, "Failed to start brick");
                    stop_bricks(env, &volinfo.name, &started).await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

impl Cluster {
    /// `POST /v1/volumes/{name}/start`
    pub async fn start_volume(&self, req_id: &str, name: &str) -> Result<Volinfo> {
        self.with_lock(name, || self.start_locked(req_id, name)).await
    }

    async fn start_locked(&self, req_id: &str, name: &str) -> Result<Volinfo> {
        let mut volinfo = self.metadata.get_volume(name).await?;
        if volinfo.state == VolState::Started {
            return Err(crate::Error::AlreadyStarted(name.to_string()));
        }

        let mut txn = self.engine.new_txn(req_id);
        txn.steps = vec![Step::new(STEP_START_BRICKS)
            .undo(STEP_STOP_BRICKS)
            .on(volinfo.nodes())];
        txn.ctx.set("volinfo", &volinfo)?;

        if let Err(e) = self.run_txn(txn).await {
            error!(volume = %name, error = %e, "Transaction to start volume failed");
            return Err(e);
        }

        volinfo.state = VolState::Started;
        self.metadata.put_volume(&volinfo).await?;
        self.publish(Event::new(EventKind::VolumeStarted, name, self.node_id()));
        info!(volume = %name, "Volume started");
        Ok(volinfo)
    }
}
