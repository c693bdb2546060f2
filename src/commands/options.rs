//! Volume option set

use super::Cluster;
use crate::common::{Event, EventKind, Result};
use crate::transaction::Step;
use crate::volume::{split_option_key, VolState, Volinfo};
use crate::xlator::{STEP_DO_SET, STEP_UNDO_SET};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetOptionsRequest {
    pub options: BTreeMap<String, String>,
}

impl SetOptionsRequest {
    pub fn validate(&self) -> Result<()> {
        if self.options.is_empty() {
            return Err(crate::Error::InvalidOption("no options given".into()));
        }
        for (key, value) in &self.options {
            split_option_key(key)?;
            if value.is_empty() {
                return Err(crate::Error::InvalidOption(format!("empty value for {}", key)));
            }
        }
        Ok(())
    }
}

impl Cluster {
    /// `POST /v1/volumes/{name}/options`
    pub async fn set_volume_options(&self, req_id: &str, name: &str, req: SetOptionsRequest) -> Result<Volinfo> {
        req.validate()?;
        self.with_lock(name, || self.set_options_locked(req_id, name, req.options))
            .await
    }

    async fn set_options_locked(
        &self,
        req_id: &str,
        name: &str,
        options: BTreeMap<String, String>,
    ) -> Result<Volinfo> {
        let mut volinfo = self.metadata.get_volume(name).await?;
        volinfo
            .options
            .extend(options.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut txn = self.engine.new_txn(req_id);
        // Actors act on running daemons; a volume that is not started only
        // needs its record updated.
        if volinfo.state == VolState::Started {
            txn.steps = vec![Step::new(STEP_DO_SET)
                .undo(STEP_UNDO_SET)
                .on(volinfo.nodes())];
        }
        txn.ctx.set("volinfo", &volinfo)?;
        txn.ctx.set("options", &options)?;

        if let Err(e) = self.run_txn(txn).await {
            error!(volume = %name, error = %e, "Transaction to set volume options failed");
            return Err(e);
        }

        self.metadata.put_volume(&volinfo).await?;
        self.publish(
            Event::new(EventKind::VolumeOptionsSet, name, self.node_id())
                .with_data(serde_json::to_value(&options)?),
        );
        info!(volume = %name, count = options.len(), "Volume options set");
        Ok(volinfo)
    }
}
