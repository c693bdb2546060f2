//! Volume create, info and list

use super::Cluster;
use crate::common::{validate_name, Event, EventKind, Result};
use crate::volume::{Brick, Subvol, SubvolType, Volinfo};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// First port handed to brick daemons
pub const BRICK_PORT_BASE: u16 = 49152;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    pub name: String,
    #[serde(rename = "type", default = "default_type")]
    pub vol_type: SubvolType,
    /// Bricks per replica or disperse set
    #[serde(default)]
    pub set_size: usize,
    /// `node:/path`
    pub bricks: Vec<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

fn default_type() -> SubvolType {
    SubvolType::Distribute
}

fn parse_brick(volume: &str, spec: &str) -> Result<Brick> {
    match spec.split_once(':') {
        Some((node, path)) if !node.is_empty() && path.starts_with('/') => {
            Ok(Brick::new(volume, node, path))
        }
        _ => Err(crate::Error::InvalidRequest(format!(
            "brick must be <node>:/<path>: {}",
            spec
        ))),
    }
}

impl CreateVolumeRequest {
    /// Lay bricks out into subvolumes
    pub fn build(&self) -> Result<Volinfo> {
        validate_name(&self.name)?;
        if self.bricks.is_empty() {
            return Err(crate::Error::InvalidRequest("no bricks given".into()));
        }

        let mut bricks = Vec::with_capacity(self.bricks.len());
        let mut seen = BTreeSet::new();
        for spec in &self.bricks {
            if !seen.insert(spec.as_str()) {
                return Err(crate::Error::InvalidRequest(format!("duplicate brick {}", spec)));
            }
            bricks.push(parse_brick(&self.name, spec)?);
        }

        let subvols = match self.vol_type {
            SubvolType::Distribute => vec![Subvol {
                name: format!("{}-dht", self.name),
                sv_type: SubvolType::Distribute,
                bricks,
            }],
            sv_type => {
                if self.set_size < 2 || bricks.len() % self.set_size != 0 {
                    return Err(crate::Error::InvalidRequest(format!(
                        "{} bricks do not divide into sets of {}",
                        bricks.len(),
                        self.set_size
                    )));
                }
                let prefix = match sv_type {
                    SubvolType::Disperse => "disperse",
                    _ => "replicate",
                };
                bricks
                    .chunks(self.set_size)
                    .enumerate()
                    .map(|(i, set)| Subvol {
                        name: format!("{}-{}-{}", self.name, prefix, i),
                        sv_type,
                        bricks: set.to_vec(),
                    })
                    .collect()
            }
        };

        let mut volinfo = Volinfo::new(&self.name, subvols);
        volinfo.options = self.options.clone();
        Ok(volinfo)
    }
}

/// Give every brick without a port the lowest port free on its node
fn assign_ports(volinfo: &mut Volinfo, existing: &[Volinfo]) {
    let mut used: BTreeSet<(String, u16)> = existing
        .iter()
        .flat_map(|v| v.bricks())
        .filter_map(|b| b.port.map(|p| (b.node_id.clone(), p)))
        .collect();

    for brick in volinfo.subvols.iter_mut().flat_map(|sv| sv.bricks.iter_mut()) {
        if brick.port.is_some() {
            continue;
        }
        let mut port = BRICK_PORT_BASE;
        while used.contains(&(brick.node_id.clone(), port)) {
            port += 1;
        }
        used.insert((brick.node_id.clone(), port));
        brick.port = Some(port);
    }
}

impl Cluster {
    /// `POST /v1/volumes`: registers the volume in the store; no daemon is touched
    pub async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volinfo> {
        let mut volinfo = req.build()?;
        let name = volinfo.name.clone();

        self.with_lock(&name, || async {
            if self.metadata.volume_exists(&name).await? {
                return Err(crate::Error::AlreadyExists(name.clone()));
            }
            assign_ports(&mut volinfo, &self.metadata.list_volumes().await?);
            self.metadata.put_volume(&volinfo).await?;
            self.publish(Event::new(EventKind::VolumeCreated, &name, self.node_id()));
            info!(volume = %name, bricks = volinfo.bricks().count(), "Volume created");
            Ok(volinfo)
        })
        .await
    }

    /// `GET /v1/volumes/{name}`
    pub async fn volume_info(&self, name: &str) -> Result<Volinfo> {
        self.metadata.get_volume(name).await
    }

    /// `GET /v1/volumes`
    pub async fn list_volumes(&self) -> Result<Vec<Volinfo>> {
        self.metadata.list_volumes().await
    }
}
