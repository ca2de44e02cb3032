//! Serializable image of a directory.

use std::path::Path;

use chrono::{DateTime, Utc};
use mesh_common::{Error, Result};
use mesh_core::IvIndex;
use mesh_crypto::{ApplicationKeyRecord, NetworkKeyRecord};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::exclusions::NetworkExclusions;
use crate::node::ProvisionedNode;
use crate::provisioner::Provisioner;

pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshSnapshot {
    pub schema: String,
    pub mesh_uuid: Uuid,
    pub mesh_name: String,
    pub timestamp: DateTime<Utc>,
    pub iv_index: IvIndex,
    #[serde(default)]
    pub net_keys: Vec<NetworkKeyRecord>,
    #[serde(default)]
    pub app_keys: Vec<ApplicationKeyRecord>,
    #[serde(default)]
    pub provisioners: Vec<Provisioner>,
    #[serde(default)]
    pub nodes: Vec<ProvisionedNode>,
    #[serde(default)]
    pub network_exclusions: NetworkExclusions,
}

impl MeshSnapshot {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::serialization)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::serialization)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn selected_provisioner(&self) -> Option<&Provisioner> {
        self.provisioners
            .iter()
            .find(|p| p.is_last_selected())
            .or_else(|| self.provisioners.first())
    }

    pub fn provisioner(&self, uuid: Uuid) -> Option<&Provisioner> {
        self.provisioners.iter().find(|p| p.uuid() == uuid)
    }

    /// Element address blocks of every node plus addresses still excluded.
    pub fn occupied_addresses(&self) -> Vec<std::ops::RangeInclusive<u16>> {
        let mut occupied: Vec<_> = self.nodes.iter().filter_map(ProvisionedNode::addresses).collect();
        occupied.extend(
            self.network_exclusions
                .blocked_addresses(self.iv_index.index)
                .into_iter()
                .map(|a| a..=a),
        );
        occupied
    }
}
