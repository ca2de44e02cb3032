//! Network keys and the Key Refresh state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use mesh_core::MAX_KEY_INDEX;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::derive::{DerivedNetworkMaterial, MeshCrypto};
use crate::material::KeyMaterial;
use crate::refresh::{KeyRefreshError, KeyRefreshPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinSecurity {
    Insecure,
    #[default]
    Secure,
}

#[derive(Clone)]
pub struct NetworkKey {
    index: u16,
    name: String,
    key: KeyMaterial,
    old_key: Option<KeyMaterial>,
    phase: KeyRefreshPhase,
    min_security: MinSecurity,
    timestamp: DateTime<Utc>,
    mesh_uuid: Option<Uuid>,
    derived: DerivedNetworkMaterial,
    old_derived: Option<DerivedNetworkMaterial>,
}

/// Persisted form of a [`NetworkKey`]. Derived material is recomputed on restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkKeyRecord {
    pub index: u16,
    pub name: String,
    pub key: KeyMaterial,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_key: Option<KeyMaterial>,
    #[serde(default)]
    pub phase: KeyRefreshPhase,
    #[serde(default)]
    pub min_security: MinSecurity,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_uuid: Option<Uuid>,
}

pub(crate) fn check_index(index: u16) -> Result<(), KeyRefreshError> {
    if index > MAX_KEY_INDEX {
        return Err(KeyRefreshError::InvalidIndex(index));
    }
    Ok(())
}

impl NetworkKey {
    pub fn new(
        index: u16,
        key: KeyMaterial,
        crypto: &dyn MeshCrypto,
        now: DateTime<Utc>,
    ) -> Result<Self, KeyRefreshError> {
        check_index(index)?;
        let derived = DerivedNetworkMaterial::derive(crypto, &key);
        Ok(Self {
            index,
            name: format!("Network Key {}", u32::from(index) + 1),
            key,
            old_key: None,
            phase: KeyRefreshPhase::Normal,
            min_security: MinSecurity::default(),
            timestamp: now,
            mesh_uuid: None,
            derived,
            old_derived: None,
        })
    }

    pub fn from_record(
        record: NetworkKeyRecord,
        crypto: &dyn MeshCrypto,
    ) -> Result<Self, KeyRefreshError> {
        check_index(record.index)?;
        let old_key = match (record.phase, record.old_key) {
            (KeyRefreshPhase::Normal, _) => None,
            (_, Some(old)) => Some(old),
            (_, None) => return Err(KeyRefreshError::MissingOldKey(record.index)),
        };
        let derived = DerivedNetworkMaterial::derive(crypto, &record.key);
        let old_derived = old_key
            .as_ref()
            .map(|old| DerivedNetworkMaterial::derive(crypto, old));

        Ok(Self {
            index: record.index,
            name: record.name,
            key: record.key,
            old_key,
            phase: record.phase,
            min_security: record.min_security,
            timestamp: record.timestamp,
            mesh_uuid: record.mesh_uuid,
            derived,
            old_derived,
        })
    }

    pub fn record(&self) -> NetworkKeyRecord {
        NetworkKeyRecord {
            index: self.index,
            name: self.name.clone(),
            key: self.key.clone(),
            old_key: self.old_key.clone(),
            phase: self.phase,
            min_security: self.min_security,
            timestamp: self.timestamp,
            mesh_uuid: self.mesh_uuid,
        }
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    /// The primary subnet uses key index 0.
    pub fn is_primary(&self) -> bool {
        self.index == 0
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn key(&self) -> &KeyMaterial {
        &self.key
    }

    pub fn old_key(&self) -> Option<&KeyMaterial> {
        self.old_key.as_ref()
    }

    pub fn phase(&self) -> KeyRefreshPhase {
        self.phase
    }

    pub fn min_security(&self) -> MinSecurity {
        self.min_security
    }

    pub fn set_min_security(&mut self, min_security: MinSecurity) {
        self.min_security = min_security;
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn mesh_uuid(&self) -> Option<Uuid> {
        self.mesh_uuid
    }

    pub fn set_mesh_uuid(&mut self, mesh_uuid: Uuid) {
        self.mesh_uuid = Some(mesh_uuid);
    }

    pub fn derived(&self) -> &DerivedNetworkMaterial {
        &self.derived
    }

    pub fn old_derived(&self) -> Option<&DerivedNetworkMaterial> {
        self.old_derived.as_ref()
    }

    pub fn network_id(&self) -> [u8; 8] {
        self.derived.network_id
    }

    /// True if `key` is this key's current or old value.
    pub fn holds(&self, key: &KeyMaterial) -> bool {
        &self.key == key || self.old_key.as_ref() == Some(key)
    }

    /// Replaces the key value outside of a refresh.
    pub fn set_key(
        &mut self,
        key: KeyMaterial,
        crypto: &dyn MeshCrypto,
        now: DateTime<Utc>,
    ) -> Result<(), KeyRefreshError> {
        if self.phase.is_refreshing() {
            return Err(KeyRefreshError::InvalidPhaseTransition {
                operation: "update the key in place",
                phase: self.phase,
            });
        }
        self.derived = DerivedNetworkMaterial::derive(crypto, &key);
        self.key = key;
        self.timestamp = now;
        Ok(())
    }

    /// Starts phase 1 with `new_key`. Returns false when `new_key` was already
    /// distributed in the current cycle.
    pub fn distribute(
        &mut self,
        new_key: KeyMaterial,
        crypto: &dyn MeshCrypto,
        now: DateTime<Utc>,
    ) -> Result<bool, KeyRefreshError> {
        match self.phase {
            KeyRefreshPhase::Normal => {
                if new_key == self.key {
                    return Err(KeyRefreshError::DuplicateKeyMaterial);
                }
                let new_derived = DerivedNetworkMaterial::derive(crypto, &new_key);
                let previous = std::mem::replace(&mut self.key, new_key);
                self.old_derived = Some(std::mem::replace(&mut self.derived, new_derived));
                self.old_key = Some(previous);
                self.phase = KeyRefreshPhase::KeyDistribution;
                self.timestamp = now;
                debug!(index = self.index, "network key entered key distribution");
                Ok(true)
            }
            KeyRefreshPhase::KeyDistribution if new_key == self.key => Ok(false),
            phase => Err(KeyRefreshError::InvalidPhaseTransition {
                operation: "distribute a new key",
                phase,
            }),
        }
    }

    /// Phase 1 -> phase 2.
    pub fn switch_to_new_key(&mut self, now: DateTime<Utc>) -> Result<(), KeyRefreshError> {
        if self.phase != KeyRefreshPhase::KeyDistribution {
            return Err(KeyRefreshError::InvalidPhaseTransition {
                operation: "switch to the new key",
                phase: self.phase,
            });
        }
        self.phase = KeyRefreshPhase::UsingNewKeys;
        self.timestamp = now;
        debug!(index = self.index, "network key switched to new key");
        Ok(())
    }

    /// Phase 1 or 2 -> normal. The old key is dropped (and zeroized).
    pub fn revoke_old_key(&mut self, now: DateTime<Utc>) -> Result<(), KeyRefreshError> {
        if !self.phase.is_refreshing() {
            return Err(KeyRefreshError::InvalidPhaseTransition {
                operation: "revoke the old key",
                phase: self.phase,
            });
        }
        self.old_key = None;
        self.old_derived = None;
        self.phase = KeyRefreshPhase::Normal;
        self.timestamp = now;
        debug!(index = self.index, "network key old value revoked");
        Ok(())
    }

    /// Key used to transmit: the old value until the switch to new keys.
    pub fn tx_key(&self) -> &KeyMaterial {
        match (self.phase, &self.old_key) {
            (KeyRefreshPhase::KeyDistribution, Some(old)) => old,
            _ => &self.key,
        }
    }

    pub fn tx_material(&self) -> &DerivedNetworkMaterial {
        match (self.phase, &self.old_derived) {
            (KeyRefreshPhase::KeyDistribution, Some(old)) => old,
            _ => &self.derived,
        }
    }

    /// Keys accepted on receive.
    pub fn rx_keys(&self) -> Vec<&KeyMaterial> {
        let mut keys = vec![&self.key];
        keys.extend(self.old_key.as_ref());
        keys
    }

    /// Every live key value paired with what was derived from it.
    pub fn live_materials(&self) -> Vec<(&KeyMaterial, &DerivedNetworkMaterial)> {
        let mut live = vec![(&self.key, &self.derived)];
        if let (Some(old), Some(old_derived)) = (&self.old_key, &self.old_derived) {
            live.push((old, old_derived));
        }
        live
    }
}

impl PartialEq for NetworkKey {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.key == other.key
    }
}

impl Eq for NetworkKey {}

impl fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkKey")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("refreshing", &self.old_key.is_some())
            .finish()
    }
}
