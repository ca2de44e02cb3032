//! Application keys.
//!
//! An application key has no refresh phase of its own; it follows the phase
//! of the network key it is bound to.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::derive::MeshCrypto;
use crate::material::KeyMaterial;
use crate::network_key::check_index;
use crate::refresh::{KeyRefreshError, KeyRefreshPhase};

#[derive(Clone)]
pub struct ApplicationKey {
    index: u16,
    name: String,
    bound_net_key_index: u16,
    key: KeyMaterial,
    old_key: Option<KeyMaterial>,
    aid: u8,
    old_aid: Option<u8>,
    mesh_uuid: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationKeyRecord {
    pub index: u16,
    pub name: String,
    pub bound_net_key_index: u16,
    pub key: KeyMaterial,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_key: Option<KeyMaterial>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_uuid: Option<Uuid>,
}

impl ApplicationKey {
    pub fn new(
        index: u16,
        bound_net_key_index: u16,
        key: KeyMaterial,
        crypto: &dyn MeshCrypto,
    ) -> Result<Self, KeyRefreshError> {
        check_index(index)?;
        check_index(bound_net_key_index)?;
        let aid = crypto.derive_aid(&key);
        Ok(Self {
            index,
            name: format!("Application Key {}", u32::from(index) + 1),
            bound_net_key_index,
            key,
            old_key: None,
            aid,
            old_aid: None,
            mesh_uuid: None,
        })
    }

    pub fn from_record(
        record: ApplicationKeyRecord,
        crypto: &dyn MeshCrypto,
    ) -> Result<Self, KeyRefreshError> {
        let mut key = Self::new(record.index, record.bound_net_key_index, record.key, crypto)?;
        key.name = record.name;
        key.mesh_uuid = record.mesh_uuid;
        if let Some(old) = record.old_key {
            key.old_aid = Some(crypto.derive_aid(&old));
            key.old_key = Some(old);
        }
        Ok(key)
    }

    pub fn record(&self) -> ApplicationKeyRecord {
        ApplicationKeyRecord {
            index: self.index,
            name: self.name.clone(),
            bound_net_key_index: self.bound_net_key_index,
            key: self.key.clone(),
            old_key: self.old_key.clone(),
            mesh_uuid: self.mesh_uuid,
        }
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn bound_net_key_index(&self) -> u16 {
        self.bound_net_key_index
    }

    pub fn key(&self) -> &KeyMaterial {
        &self.key
    }

    pub fn old_key(&self) -> Option<&KeyMaterial> {
        self.old_key.as_ref()
    }

    pub fn aid(&self) -> u8 {
        self.aid
    }

    pub fn old_aid(&self) -> Option<u8> {
        self.old_aid
    }

    pub fn mesh_uuid(&self) -> Option<Uuid> {
        self.mesh_uuid
    }

    pub fn set_mesh_uuid(&mut self, mesh_uuid: Uuid) {
        self.mesh_uuid = Some(mesh_uuid);
    }

    pub fn holds(&self, key: &KeyMaterial) -> bool {
        &self.key == key || self.old_key.as_ref() == Some(key)
    }

    pub fn set_key(&mut self, key: KeyMaterial, crypto: &dyn MeshCrypto) -> Result<(), KeyRefreshError> {
        if self.old_key.is_some() {
            return Err(KeyRefreshError::InvalidPhaseTransition {
                operation: "update the key in place",
                phase: KeyRefreshPhase::KeyDistribution,
            });
        }
        self.aid = crypto.derive_aid(&key);
        self.key = key;
        Ok(())
    }

    /// Stores `new_key` as current and keeps the previous value until revoked.
    ///
    /// Returns false when `new_key` is already the distributed value.
    pub fn distribute(
        &mut self,
        new_key: KeyMaterial,
        crypto: &dyn MeshCrypto,
    ) -> Result<bool, KeyRefreshError> {
        if new_key == self.key {
            return if self.old_key.is_some() {
                Ok(false)
            } else {
                Err(KeyRefreshError::DuplicateKeyMaterial)
            };
        }
        if self.old_key.is_some() {
            return Err(KeyRefreshError::InvalidPhaseTransition {
                operation: "distribute a second new key",
                phase: KeyRefreshPhase::KeyDistribution,
            });
        }

        let new_aid = crypto.derive_aid(&new_key);
        self.old_key = Some(std::mem::replace(&mut self.key, new_key));
        self.old_aid = Some(std::mem::replace(&mut self.aid, new_aid));
        debug!(index = self.index, "application key distributed");
        Ok(true)
    }

    /// Drops the old value. Returns false if there was none.
    pub fn revoke_old_key(&mut self) -> bool {
        self.old_aid = None;
        self.old_key.take().is_some()
    }

    /// Key used to transmit given the bound network key's phase.
    pub fn tx_key(&self, bound_phase: KeyRefreshPhase) -> &KeyMaterial {
        match (bound_phase, &self.old_key) {
            (KeyRefreshPhase::KeyDistribution, Some(old)) => old,
            _ => &self.key,
        }
    }

    pub fn rx_keys(&self) -> Vec<&KeyMaterial> {
        let mut keys = vec![&self.key];
        keys.extend(self.old_key.as_ref());
        keys
    }
}

impl PartialEq for ApplicationKey {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.key == other.key
    }
}

impl Eq for ApplicationKey {}

impl fmt::Debug for ApplicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationKey")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("bound_net_key_index", &self.bound_net_key_index)
            .field("aid", &self.aid)
            .field("refreshing", &self.old_key.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::DigestCrypto;

    fn key(byte: u8) -> KeyMaterial {
        KeyMaterial::new([byte; 16])
    }

    #[test]
    fn test_aid_is_six_bits() {
        for byte in 0..=255u8 {
            let ak = ApplicationKey::new(0, 0, key(byte), &DigestCrypto).unwrap();
            assert!(ak.aid() <= 0x3F);
        }
    }

    #[test]
    fn test_distribute_and_revoke() {
        let mut ak = ApplicationKey::new(0, 0, key(1), &DigestCrypto).unwrap();
        let first_aid = ak.aid();

        assert!(ak.distribute(key(2), &DigestCrypto).unwrap());
        assert_eq!(ak.old_key(), Some(&key(1)));
        assert_eq!(ak.old_aid(), Some(first_aid));
        assert_eq!(ak.tx_key(KeyRefreshPhase::KeyDistribution), &key(1));
        assert_eq!(ak.tx_key(KeyRefreshPhase::UsingNewKeys), &key(2));

        assert!(!ak.distribute(key(2), &DigestCrypto).unwrap());
        assert!(matches!(
            ak.distribute(key(3), &DigestCrypto),
            Err(KeyRefreshError::InvalidPhaseTransition { .. })
        ));

        assert!(ak.revoke_old_key());
        assert!(!ak.revoke_old_key());
        assert_eq!(ak.rx_keys(), vec![&key(2)]);
        assert_eq!(ak.old_aid(), None);
    }

    #[test]
    fn test_distribute_current_value_is_duplicate() {
        let mut ak = ApplicationKey::new(0, 0, key(1), &DigestCrypto).unwrap();
        assert_eq!(
            ak.distribute(key(1), &DigestCrypto),
            Err(KeyRefreshError::DuplicateKeyMaterial)
        );
    }

    #[test]
    fn test_record_round_trip() {
        let mut ak = ApplicationKey::new(4, 1, key(1), &DigestCrypto).unwrap();
        ak.distribute(key(5), &DigestCrypto).unwrap();
        let restored = ApplicationKey::from_record(ak.record(), &DigestCrypto).unwrap();
        assert_eq!(restored, ak);
        assert_eq!(restored.bound_net_key_index(), 1);
        assert_eq!(restored.old_aid(), ak.old_aid());
    }
}
