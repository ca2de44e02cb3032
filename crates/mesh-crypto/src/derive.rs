//! Key derivation collaborator.
//!
//! The AES-CMAC based primitives (k1..k4, beacon authentication) live outside
//! this crate. The directory only needs their outputs, so they are reached
//! through [`MeshCrypto`], shared as `Arc<dyn MeshCrypto>`.

use mesh_core::beacon::{AUTHENTICATED_PAYLOAD_SIZE, AUTH_VALUE_SIZE, NETWORK_ID_SIZE};

use crate::material::KeyMaterial;

/// Mask for the 7-bit NID.
pub const NID_MASK: u8 = 0x7F;

/// Mask for the 6-bit application key identifier.
pub const AID_MASK: u8 = 0x3F;

/// Output of k2 with the master security credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct K2Output {
    pub nid: u8,
    pub encryption_key: KeyMaterial,
    pub privacy_key: KeyMaterial,
}

pub trait MeshCrypto: Send + Sync {
    /// k1 with the "nkik" salt: the node identity key.
    fn derive_identity_key(&self, net_key: &KeyMaterial) -> KeyMaterial;

    /// k2 with P = 0x00.
    fn derive_k2(&self, net_key: &KeyMaterial) -> K2Output;

    /// k3: the 64-bit network ID advertised in beacons.
    fn derive_network_id(&self, net_key: &KeyMaterial) -> [u8; NETWORK_ID_SIZE];

    /// k4: the 6-bit AID of an application key.
    fn derive_aid(&self, app_key: &KeyMaterial) -> u8;

    /// Authentication value of a Secure Network Beacon.
    ///
    /// `payload` is flags, network ID and IV index as laid out on the wire.
    fn beacon_auth_value(
        &self,
        net_key: &KeyMaterial,
        payload: &[u8; AUTHENTICATED_PAYLOAD_SIZE],
    ) -> [u8; AUTH_VALUE_SIZE];
}

/// Everything derived from one network key value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedNetworkMaterial {
    pub identity_key: KeyMaterial,
    pub nid: u8,
    pub encryption_key: KeyMaterial,
    pub privacy_key: KeyMaterial,
    pub network_id: [u8; NETWORK_ID_SIZE],
}

impl DerivedNetworkMaterial {
    pub fn derive(crypto: &dyn MeshCrypto, net_key: &KeyMaterial) -> Self {
        let k2 = crypto.derive_k2(net_key);
        Self {
            identity_key: crypto.derive_identity_key(net_key),
            nid: k2.nid & NID_MASK,
            encryption_key: k2.encryption_key,
            privacy_key: k2.privacy_key,
            network_id: crypto.derive_network_id(net_key),
        }
    }
}
