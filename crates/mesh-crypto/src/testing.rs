//! Deterministic crypto collaborator for tests and offline tooling.
//!
//! Every output is a truncated SHA-256 over a label and the inputs. The values
//! are stable and distinct per key but are NOT the Mesh Profile primitives.

use mesh_core::beacon::{AUTHENTICATED_PAYLOAD_SIZE, AUTH_VALUE_SIZE, NETWORK_ID_SIZE};
use sha2::{Digest, Sha256};

use crate::derive::{K2Output, MeshCrypto, AID_MASK, NID_MASK};
use crate::material::{KeyMaterial, KEY_SIZE};

#[derive(Debug, Clone, Copy, Default)]
pub struct DigestCrypto;

impl DigestCrypto {
    fn digest(label: &[u8], parts: &[&[u8]]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(label);
        for part in parts {
            hasher.update(part);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        out
    }

    fn key(label: &[u8], input: &KeyMaterial) -> KeyMaterial {
        let digest = Self::digest(label, &[input.as_bytes()]);
        let mut out = [0u8; KEY_SIZE];
        out.copy_from_slice(&digest[..KEY_SIZE]);
        KeyMaterial::new(out)
    }
}

impl MeshCrypto for DigestCrypto {
    fn derive_identity_key(&self, net_key: &KeyMaterial) -> KeyMaterial {
        Self::key(b"nkik", net_key)
    }

    fn derive_k2(&self, net_key: &KeyMaterial) -> K2Output {
        let digest = Self::digest(b"k2", &[net_key.as_bytes()]);
        K2Output {
            nid: digest[0] & NID_MASK,
            encryption_key: Self::key(b"k2-enc", net_key),
            privacy_key: Self::key(b"k2-priv", net_key),
        }
    }

    fn derive_network_id(&self, net_key: &KeyMaterial) -> [u8; NETWORK_ID_SIZE] {
        let digest = Self::digest(b"k3", &[net_key.as_bytes()]);
        let mut out = [0u8; NETWORK_ID_SIZE];
        out.copy_from_slice(&digest[..NETWORK_ID_SIZE]);
        out
    }

    fn derive_aid(&self, app_key: &KeyMaterial) -> u8 {
        Self::digest(b"k4", &[app_key.as_bytes()])[0] & AID_MASK
    }

    fn beacon_auth_value(
        &self,
        net_key: &KeyMaterial,
        payload: &[u8; AUTHENTICATED_PAYLOAD_SIZE],
    ) -> [u8; AUTH_VALUE_SIZE] {
        let digest = Self::digest(b"beacon", &[net_key.as_bytes(), payload]);
        let mut out = [0u8; AUTH_VALUE_SIZE];
        out.copy_from_slice(&digest[..AUTH_VALUE_SIZE]);
        out
    }
}
