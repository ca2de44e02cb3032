//! Secure Network Beacon framing.
//!
//! ```text
//!  0        1        2                        10               14                       22
//! +--------+--------+------------------------+----------------+------------------------+
//! |  Type  | Flags  |   Network ID (8B)      | IV Index (BE)  | Authentication (8B)    |
//! +--------+--------+------------------------+----------------+------------------------+
//! ```
//!
//! Flags: bit 0 = Key Refresh, bit 1 = IV Update. Remaining bits are carried
//! through untouched so the authentication value still verifies.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Beacon type octet for a Secure Network Beacon.
pub const SECURE_NETWORK_BEACON_TYPE: u8 = 0x01;

/// Encoded beacon size.
pub const SECURE_NETWORK_BEACON_SIZE: usize = 22;

pub const NETWORK_ID_SIZE: usize = 8;
pub const AUTH_VALUE_SIZE: usize = 8;

/// Bytes covered by the authentication value: flags, network ID, IV index.
pub const AUTHENTICATED_PAYLOAD_SIZE: usize = 1 + NETWORK_ID_SIZE + 4;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct BeaconFlags: u8 {
        const KEY_REFRESH = 0b0000_0001;
        const IV_UPDATE = 0b0000_0010;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BeaconError {
    #[error("beacon too short: {0} bytes, need {SECURE_NETWORK_BEACON_SIZE}")]
    TooShort(usize),

    #[error("beacon too long: {0} bytes, expected {SECURE_NETWORK_BEACON_SIZE}")]
    TooLong(usize),

    #[error("not a secure network beacon: type 0x{0:02x}")]
    InvalidType(u8),

    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecureNetworkBeacon {
    pub flags: BeaconFlags,
    #[serde(with = "hex::serde")]
    pub network_id: [u8; NETWORK_ID_SIZE],
    pub iv_index: u32,
    #[serde(with = "hex::serde")]
    pub auth_value: [u8; AUTH_VALUE_SIZE],
}

impl SecureNetworkBeacon {
    pub fn key_refresh(&self) -> bool {
        self.flags.contains(BeaconFlags::KEY_REFRESH)
    }

    pub fn iv_update_active(&self) -> bool {
        self.flags.contains(BeaconFlags::IV_UPDATE)
    }

    /// The bytes the authentication value is computed over.
    pub fn authenticated_payload(&self) -> [u8; AUTHENTICATED_PAYLOAD_SIZE] {
        authenticated_payload(self.flags, &self.network_id, self.iv_index)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SECURE_NETWORK_BEACON_SIZE);
        buf.put_u8(SECURE_NETWORK_BEACON_TYPE);
        buf.put_u8(self.flags.bits());
        buf.put_slice(&self.network_id);
        buf.put_u32(self.iv_index);
        buf.put_slice(&self.auth_value);
        buf.freeze()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, BeaconError> {
        if buf.len() < SECURE_NETWORK_BEACON_SIZE {
            return Err(BeaconError::TooShort(buf.len()));
        }
        if buf.len() > SECURE_NETWORK_BEACON_SIZE {
            return Err(BeaconError::TooLong(buf.len()));
        }

        let mut buf = buf;
        let beacon_type = buf.get_u8();
        if beacon_type != SECURE_NETWORK_BEACON_TYPE {
            return Err(BeaconError::InvalidType(beacon_type));
        }

        let flags = BeaconFlags::from_bits_retain(buf.get_u8());
        let mut network_id = [0u8; NETWORK_ID_SIZE];
        buf.copy_to_slice(&mut network_id);
        let iv_index = buf.get_u32();
        let mut auth_value = [0u8; AUTH_VALUE_SIZE];
        buf.copy_to_slice(&mut auth_value);

        Ok(Self {
            flags,
            network_id,
            iv_index,
            auth_value,
        })
    }

    /// Decodes a beacon from a hex string, ignoring surrounding whitespace.
    pub fn from_hex(text: &str) -> Result<Self, BeaconError> {
        let raw = hex::decode(text.trim()).map_err(|e| BeaconError::InvalidHex(e.to_string()))?;
        Self::decode(&raw)
    }
}

/// Builds the authenticated portion of a beacon from its fields.
pub fn authenticated_payload(
    flags: BeaconFlags,
    network_id: &[u8; NETWORK_ID_SIZE],
    iv_index: u32,
) -> [u8; AUTHENTICATED_PAYLOAD_SIZE] {
    let mut out = [0u8; AUTHENTICATED_PAYLOAD_SIZE];
    let mut cursor = &mut out[..];
    cursor.put_u8(flags.bits());
    cursor.put_slice(network_id);
    cursor.put_u32(iv_index);
    out
}
