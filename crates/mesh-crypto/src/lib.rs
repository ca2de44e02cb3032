//! Key material and security state for the mesh.
//!
//! This crate provides:
//! - 128-bit key material that is zeroized on drop and never printed
//! - Network and application keys with the Key Refresh Procedure state machine
//! - The [`MeshCrypto`] collaborator trait for k1..k4 and beacon authentication
//! - A replay protection list keyed by source address
//!
//! # Design
//!
//! Raw primitives (AES-CMAC, k-functions) are injected, not implemented here.
//! Keys carry everything derived from them so that beacon and network-layer
//! code can match on NID or network ID without re-deriving.

#![forbid(unsafe_code)]

pub mod app_key;
pub mod derive;
pub mod material;
pub mod network_key;
pub mod refresh;
pub mod replay;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use app_key::{ApplicationKey, ApplicationKeyRecord};
pub use derive::{DerivedNetworkMaterial, K2Output, MeshCrypto};
pub use material::KeyMaterial;
pub use network_key::{MinSecurity, NetworkKey, NetworkKeyRecord};
pub use refresh::{KeyRefreshError, KeyRefreshPhase};
pub use replay::ReplayProtectionList;
