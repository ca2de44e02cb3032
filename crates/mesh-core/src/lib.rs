//! Core mesh value types and framing.
//!
//! This crate provides:
//! - The 16-bit address space and its validators
//! - Allocated unicast/group/scene ranges and the interval algebra over them
//! - The IV Index value type
//! - Secure Network Beacon encoding and decoding

#![forbid(unsafe_code)]

pub mod address;
pub mod beacon;
pub mod iv_index;
pub mod range;

pub use address::{AddressType, UNASSIGNED_ADDRESS};
pub use beacon::{BeaconError, BeaconFlags, SecureNetworkBeacon};
pub use iv_index::IvIndex;
pub use range::{
    AllocatedGroupRange, AllocatedRange, AllocatedSceneRange, AllocatedUnicastRange, AnyRange,
    RangeError, RangeKind, RangeSet,
};

/// Largest valid 12-bit key index.
pub const MAX_KEY_INDEX: u16 = 0x0FFF;

/// Largest TTL a provisioner may configure.
pub const MAX_TTL: u8 = 0x7F;

/// Largest accepted forward jump of the IV Index without the recovery override.
pub const IV_RECOVERY_LIMIT: u32 = 42;

/// Minimum dwell time per IV Index state, in hours.
pub const IV_STATE_MIN_HOURS: i64 = 96;

/// Minimum hours before another recovery is accepted.
pub const IV_RECOVERY_MIN_HOURS: i64 = 192;
