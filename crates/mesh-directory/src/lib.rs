//! Bluetooth Mesh network directory.
//!
//! This crate provides:
//! - Provisioners with non-overlapping unicast, group and scene ranges
//! - Provisioned nodes and first-fit unicast address allocation
//! - The Key Refresh Procedure across network keys, application keys and nodes
//! - IV Index freshness checks on Secure Network Beacons
//! - The exclusion list of removed nodes' addresses
//!
//! # Design
//!
//! [`MeshDirectory`] owns all state and is driven synchronously. Time,
//! cryptography and change notification are injected through [`Clock`],
//! [`mesh_crypto::MeshCrypto`] and [`MeshObserver`]. Wrap it in a
//! [`SharedDirectory`] to share between threads.

#![forbid(unsafe_code)]

pub mod allocation;
pub mod beacon;
pub mod clock;
pub mod directory;
pub mod error;
pub mod exclusions;
pub mod node;
pub mod observer;
pub mod provisioner;
pub mod registry;
pub mod shared;
pub mod snapshot;

pub use beacon::{BeaconApplied, BeaconOutcome, BeaconRejection, IvUpdatePolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use directory::MeshDirectory;
pub use error::{DirectoryError, Result};
pub use exclusions::NetworkExclusions;
pub use node::{KeyKind, NodeKey, ProvisionedNode};
pub use observer::{MeshChange, MeshObserver, NoopObserver, TracingObserver};
pub use provisioner::Provisioner;
pub use registry::ProvisionerRegistry;
pub use shared::SharedDirectory;
pub use snapshot::{MeshSnapshot, SCHEMA_VERSION};
