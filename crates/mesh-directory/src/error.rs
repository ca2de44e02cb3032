//! Directory error type.

use mesh_core::RangeError;
use mesh_crypto::{KeyRefreshError, KeyRefreshPhase};
use thiserror::Error;
use uuid::Uuid;

use crate::node::KeyKind;

pub type Result<T> = std::result::Result<T, DirectoryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("{0} key value is already in use")]
    DuplicateKeyMaterial(KeyKind),

    #[error("{kind} key {index} is in use")]
    KeyInUse { kind: KeyKind, index: u16 },

    #[error("{kind} key index {index} is already taken")]
    KeyIndexInUse { kind: KeyKind, index: u16 },

    #[error("key index {0} does not fit in 12 bits")]
    InvalidKeyIndex(u16),

    #[error("cannot {operation} during {phase}")]
    InvalidPhaseTransition {
        operation: &'static str,
        phase: KeyRefreshPhase,
    },

    #[error("ranges overlap with provisioner {0}")]
    RangeOverlap(Uuid),

    #[error("address 0x{0:04X} is outside the allocated unicast ranges")]
    AddressOutOfAllocation(u16),

    #[error("address 0x{0:04X} is already in use")]
    AddressInUse(u16),

    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(&'static str),

    #[error("network key {0} not found")]
    NetworkKeyNotFound(u16),

    #[error("application key {0} not found")]
    ApplicationKeyNotFound(u16),

    #[error("provisioner {0} not found")]
    ProvisionerNotFound(Uuid),

    #[error("node {0} not found")]
    NodeNotFound(Uuid),

    #[error("provisioner {0} is already registered")]
    DuplicateProvisioner(Uuid),

    #[error("node {0} is already registered")]
    DuplicateNode(Uuid),

    #[error("name must not be empty")]
    InvalidName,

    #[error("ttl {0} exceeds 127")]
    InvalidTtl(u8),

    #[error(transparent)]
    InvalidRange(#[from] RangeError),

    #[error("no provisioner is selected")]
    NoSelectedProvisioner,

    #[error("sequence number space exhausted")]
    SequenceExhausted,

    #[error("incompatible snapshot: {0}")]
    IncompatibleSnapshot(String),
}

impl From<KeyRefreshError> for DirectoryError {
    fn from(err: KeyRefreshError) -> Self {
        match err {
            KeyRefreshError::InvalidPhaseTransition { operation, phase } => {
                Self::InvalidPhaseTransition { operation, phase }
            }
            // Callers that know the kind map this themselves.
            KeyRefreshError::DuplicateKeyMaterial => Self::DuplicateKeyMaterial(KeyKind::Network),
            KeyRefreshError::InvalidIndex(index) => Self::InvalidKeyIndex(index),
            KeyRefreshError::MissingOldKey(index) => Self::IncompatibleSnapshot(format!(
                "key {index} is mid-refresh without an old key"
            )),
        }
    }
}

impl From<DirectoryError> for mesh_common::Error {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NetworkKeyNotFound(_)
            | DirectoryError::ApplicationKeyNotFound(_)
            | DirectoryError::ProvisionerNotFound(_)
            | DirectoryError::NodeNotFound(_) => mesh_common::Error::not_found(err),
            DirectoryError::IncompatibleSnapshot(_) => mesh_common::Error::serialization(err),
            other => mesh_common::Error::rejected(other),
        }
    }
}
