//! Error type for the I/O-facing edges: config files, snapshots, beacon input.
//!
//! Directory rule violations have their own typed error in `mesh-directory`
//! and convert into [`Error::Rejected`] here when they cross into a binary.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON or a snapshot that does not fit the current schema
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Undecodable beacon bytes
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The directory refused an operation
    #[error("rejected: {0}")]
    Rejected(String),
}

impl Error {
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    pub fn not_found(msg: impl std::fmt::Display) -> Self {
        Self::NotFound(msg.to_string())
    }

    pub fn rejected(msg: impl std::fmt::Display) -> Self {
        Self::Rejected(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<mesh_core::BeaconError> for Error {
    fn from(err: mesh_core::BeaconError) -> Self {
        Self::Protocol(err.to_string())
    }
}
