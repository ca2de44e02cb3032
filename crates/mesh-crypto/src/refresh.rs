//! Key Refresh Procedure phases.
//!
//! ```text
//!   Normal ──distribute──► KeyDistribution ──switch──► UsingNewKeys
//!     ▲                         │                          │
//!     └────────revoke───────────┴──────────revoke──────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRefreshPhase {
    #[default]
    Normal,
    /// New key distributed; old key still used for transmission.
    KeyDistribution,
    /// New key used for transmission; old key still accepted.
    UsingNewKeys,
}

impl KeyRefreshPhase {
    /// Phase number as carried by Config Key Refresh Phase messages.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::KeyDistribution => 1,
            Self::UsingNewKeys => 2,
        }
    }

    pub fn is_refreshing(self) -> bool {
        self != Self::Normal
    }
}

impl fmt::Display for KeyRefreshPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal operation",
            Self::KeyDistribution => "key distribution",
            Self::UsingNewKeys => "using new keys",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyRefreshError {
    #[error("cannot {operation} during {phase}")]
    InvalidPhaseTransition {
        operation: &'static str,
        phase: KeyRefreshPhase,
    },

    #[error("new key value equals the current key")]
    DuplicateKeyMaterial,

    #[error("key index {0} does not fit in 12 bits")]
    InvalidIndex(u16),

    #[error("key {0} is in a refresh phase but has no old key")]
    MissingOldKey(u16),
}
