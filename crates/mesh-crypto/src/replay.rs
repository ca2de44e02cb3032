//! Replay protection list.
//!
//! Tracks, per source address, the highest `(iv_index, sequence)` pair
//! accepted so far. A message is fresh only if its pair is strictly greater:
//!
//! - a higher IV Index always wins, whatever the sequence number
//! - within the same IV Index the sequence number must increase
//! - anything older or equal is a replay
//!
//! This implementation is NOT thread-safe. It lives inside the directory and
//! inherits its locking.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Sequence numbers are 24 bits on the wire.
pub const MAX_SEQUENCE_NUMBER: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeqAuth {
    pub iv_index: u32,
    pub sequence: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayProtectionList {
    entries: BTreeMap<u16, SeqAuth>,
}

impl ReplayProtectionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a message is fresh. Does NOT update state.
    pub fn check(&self, src: u16, iv_index: u32, sequence: u32) -> bool {
        if sequence > MAX_SEQUENCE_NUMBER {
            return false;
        }
        let incoming = SeqAuth { iv_index, sequence };
        match self.entries.get(&src) {
            None => true,
            Some(last) => incoming > *last,
        }
    }

    /// Check and record: returns true if fresh, false if replayed.
    pub fn check_and_update(&mut self, src: u16, iv_index: u32, sequence: u32) -> bool {
        if !self.check(src, iv_index, sequence) {
            return false;
        }
        self.entries.insert(src, SeqAuth { iv_index, sequence });
        true
    }

    pub fn last(&self, src: u16) -> Option<SeqAuth> {
        self.entries.get(&src).copied()
    }

    /// Forget a source, e.g. when its node leaves the network.
    pub fn remove(&mut self, src: u16) -> bool {
        self.entries.remove(&src).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
