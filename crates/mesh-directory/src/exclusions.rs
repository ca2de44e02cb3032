//! Addresses excluded from reuse, keyed by the IV Index at exclusion time.
//!
//! An address excluded at IV Index `K` stays blocked while the current index
//! is `K` or `K + 1` and is released once the index reaches `K + 2`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkExclusions {
    entries: BTreeMap<u32, BTreeSet<u16>>,
}

impl NetworkExclusions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude(&mut self, iv_index: u32, addresses: impl IntoIterator<Item = u16>) {
        let set = self.entries.entry(iv_index).or_default();
        set.extend(addresses);
        if set.is_empty() {
            self.entries.remove(&iv_index);
        }
    }

    /// Drops every entry whose key + 2 <= `current_iv_index`. Returns how many.
    pub fn purge(&mut self, current_iv_index: u32) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|&key, _| u64::from(key) + 2 > u64::from(current_iv_index));
        before - self.entries.len()
    }

    /// Addresses still blocked at `current_iv_index`.
    pub fn blocked_addresses(&self, current_iv_index: u32) -> BTreeSet<u16> {
        let lower = current_iv_index.saturating_sub(1);
        self.entries
            .range(lower..=current_iv_index)
            .flat_map(|(_, set)| set.iter().copied())
            .collect()
    }

    pub fn is_blocked(&self, address: u16, current_iv_index: u32) -> bool {
        let lower = current_iv_index.saturating_sub(1);
        self.entries
            .range(lower..=current_iv_index)
            .any(|(_, set)| set.contains(&address))
    }

    pub fn addresses_at(&self, iv_index: u32) -> Option<&BTreeSet<u16>> {
        self.entries.get(&iv_index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &BTreeSet<u16>)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
