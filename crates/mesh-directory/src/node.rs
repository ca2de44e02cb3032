//! Provisioned nodes.

use std::fmt;
use std::ops::RangeInclusive;

use mesh_core::address::element_addresses;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Network,
    Application,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => f.write_str("network"),
            Self::Application => f.write_str("application"),
        }
    }
}

/// A key added to a node, and whether the node holds its latest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeKey {
    pub index: u16,
    pub updated: bool,
}

impl NodeKey {
    pub fn new(index: u16) -> Self {
        Self {
            index,
            updated: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedNode {
    pub uuid: Uuid,
    pub name: String,
    pub unicast_address: u16,
    pub element_count: u8,
    #[serde(default)]
    pub net_keys: Vec<NodeKey>,
    #[serde(default)]
    pub app_keys: Vec<NodeKey>,
    #[serde(default)]
    pub sequence_number: u32,
    #[serde(default)]
    pub excluded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u8>,
    #[serde(default)]
    pub configured: bool,
}

impl ProvisionedNode {
    pub fn new(uuid: Uuid, name: impl Into<String>, unicast_address: u16, element_count: u8) -> Self {
        Self {
            uuid,
            name: name.into(),
            unicast_address,
            element_count,
            net_keys: Vec::new(),
            app_keys: Vec::new(),
            sequence_number: 0,
            excluded: false,
            ttl: None,
            configured: false,
        }
    }

    pub fn with_net_key(mut self, index: u16) -> Self {
        self.add_key(KeyKind::Network, index);
        self
    }

    pub fn with_app_key(mut self, index: u16) -> Self {
        self.add_key(KeyKind::Application, index);
        self
    }

    /// Element addresses, or `None` if the block leaves the unicast domain.
    pub fn addresses(&self) -> Option<RangeInclusive<u16>> {
        element_addresses(self.unicast_address, self.element_count)
    }

    pub fn last_address(&self) -> u16 {
        self.addresses()
            .map(|r| *r.end())
            .unwrap_or(self.unicast_address)
    }

    pub fn contains_address(&self, address: u16) -> bool {
        self.addresses().is_some_and(|r| r.contains(&address))
    }

    /// True if any element address of this node falls in `[low, high]`.
    pub fn overlaps_block(&self, low: u16, high: u16) -> bool {
        match self.addresses() {
            Some(own) => *own.start() <= high && low <= *own.end(),
            None => false,
        }
    }

    pub fn keys(&self, kind: KeyKind) -> &[NodeKey] {
        match kind {
            KeyKind::Network => &self.net_keys,
            KeyKind::Application => &self.app_keys,
        }
    }

    fn keys_mut(&mut self, kind: KeyKind) -> &mut Vec<NodeKey> {
        match kind {
            KeyKind::Network => &mut self.net_keys,
            KeyKind::Application => &mut self.app_keys,
        }
    }

    pub fn has_key(&self, kind: KeyKind, index: u16) -> bool {
        self.keys(kind).iter().any(|k| k.index == index)
    }

    /// Adds a key. Returns false if it was already present.
    pub fn add_key(&mut self, kind: KeyKind, index: u16) -> bool {
        if self.has_key(kind, index) {
            return false;
        }
        let keys = self.keys_mut(kind);
        keys.push(NodeKey::new(index));
        keys.sort_by_key(|k| k.index);
        true
    }

    pub fn remove_key(&mut self, kind: KeyKind, index: u16) -> bool {
        let keys = self.keys_mut(kind);
        let before = keys.len();
        keys.retain(|k| k.index != index);
        keys.len() != before
    }

    /// Sets the `updated` flag of a key. Returns false if the node lacks it.
    pub fn set_key_updated(&mut self, kind: KeyKind, index: u16, updated: bool) -> bool {
        match self.keys_mut(kind).iter_mut().find(|k| k.index == index) {
            Some(key) => {
                key.updated = updated;
                true
            }
            None => false,
        }
    }

    pub fn is_key_updated(&self, kind: KeyKind, index: u16) -> Option<bool> {
        self.keys(kind)
            .iter()
            .find(|k| k.index == index)
            .map(|k| k.updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_block() {
        let node = ProvisionedNode::new(Uuid::new_v4(), "lamp", 0x0010, 3);
        assert_eq!(node.addresses(), Some(0x0010..=0x0012));
        assert_eq!(node.last_address(), 0x0012);
        assert!(node.contains_address(0x0011));
        assert!(!node.contains_address(0x0013));
        assert!(node.overlaps_block(0x0012, 0x0020));
        assert!(!node.overlaps_block(0x0013, 0x0020));
    }

    #[test]
    fn test_key_bookkeeping() {
        let mut node = ProvisionedNode::new(Uuid::new_v4(), "switch", 0x0020, 1)
            .with_net_key(1)
            .with_net_key(0);
        assert_eq!(
            node.net_keys.iter().map(|k| k.index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert!(!node.add_key(KeyKind::Network, 1));

        assert!(node.set_key_updated(KeyKind::Network, 1, false));
        assert_eq!(node.is_key_updated(KeyKind::Network, 1), Some(false));
        assert!(!node.set_key_updated(KeyKind::Application, 1, false));

        assert!(node.remove_key(KeyKind::Network, 0));
        assert!(!node.has_key(KeyKind::Network, 0));
    }
}
