//! Mesh address space.
//!
//! Addresses are 16-bit values partitioned into fixed domains:
//!
//! ```text
//! 0x0000            unassigned
//! 0x0001 - 0x7FFF   unicast (one per element)
//! 0x8000 - 0xBFFF   virtual (label UUID hash)
//! 0xC000 - 0xFEFF   group
//! 0xFF00 - 0xFFFF   fixed group (all-proxies, all-friends, all-relays, all-nodes)
//! ```

use serde::{Deserialize, Serialize};

pub const UNASSIGNED_ADDRESS: u16 = 0x0000;

pub const START_UNICAST_ADDRESS: u16 = 0x0001;
pub const END_UNICAST_ADDRESS: u16 = 0x7FFF;

pub const START_VIRTUAL_ADDRESS: u16 = 0x8000;
pub const END_VIRTUAL_ADDRESS: u16 = 0xBFFF;

pub const START_GROUP_ADDRESS: u16 = 0xC000;
pub const END_GROUP_ADDRESS: u16 = 0xFEFF;

pub const ALL_PROXIES_ADDRESS: u16 = 0xFFFC;
pub const ALL_FRIENDS_ADDRESS: u16 = 0xFFFD;
pub const ALL_RELAYS_ADDRESS: u16 = 0xFFFE;
pub const ALL_NODES_ADDRESS: u16 = 0xFFFF;

pub const START_SCENE_NUMBER: u16 = 0x0001;
pub const END_SCENE_NUMBER: u16 = 0xFFFF;

/// Address domain of a 16-bit mesh address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressType {
    Unassigned,
    Unicast,
    Virtual,
    Group,
    /// One of the reserved fixed group addresses (0xFF00..=0xFFFF).
    FixedGroup,
}

impl AddressType {
    pub fn of(address: u16) -> Self {
        match address {
            UNASSIGNED_ADDRESS => Self::Unassigned,
            START_UNICAST_ADDRESS..=END_UNICAST_ADDRESS => Self::Unicast,
            START_VIRTUAL_ADDRESS..=END_VIRTUAL_ADDRESS => Self::Virtual,
            START_GROUP_ADDRESS..=END_GROUP_ADDRESS => Self::Group,
            _ => Self::FixedGroup,
        }
    }
}

pub fn is_valid_unicast_address(address: u16) -> bool {
    (START_UNICAST_ADDRESS..=END_UNICAST_ADDRESS).contains(&address)
}

pub fn is_valid_virtual_address(address: u16) -> bool {
    (START_VIRTUAL_ADDRESS..=END_VIRTUAL_ADDRESS).contains(&address)
}

/// Group addresses that may be allocated to a provisioner (fixed groups excluded).
pub fn is_valid_group_address(address: u16) -> bool {
    (START_GROUP_ADDRESS..=END_GROUP_ADDRESS).contains(&address)
}

pub fn is_fixed_group_address(address: u16) -> bool {
    address >= 0xFF00
}

/// Formats an address as four upper-case hex digits, optionally `0x`-prefixed.
pub fn format_address(address: u16, with_prefix: bool) -> String {
    if with_prefix {
        format!("0x{address:04X}")
    } else {
        format!("{address:04X}")
    }
}

/// Addresses occupied by a node with `element_count` elements starting at `unicast`.
///
/// Returns `None` if the block would run past the end of the unicast domain.
pub fn element_addresses(unicast: u16, element_count: u8) -> Option<std::ops::RangeInclusive<u16>> {
    if !is_valid_unicast_address(unicast) || element_count == 0 {
        return None;
    }
    let last = unicast.checked_add(u16::from(element_count) - 1)?;
    if last > END_UNICAST_ADDRESS {
        return None;
    }
    Some(unicast..=last)
}
