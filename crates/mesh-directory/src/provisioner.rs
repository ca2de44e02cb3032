//! Provisioners and their allocated ranges.

use mesh_core::address::is_valid_unicast_address;
use mesh_core::range::{Group, Scene, Unicast};
use mesh_core::{
    AllocatedGroupRange, AllocatedSceneRange, AllocatedUnicastRange, AnyRange, RangeSet, MAX_TTL,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DirectoryError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provisioner {
    uuid: Uuid,
    name: String,
    unicast_ranges: RangeSet<Unicast>,
    group_ranges: RangeSet<Group>,
    scene_ranges: RangeSet<Scene>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    address: Option<u16>,
    global_ttl: u8,
    #[serde(default)]
    last_selected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mesh_uuid: Option<Uuid>,
}

impl Provisioner {
    pub fn new(
        uuid: Uuid,
        name: impl Into<String>,
        unicast: AllocatedUnicastRange,
        group: AllocatedGroupRange,
        scene: AllocatedSceneRange,
        global_ttl: u8,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DirectoryError::InvalidName);
        }
        if global_ttl > MAX_TTL {
            return Err(DirectoryError::InvalidTtl(global_ttl));
        }
        Ok(Self {
            uuid,
            name,
            unicast_ranges: RangeSet::single(unicast),
            group_ranges: RangeSet::single(group),
            scene_ranges: RangeSet::single(scene),
            address: None,
            global_ttl,
            last_selected: false,
            mesh_uuid: None,
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DirectoryError::InvalidName);
        }
        self.name = name;
        Ok(())
    }

    pub fn unicast_ranges(&self) -> &RangeSet<Unicast> {
        &self.unicast_ranges
    }

    pub fn group_ranges(&self) -> &RangeSet<Group> {
        &self.group_ranges
    }

    pub fn scene_ranges(&self) -> &RangeSet<Scene> {
        &self.scene_ranges
    }

    pub fn address(&self) -> Option<u16> {
        self.address
    }

    /// A provisioner without an address cannot configure nodes.
    pub fn supports_configuration(&self) -> bool {
        self.address.is_some()
    }

    /// Assigns the provisioner's own unicast address, which must be in its ranges.
    pub fn assign_address(&mut self, address: Option<u16>) -> Result<()> {
        if let Some(addr) = address {
            if !self.is_address_within_allocated_range(Some(addr))? {
                return Err(DirectoryError::AddressOutOfAllocation(addr));
            }
        }
        self.address = address;
        Ok(())
    }

    pub fn global_ttl(&self) -> u8 {
        self.global_ttl
    }

    pub fn set_global_ttl(&mut self, ttl: u8) -> Result<()> {
        if ttl > MAX_TTL {
            return Err(DirectoryError::InvalidTtl(ttl));
        }
        self.global_ttl = ttl;
        Ok(())
    }

    pub fn is_last_selected(&self) -> bool {
        self.last_selected
    }

    pub(crate) fn set_last_selected(&mut self, selected: bool) {
        self.last_selected = selected;
    }

    pub fn mesh_uuid(&self) -> Option<Uuid> {
        self.mesh_uuid
    }

    pub(crate) fn set_mesh_uuid(&mut self, mesh_uuid: Uuid) {
        self.mesh_uuid = Some(mesh_uuid);
    }

    /// Inserts a range into the set of its kind; the set is re-sorted and merged.
    pub fn add_range(&mut self, range: AnyRange) {
        match range {
            AnyRange::Unicast(r) => self.unicast_ranges.insert(r),
            AnyRange::Group(r) => self.group_ranges.insert(r),
            AnyRange::Scene(r) => self.scene_ranges.insert(r),
        }
    }

    /// Subtracts a range from the set of its kind. Returns true if anything changed.
    ///
    /// Refused when the provisioner's own address would no longer be covered.
    pub fn remove_range(&mut self, range: AnyRange) -> Result<bool> {
        match range {
            AnyRange::Unicast(r) => {
                if let Some(addr) = self.address {
                    if r.contains(addr) {
                        return Err(DirectoryError::AddressOutOfAllocation(addr));
                    }
                }
                Ok(self.unicast_ranges.remove(&r))
            }
            AnyRange::Group(r) => Ok(self.group_ranges.remove(&r)),
            AnyRange::Scene(r) => Ok(self.scene_ranges.remove(&r)),
        }
    }

    /// `None` is vacuously within range. An address outside the unicast
    /// domain is an error rather than `false`.
    pub fn is_address_within_allocated_range(&self, address: Option<u16>) -> Result<bool> {
        let Some(addr) = address else {
            return Ok(true);
        };
        if !is_valid_unicast_address(addr) {
            return Err(DirectoryError::AddressOutOfAllocation(addr));
        }
        Ok(self.unicast_ranges.contains(addr))
    }

    pub fn has_overlapping_unicast_ranges(&self, other: &RangeSet<Unicast>) -> bool {
        self.unicast_ranges.overlaps(other)
    }

    pub fn has_overlapping_group_ranges(&self, other: &RangeSet<Group>) -> bool {
        self.group_ranges.overlaps(other)
    }

    pub fn has_overlapping_scene_ranges(&self, other: &RangeSet<Scene>) -> bool {
        self.scene_ranges.overlaps(other)
    }

    /// True if any range of any kind overlaps the other provisioner's.
    pub fn has_overlap(&self, other: &Provisioner) -> bool {
        self.has_overlapping_unicast_ranges(&other.unicast_ranges)
            || self.has_overlapping_group_ranges(&other.group_ranges)
            || self.has_overlapping_scene_ranges(&other.scene_ranges)
    }

    pub fn overlaps_range(&self, range: &AnyRange) -> bool {
        match range {
            AnyRange::Unicast(r) => self.unicast_ranges.overlaps_range(r),
            AnyRange::Group(r) => self.group_ranges.overlaps_range(r),
            AnyRange::Scene(r) => self.scene_ranges.overlaps_range(r),
        }
    }
}
