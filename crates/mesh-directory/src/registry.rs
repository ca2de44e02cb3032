//! Provisioner admission and selection.
//!
//! Invariants held at all times:
//! - no two admitted provisioners have overlapping ranges of any kind
//! - at most one provisioner is selected, and one is whenever any exist

use mesh_core::AnyRange;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DirectoryError, Result};
use crate::node::ProvisionedNode;
use crate::provisioner::Provisioner;

#[derive(Debug, Clone, Default)]
pub struct ProvisionerRegistry {
    provisioners: Vec<Provisioner>,
}

impl ProvisionerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks every admission rule without changing anything.
    pub fn check_admission(&self, candidate: &Provisioner, nodes: &[ProvisionedNode]) -> Result<()> {
        if self.get(candidate.uuid()).is_some() {
            return Err(DirectoryError::DuplicateProvisioner(candidate.uuid()));
        }
        if let Some(other) = self.overlapping(candidate, None) {
            return Err(DirectoryError::RangeOverlap(other));
        }
        if let Some(addr) = candidate.address() {
            if !candidate.is_address_within_allocated_range(Some(addr))? {
                return Err(DirectoryError::AddressOutOfAllocation(addr));
            }
            let taken = nodes
                .iter()
                .any(|n| n.uuid != candidate.uuid() && n.contains_address(addr));
            if taken {
                return Err(DirectoryError::AddressInUse(addr));
            }
        }
        Ok(())
    }

    /// Admits a provisioner. The first one admitted becomes selected.
    pub fn admit(&mut self, mut provisioner: Provisioner, nodes: &[ProvisionedNode]) -> Result<()> {
        self.check_admission(&provisioner, nodes)?;
        let first = self.provisioners.is_empty();
        provisioner.set_last_selected(first);
        info!(uuid = %provisioner.uuid(), name = provisioner.name(), selected = first, "provisioner admitted");
        self.provisioners.push(provisioner);
        Ok(())
    }

    /// Restores provisioners, keeping their selection flags if exactly one is set.
    pub(crate) fn restore(provisioners: Vec<Provisioner>, nodes: &[ProvisionedNode]) -> Result<Self> {
        let selected = provisioners
            .iter()
            .filter(|p| p.is_last_selected())
            .map(Provisioner::uuid)
            .next();

        let mut registry = Self::new();
        for p in provisioners {
            registry.admit(p, nodes)?;
        }
        if let Some(uuid) = selected {
            registry.select(uuid)?;
        }
        Ok(registry)
    }

    /// First admitted provisioner (other than `ignore`) whose ranges overlap `candidate`.
    pub fn overlapping(&self, candidate: &Provisioner, ignore: Option<Uuid>) -> Option<Uuid> {
        self.provisioners
            .iter()
            .filter(|p| Some(p.uuid()) != ignore && p.uuid() != candidate.uuid())
            .find(|p| p.has_overlap(candidate))
            .map(Provisioner::uuid)
    }

    pub fn select(&mut self, uuid: Uuid) -> Result<()> {
        if self.get(uuid).is_none() {
            return Err(DirectoryError::ProvisionerNotFound(uuid));
        }
        for p in &mut self.provisioners {
            p.set_last_selected(p.uuid() == uuid);
        }
        debug!(%uuid, "provisioner selected");
        Ok(())
    }

    pub fn remove(&mut self, uuid: Uuid) -> Option<Provisioner> {
        let pos = self.provisioners.iter().position(|p| p.uuid() == uuid)?;
        let removed = self.provisioners.remove(pos);
        if removed.is_last_selected() {
            if let Some(next) = self.provisioners.first_mut() {
                next.set_last_selected(true);
            }
        }
        Some(removed)
    }

    /// Adds a range to an admitted provisioner if no other provisioner owns any of it.
    pub fn add_range(&mut self, uuid: Uuid, range: AnyRange) -> Result<()> {
        let mut updated = self
            .get(uuid)
            .cloned()
            .ok_or(DirectoryError::ProvisionerNotFound(uuid))?;
        if let Some(owner) = self
            .provisioners
            .iter()
            .find(|p| p.uuid() != uuid && p.overlaps_range(&range))
        {
            return Err(DirectoryError::RangeOverlap(owner.uuid()));
        }
        updated.add_range(range);
        self.replace(updated);
        Ok(())
    }

    pub fn remove_range(&mut self, uuid: Uuid, range: AnyRange) -> Result<bool> {
        let provisioner = self
            .get_mut(uuid)
            .ok_or(DirectoryError::ProvisionerNotFound(uuid))?;
        provisioner.remove_range(range)
    }

    pub(crate) fn replace(&mut self, provisioner: Provisioner) {
        if let Some(slot) = self
            .provisioners
            .iter_mut()
            .find(|p| p.uuid() == provisioner.uuid())
        {
            *slot = provisioner;
        }
    }

    pub fn get(&self, uuid: Uuid) -> Option<&Provisioner> {
        self.provisioners.iter().find(|p| p.uuid() == uuid)
    }

    pub(crate) fn get_mut(&mut self, uuid: Uuid) -> Option<&mut Provisioner> {
        self.provisioners.iter_mut().find(|p| p.uuid() == uuid)
    }

    pub fn selected(&self) -> Option<&Provisioner> {
        self.provisioners.iter().find(|p| p.is_last_selected())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Provisioner> {
        self.provisioners.iter()
    }

    pub fn len(&self) -> usize {
        self.provisioners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.provisioners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::{AllocatedGroupRange, AllocatedSceneRange, AllocatedUnicastRange};

    fn provisioner(unicast: (u16, u16), group: (u16, u16), scene: (u16, u16)) -> Provisioner {
        Provisioner::new(
            Uuid::new_v4(),
            "p",
            AllocatedUnicastRange::new(unicast.0, unicast.1).unwrap(),
            AllocatedGroupRange::new(group.0, group.1).unwrap(),
            AllocatedSceneRange::new(scene.0, scene.1).unwrap(),
            5,
        )
        .unwrap()
    }

    #[test]
    fn test_overlap_rejected_and_existing_untouched() {
        let mut registry = ProvisionerRegistry::new();
        let a = provisioner((1, 100), (0xC000, 0xC0FF), (1, 0xFF));
        let a_uuid = a.uuid();
        registry.admit(a.clone(), &[]).unwrap();

        let b = provisioner((50, 150), (0xD000, 0xD0FF), (0x100, 0x1FF));
        assert_eq!(
            registry.admit(b, &[]),
            Err(DirectoryError::RangeOverlap(a_uuid))
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(a_uuid).unwrap().unicast_ranges(), a.unicast_ranges());
    }

    #[test]
    fn test_first_admitted_is_selected() {
        let mut registry = ProvisionerRegistry::new();
        let a = provisioner((1, 100), (0xC000, 0xC0FF), (1, 0xFF));
        let b = provisioner((101, 200), (0xC100, 0xC1FF), (0x100, 0x1FF));
        let (a_uuid, b_uuid) = (a.uuid(), b.uuid());
        registry.admit(a, &[]).unwrap();
        registry.admit(b, &[]).unwrap();
        assert_eq!(registry.selected().map(Provisioner::uuid), Some(a_uuid));

        registry.select(b_uuid).unwrap();
        assert_eq!(registry.selected().map(Provisioner::uuid), Some(b_uuid));
        assert_eq!(registry.iter().filter(|p| p.is_last_selected()).count(), 1);

        registry.remove(b_uuid);
        assert_eq!(registry.selected().map(Provisioner::uuid), Some(a_uuid));
    }

    #[test]
    fn test_address_in_use_by_other_node() {
        let registry = ProvisionerRegistry::new();
        let mut p = provisioner((1, 100), (0xC000, 0xC0FF), (1, 0xFF));
        p.assign_address(Some(0x0005)).unwrap();
        let node = ProvisionedNode::new(Uuid::new_v4(), "lamp", 0x0004, 2);
        assert_eq!(
            registry.check_admission(&p, &[node]),
            Err(DirectoryError::AddressInUse(0x0005))
        );
    }

    #[test]
    fn test_duplicate_uuid() {
        let mut registry = ProvisionerRegistry::new();
        let a = provisioner((1, 100), (0xC000, 0xC0FF), (1, 0xFF));
        registry.admit(a.clone(), &[]).unwrap();
        assert_eq!(
            registry.admit(a.clone(), &[]),
            Err(DirectoryError::DuplicateProvisioner(a.uuid()))
        );
    }

    #[test]
    fn test_add_range_checks_other_provisioners() {
        let mut registry = ProvisionerRegistry::new();
        let a = provisioner((1, 100), (0xC000, 0xC0FF), (1, 0xFF));
        let b = provisioner((101, 200), (0xC100, 0xC1FF), (0x100, 0x1FF));
        let (a_uuid, b_uuid) = (a.uuid(), b.uuid());
        registry.admit(a, &[]).unwrap();
        registry.admit(b, &[]).unwrap();

        let stolen = AllocatedUnicastRange::new(150, 160).unwrap();
        assert_eq!(
            registry.add_range(a_uuid, stolen.into()),
            Err(DirectoryError::RangeOverlap(b_uuid))
        );

        let free = AllocatedUnicastRange::new(300, 400).unwrap();
        registry.add_range(a_uuid, free.into()).unwrap();
        assert!(registry.get(a_uuid).unwrap().unicast_ranges().contains(350));
    }
}
