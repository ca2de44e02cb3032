//! The mesh directory aggregate.
//!
//! Owns keys, provisioners, nodes, the IV Index and the exclusion map, and
//! enforces the rules that tie them together. Reads hand out clones; every
//! successful configuration change is reported to the observer exactly once.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mesh_common::DirectoryConfig;
use mesh_core::{
    AllocatedGroupRange, AllocatedSceneRange, AllocatedUnicastRange, AnyRange, BeaconError,
    IvIndex, SecureNetworkBeacon, MAX_KEY_INDEX,
};
use mesh_crypto::replay::MAX_SEQUENCE_NUMBER;
use mesh_crypto::{
    ApplicationKey, KeyMaterial, KeyRefreshError, KeyRefreshPhase, MeshCrypto, NetworkKey,
    ReplayProtectionList,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::allocation;
use crate::beacon::{
    authenticate, can_overwrite, next_iv_index, BeaconApplied, BeaconOutcome, BeaconRejection,
    IvUpdatePolicy,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{DirectoryError, Result};
use crate::exclusions::NetworkExclusions;
use crate::node::{KeyKind, ProvisionedNode};
use crate::observer::{MeshChange, MeshObserver, NoopObserver};
use crate::provisioner::Provisioner;
use crate::registry::ProvisionerRegistry;
use crate::snapshot::{MeshSnapshot, SCHEMA_VERSION};

pub const DEFAULT_MESH_NAME: &str = "Mesh Network";

pub struct MeshDirectory {
    mesh_uuid: Uuid,
    mesh_name: String,
    config: DirectoryConfig,
    crypto: Arc<dyn MeshCrypto>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn MeshObserver>,
    net_keys: Vec<NetworkKey>,
    app_keys: Vec<ApplicationKey>,
    registry: ProvisionerRegistry,
    nodes: Vec<ProvisionedNode>,
    iv_index: IvIndex,
    exclusions: NetworkExclusions,
    replay: ReplayProtectionList,
    timestamp: DateTime<Utc>,
}

fn refresh_error(kind: KeyKind, err: KeyRefreshError) -> DirectoryError {
    match err {
        KeyRefreshError::DuplicateKeyMaterial => DirectoryError::DuplicateKeyMaterial(kind),
        other => other.into(),
    }
}

/// Lowest unused index above every existing one, or 0 when there are none.
fn next_key_index(existing: impl Iterator<Item = u16>) -> Result<u16> {
    match existing.max() {
        None => Ok(0),
        Some(max) if max >= MAX_KEY_INDEX => Err(DirectoryError::InvalidKeyIndex(max.saturating_add(1))),
        Some(max) => Ok(max + 1),
    }
}

/// Rules a node must satisfy against the nodes and keys already present.
/// Returns its element block.
fn check_node(
    node: &ProvisionedNode,
    nodes: &[ProvisionedNode],
    net_keys: &[NetworkKey],
    app_keys: &[ApplicationKey],
) -> Result<RangeInclusive<u16>> {
    if nodes.iter().any(|n| n.uuid == node.uuid) {
        return Err(DirectoryError::DuplicateNode(node.uuid));
    }
    let block = node
        .addresses()
        .ok_or(DirectoryError::AddressOutOfAllocation(node.unicast_address))?;
    if let Some(address) = block
        .clone()
        .find(|&a| nodes.iter().any(|n| n.contains_address(a)))
    {
        return Err(DirectoryError::AddressInUse(address));
    }
    if node
        .net_keys
        .iter()
        .any(|k| !net_keys.iter().any(|nk| nk.index() == k.index))
    {
        return Err(DirectoryError::MissingPrerequisite(
            "node references an unknown network key",
        ));
    }
    if node
        .app_keys
        .iter()
        .any(|k| !app_keys.iter().any(|ak| ak.index() == k.index))
    {
        return Err(DirectoryError::MissingPrerequisite(
            "node references an unknown application key",
        ));
    }
    Ok(block)
}

impl MeshDirectory {
    pub fn new(config: DirectoryConfig, crypto: Arc<dyn MeshCrypto>) -> Self {
        Self::with_clock(config, crypto, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: DirectoryConfig,
        crypto: Arc<dyn MeshCrypto>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            mesh_uuid: Uuid::new_v4(),
            mesh_name: DEFAULT_MESH_NAME.to_string(),
            config,
            crypto,
            clock,
            observer: Arc::new(NoopObserver),
            net_keys: Vec::new(),
            app_keys: Vec::new(),
            registry: ProvisionerRegistry::new(),
            nodes: Vec::new(),
            iv_index: IvIndex::new(0, false, now),
            exclusions: NetworkExclusions::new(),
            replay: ReplayProtectionList::new(),
            timestamp: now,
        }
    }

    /// Rebuilds a directory from a snapshot, re-deriving key material and
    /// re-checking provisioner admission.
    pub fn from_snapshot(
        snapshot: MeshSnapshot,
        config: DirectoryConfig,
        crypto: Arc<dyn MeshCrypto>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if snapshot.schema != SCHEMA_VERSION {
            return Err(DirectoryError::IncompatibleSnapshot(format!(
                "schema {} (expected {SCHEMA_VERSION})",
                snapshot.schema
            )));
        }

        let mut net_keys = Vec::with_capacity(snapshot.net_keys.len());
        for record in snapshot.net_keys {
            let key = NetworkKey::from_record(record, crypto.as_ref())?;
            if net_keys.iter().any(|k: &NetworkKey| k.index() == key.index()) {
                return Err(DirectoryError::IncompatibleSnapshot(format!(
                    "network key index {} appears twice",
                    key.index()
                )));
            }
            net_keys.push(key);
        }
        net_keys.sort_by_key(NetworkKey::index);

        let mut app_keys = Vec::with_capacity(snapshot.app_keys.len());
        for record in snapshot.app_keys {
            let key = ApplicationKey::from_record(record, crypto.as_ref())?;
            let Some(bound) = net_keys
                .iter()
                .find(|k: &&NetworkKey| k.index() == key.bound_net_key_index())
            else {
                return Err(DirectoryError::IncompatibleSnapshot(format!(
                    "application key {} is bound to missing network key {}",
                    key.index(),
                    key.bound_net_key_index()
                )));
            };
            if app_keys.iter().any(|k: &ApplicationKey| k.index() == key.index()) {
                return Err(DirectoryError::IncompatibleSnapshot(format!(
                    "application key index {} appears twice",
                    key.index()
                )));
            }
            if key.old_key().is_some() && bound.phase() == KeyRefreshPhase::Normal {
                return Err(DirectoryError::IncompatibleSnapshot(format!(
                    "application key {} keeps an old value but network key {} is not refreshing",
                    key.index(),
                    key.bound_net_key_index()
                )));
            }
            app_keys.push(key);
        }
        app_keys.sort_by_key(ApplicationKey::index);

        let mut nodes: Vec<ProvisionedNode> = Vec::with_capacity(snapshot.nodes.len());
        for node in snapshot.nodes {
            check_node(&node, &nodes, &net_keys, &app_keys)
                .map_err(|err| DirectoryError::IncompatibleSnapshot(err.to_string()))?;
            nodes.push(node);
        }

        let registry = ProvisionerRegistry::restore(snapshot.provisioners, &nodes)?;

        info!(
            mesh = %snapshot.mesh_uuid,
            net_keys = net_keys.len(),
            app_keys = app_keys.len(),
            provisioners = registry.len(),
            nodes = nodes.len(),
            "directory restored"
        );

        Ok(Self {
            mesh_uuid: snapshot.mesh_uuid,
            mesh_name: snapshot.mesh_name,
            config,
            crypto,
            clock,
            observer: Arc::new(NoopObserver),
            net_keys,
            app_keys,
            registry,
            nodes,
            iv_index: snapshot.iv_index,
            exclusions: snapshot.network_exclusions,
            replay: ReplayProtectionList::new(),
            timestamp: snapshot.timestamp,
        })
    }

    pub fn snapshot(&self) -> MeshSnapshot {
        MeshSnapshot {
            schema: SCHEMA_VERSION.to_string(),
            mesh_uuid: self.mesh_uuid,
            mesh_name: self.mesh_name.clone(),
            timestamp: self.timestamp,
            iv_index: self.iv_index,
            net_keys: self.net_keys.iter().map(NetworkKey::record).collect(),
            app_keys: self.app_keys.iter().map(ApplicationKey::record).collect(),
            provisioners: self.registry.iter().cloned().collect(),
            nodes: self.nodes.clone(),
            network_exclusions: self.exclusions.clone(),
        }
    }

    pub fn set_observer(&mut self, observer: Arc<dyn MeshObserver>) {
        self.observer = observer;
    }

    pub fn mesh_uuid(&self) -> Uuid {
        self.mesh_uuid
    }

    pub fn mesh_name(&self) -> &str {
        &self.mesh_name
    }

    pub fn set_mesh_name(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DirectoryError::InvalidName);
        }
        if name == self.mesh_name {
            return Ok(());
        }
        self.mesh_name = name.clone();
        self.commit(MeshChange::MeshRenamed { name });
        Ok(())
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn commit(&mut self, change: MeshChange) {
        self.timestamp = self.now();
        self.observer.on_change(&change);
    }

    fn policy(&self) -> IvUpdatePolicy {
        IvUpdatePolicy {
            test_mode: self.config.iv_update_test_mode,
            allow_recovery_over_42: self.config.allow_iv_recovery_over_42,
        }
    }

    /// The selected provisioner's own node, if it has one.
    fn selected_node_uuid(&self) -> Option<Uuid> {
        let uuid = self.registry.selected()?.uuid();
        self.nodes.iter().any(|n| n.uuid == uuid).then_some(uuid)
    }

    /// A key is in use when a node other than the selected provisioner's own holds it.
    pub fn is_key_in_use(&self, kind: KeyKind, index: u16) -> bool {
        let own = self.selected_node_uuid();
        self.nodes
            .iter()
            .filter(|n| Some(n.uuid) != own)
            .any(|n| n.has_key(kind, index))
    }

    fn mark_nodes_for_update(&mut self, kind: KeyKind, index: u16) {
        let own = self.selected_node_uuid();
        for node in &mut self.nodes {
            let updated = Some(node.uuid) == own;
            node.set_key_updated(kind, index, updated);
        }
    }

    fn net_key_pos(&self, index: u16) -> Result<usize> {
        self.net_keys
            .iter()
            .position(|k| k.index() == index)
            .ok_or(DirectoryError::NetworkKeyNotFound(index))
    }

    fn app_key_pos(&self, index: u16) -> Result<usize> {
        self.app_keys
            .iter()
            .position(|k| k.index() == index)
            .ok_or(DirectoryError::ApplicationKeyNotFound(index))
    }

    // ---------------------------------------------------------------
    // Network keys
    // ---------------------------------------------------------------

    /// Generates a random network key at the next free index and adds it.
    pub fn create_network_key(&mut self) -> Result<NetworkKey> {
        let index = next_key_index(self.net_keys.iter().map(NetworkKey::index))?;
        self.add_network_key(index, KeyMaterial::generate())
    }

    pub fn add_network_key(&mut self, index: u16, key: KeyMaterial) -> Result<NetworkKey> {
        if self.net_keys.iter().any(|k| k.index() == index) {
            return Err(DirectoryError::KeyIndexInUse {
                kind: KeyKind::Network,
                index,
            });
        }
        if self.net_keys.iter().any(|k| k.holds(&key)) {
            return Err(DirectoryError::DuplicateKeyMaterial(KeyKind::Network));
        }

        let mut net_key = NetworkKey::new(index, key, self.crypto.as_ref(), self.now())?;
        net_key.set_mesh_uuid(self.mesh_uuid);
        self.net_keys.push(net_key.clone());
        self.net_keys.sort_by_key(NetworkKey::index);

        info!(index, "network key added");
        self.commit(MeshChange::NetworkKeyAdded { index });
        Ok(net_key)
    }

    /// Replaces a key value in place. Only allowed while no other node holds it.
    pub fn update_network_key(&mut self, index: u16, key: KeyMaterial) -> Result<NetworkKey> {
        let pos = self.net_key_pos(index)?;
        if self.is_key_in_use(KeyKind::Network, index) {
            return Err(DirectoryError::KeyInUse {
                kind: KeyKind::Network,
                index,
            });
        }
        if self
            .net_keys
            .iter()
            .any(|k| k.index() != index && k.holds(&key))
        {
            return Err(DirectoryError::DuplicateKeyMaterial(KeyKind::Network));
        }

        let now = self.now();
        self.net_keys[pos]
            .set_key(key, self.crypto.as_ref(), now)
            .map_err(|e| refresh_error(KeyKind::Network, e))?;

        debug!(index, "network key updated in place");
        self.commit(MeshChange::NetworkKeyUpdated { index });
        Ok(self.net_keys[pos].clone())
    }

    pub fn rename_network_key(&mut self, index: u16, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(DirectoryError::InvalidName);
        }
        let pos = self.net_key_pos(index)?;
        self.net_keys[pos].set_name(name);
        self.commit(MeshChange::NetworkKeyUpdated { index });
        Ok(())
    }

    pub fn remove_network_key(&mut self, index: u16) -> Result<NetworkKey> {
        let pos = self.net_key_pos(index)?;
        let bound_app_key = self
            .app_keys
            .iter()
            .any(|k| k.bound_net_key_index() == index);
        if bound_app_key || self.is_key_in_use(KeyKind::Network, index) {
            return Err(DirectoryError::KeyInUse {
                kind: KeyKind::Network,
                index,
            });
        }

        let removed = self.net_keys.remove(pos);
        for node in &mut self.nodes {
            node.remove_key(KeyKind::Network, index);
        }

        info!(index, "network key removed");
        self.commit(MeshChange::NetworkKeyRemoved { index });
        Ok(removed)
    }

    /// Starts a Key Refresh with `new_key`. Re-distributing the same value is a no-op.
    pub fn distribute_net_key(&mut self, index: u16, new_key: KeyMaterial) -> Result<NetworkKey> {
        let pos = self.net_key_pos(index)?;
        if self
            .net_keys
            .iter()
            .any(|k| k.index() != index && k.holds(&new_key))
        {
            return Err(DirectoryError::DuplicateKeyMaterial(KeyKind::Network));
        }

        let now = self.now();
        let changed = self.net_keys[pos]
            .distribute(new_key, self.crypto.as_ref(), now)
            .map_err(|e| refresh_error(KeyKind::Network, e))?;

        if changed {
            self.mark_nodes_for_update(KeyKind::Network, index);
            info!(index, "network key distribution started");
            self.commit(MeshChange::NetworkKeyUpdated { index });
        }
        Ok(self.net_keys[pos].clone())
    }

    pub fn switch_to_new_key(&mut self, index: u16) -> Result<NetworkKey> {
        let pos = self.net_key_pos(index)?;
        let now = self.now();
        self.net_keys[pos].switch_to_new_key(now)?;
        info!(index, "switched to new network key");
        self.commit(MeshChange::NetworkKeyUpdated { index });
        Ok(self.net_keys[pos].clone())
    }

    /// Ends the refresh. Old values of application keys bound to this key go too.
    pub fn revoke_old_key(&mut self, index: u16) -> Result<NetworkKey> {
        let pos = self.net_key_pos(index)?;
        let now = self.now();
        self.net_keys[pos].revoke_old_key(now)?;

        let mut revoked_app_keys = 0usize;
        for app_key in self
            .app_keys
            .iter_mut()
            .filter(|k| k.bound_net_key_index() == index)
        {
            if app_key.revoke_old_key() {
                revoked_app_keys += 1;
            }
        }

        info!(index, revoked_app_keys, "old network key revoked");
        self.commit(MeshChange::NetworkKeyUpdated { index });
        Ok(self.net_keys[pos].clone())
    }

    pub fn network_key(&self, index: u16) -> Option<NetworkKey> {
        self.net_keys.iter().find(|k| k.index() == index).cloned()
    }

    pub fn network_keys(&self) -> Vec<NetworkKey> {
        self.net_keys.clone()
    }

    pub fn primary_network_key(&self) -> Option<NetworkKey> {
        self.net_keys.iter().find(|k| k.is_primary()).cloned()
    }

    // ---------------------------------------------------------------
    // Application keys
    // ---------------------------------------------------------------

    pub fn create_app_key(&mut self, bound_net_key_index: u16) -> Result<ApplicationKey> {
        if self.net_keys.is_empty() {
            return Err(DirectoryError::MissingPrerequisite("a network key must exist"));
        }
        let index = next_key_index(self.app_keys.iter().map(ApplicationKey::index))?;
        self.add_app_key(index, bound_net_key_index, KeyMaterial::generate())
    }

    pub fn add_app_key(
        &mut self,
        index: u16,
        bound_net_key_index: u16,
        key: KeyMaterial,
    ) -> Result<ApplicationKey> {
        if self.net_keys.is_empty() {
            return Err(DirectoryError::MissingPrerequisite("a network key must exist"));
        }
        if self.net_key_pos(bound_net_key_index).is_err() {
            return Err(DirectoryError::MissingPrerequisite(
                "bound network key must exist",
            ));
        }
        if self.app_keys.iter().any(|k| k.index() == index) {
            return Err(DirectoryError::KeyIndexInUse {
                kind: KeyKind::Application,
                index,
            });
        }
        if self.app_keys.iter().any(|k| k.holds(&key)) {
            return Err(DirectoryError::DuplicateKeyMaterial(KeyKind::Application));
        }

        let mut app_key =
            ApplicationKey::new(index, bound_net_key_index, key, self.crypto.as_ref())?;
        app_key.set_mesh_uuid(self.mesh_uuid);
        self.app_keys.push(app_key.clone());
        self.app_keys.sort_by_key(ApplicationKey::index);

        info!(index, bound_net_key_index, "application key added");
        self.commit(MeshChange::AppKeyAdded { index });
        Ok(app_key)
    }

    pub fn update_app_key(&mut self, index: u16, key: KeyMaterial) -> Result<ApplicationKey> {
        let pos = self.app_key_pos(index)?;
        if self.is_key_in_use(KeyKind::Application, index) {
            return Err(DirectoryError::KeyInUse {
                kind: KeyKind::Application,
                index,
            });
        }
        if self
            .app_keys
            .iter()
            .any(|k| k.index() != index && k.holds(&key))
        {
            return Err(DirectoryError::DuplicateKeyMaterial(KeyKind::Application));
        }

        self.app_keys[pos]
            .set_key(key, self.crypto.as_ref())
            .map_err(|e| refresh_error(KeyKind::Application, e))?;

        debug!(index, "application key updated in place");
        self.commit(MeshChange::AppKeyUpdated { index });
        Ok(self.app_keys[pos].clone())
    }

    pub fn rename_app_key(&mut self, index: u16, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(DirectoryError::InvalidName);
        }
        let pos = self.app_key_pos(index)?;
        self.app_keys[pos].set_name(name);
        self.commit(MeshChange::AppKeyUpdated { index });
        Ok(())
    }

    pub fn remove_app_key(&mut self, index: u16) -> Result<ApplicationKey> {
        let pos = self.app_key_pos(index)?;
        if self.is_key_in_use(KeyKind::Application, index) {
            return Err(DirectoryError::KeyInUse {
                kind: KeyKind::Application,
                index,
            });
        }

        let removed = self.app_keys.remove(pos);
        for node in &mut self.nodes {
            node.remove_key(KeyKind::Application, index);
        }

        info!(index, "application key removed");
        self.commit(MeshChange::AppKeyRemoved { index });
        Ok(removed)
    }

    /// Distributes a new application key value. The bound network key must be
    /// in key distribution.
    pub fn distribute_app_key(&mut self, index: u16, new_key: KeyMaterial) -> Result<ApplicationKey> {
        let pos = self.app_key_pos(index)?;
        let bound = self.app_keys[pos].bound_net_key_index();
        let phase = self.net_keys[self.net_key_pos(bound)?].phase();
        if phase != KeyRefreshPhase::KeyDistribution {
            return Err(DirectoryError::InvalidPhaseTransition {
                operation: "distribute an application key",
                phase,
            });
        }
        if self
            .app_keys
            .iter()
            .any(|k| k.index() != index && k.holds(&new_key))
        {
            return Err(DirectoryError::DuplicateKeyMaterial(KeyKind::Application));
        }

        let changed = self.app_keys[pos]
            .distribute(new_key, self.crypto.as_ref())
            .map_err(|e| refresh_error(KeyKind::Application, e))?;

        if changed {
            self.mark_nodes_for_update(KeyKind::Application, index);
            info!(index, bound, "application key distribution started");
            self.commit(MeshChange::AppKeyUpdated { index });
        }
        Ok(self.app_keys[pos].clone())
    }

    pub fn app_key(&self, index: u16) -> Option<ApplicationKey> {
        self.app_keys.iter().find(|k| k.index() == index).cloned()
    }

    pub fn app_keys(&self) -> Vec<ApplicationKey> {
        self.app_keys.clone()
    }

    pub fn app_keys_bound_to(&self, net_key_index: u16) -> Vec<ApplicationKey> {
        self.app_keys
            .iter()
            .filter(|k| k.bound_net_key_index() == net_key_index)
            .cloned()
            .collect()
    }

    // ---------------------------------------------------------------
    // Provisioners
    // ---------------------------------------------------------------

    /// Builds a provisioner for this mesh. Nothing is registered.
    pub fn create_provisioner(
        &self,
        name: &str,
        unicast: AllocatedUnicastRange,
        group: AllocatedGroupRange,
        scene: AllocatedSceneRange,
    ) -> Result<Provisioner> {
        let mut provisioner = Provisioner::new(
            Uuid::new_v4(),
            name,
            unicast,
            group,
            scene,
            self.config.global_ttl,
        )?;
        provisioner.set_mesh_uuid(self.mesh_uuid);
        Ok(provisioner)
    }

    /// A provisioner with the configured name and default ranges.
    pub fn create_default_provisioner(&self) -> Result<Provisioner> {
        self.create_provisioner(
            &self.config.provisioner_name,
            self.config.default_unicast_range,
            self.config.default_group_range,
            self.config.default_scene_range,
        )
    }

    /// Admits a provisioner. One with an address also gets its own node,
    /// holding every current key.
    pub fn add_provisioner(&mut self, mut provisioner: Provisioner) -> Result<Provisioner> {
        provisioner.set_mesh_uuid(self.mesh_uuid);
        let uuid = provisioner.uuid();

        if let Some(addr) = provisioner.address() {
            if self.exclusions.is_blocked(addr, self.iv_index.index) {
                return Err(DirectoryError::AddressInUse(addr));
            }
        }
        self.registry.admit(provisioner.clone(), &self.nodes)?;

        if let Some(addr) = provisioner.address() {
            if !self.nodes.iter().any(|n| n.uuid == uuid) {
                let node = self.provisioner_node(&provisioner, addr);
                self.nodes.push(node);
            }
        }

        self.commit(MeshChange::ProvisionerAdded { uuid });
        self.registry
            .get(uuid)
            .cloned()
            .ok_or(DirectoryError::ProvisionerNotFound(uuid))
    }

    fn provisioner_node(&self, provisioner: &Provisioner, address: u16) -> ProvisionedNode {
        let mut node = ProvisionedNode::new(provisioner.uuid(), provisioner.name(), address, 1);
        for key in &self.net_keys {
            node.add_key(KeyKind::Network, key.index());
        }
        for key in &self.app_keys {
            node.add_key(KeyKind::Application, key.index());
        }
        node.ttl = Some(provisioner.global_ttl());
        node.configured = true;
        node
    }

    pub fn select_provisioner(&mut self, uuid: Uuid) -> Result<()> {
        self.registry.select(uuid)?;
        self.commit(MeshChange::ProvisionerSelected { uuid });
        Ok(())
    }

    /// Unregisters a provisioner and drops its own node without excluding it.
    pub fn remove_provisioner(&mut self, uuid: Uuid) -> Result<Provisioner> {
        let removed = self
            .registry
            .remove(uuid)
            .ok_or(DirectoryError::ProvisionerNotFound(uuid))?;
        self.nodes.retain(|n| n.uuid != uuid);
        info!(%uuid, "provisioner removed");
        self.commit(MeshChange::ProvisionerRemoved { uuid });
        Ok(removed)
    }

    pub fn add_provisioner_range(&mut self, uuid: Uuid, range: AnyRange) -> Result<()> {
        self.registry.add_range(uuid, range)?;
        debug!(%uuid, %range, "provisioner range added");
        self.commit(MeshChange::ProvisionerUpdated { uuid });
        Ok(())
    }

    pub fn remove_provisioner_range(&mut self, uuid: Uuid, range: AnyRange) -> Result<bool> {
        let changed = self.registry.remove_range(uuid, range)?;
        if changed {
            debug!(%uuid, %range, "provisioner range removed");
            self.commit(MeshChange::ProvisionerUpdated { uuid });
        }
        Ok(changed)
    }

    /// Gives a provisioner a (new) unicast address and moves or creates its node.
    pub fn set_provisioner_address(&mut self, uuid: Uuid, address: u16) -> Result<()> {
        let mut provisioner = self
            .registry
            .get(uuid)
            .cloned()
            .ok_or(DirectoryError::ProvisionerNotFound(uuid))?;
        provisioner.assign_address(Some(address))?;

        let taken = self
            .nodes
            .iter()
            .any(|n| n.uuid != uuid && n.contains_address(address));
        if taken || self.exclusions.is_blocked(address, self.iv_index.index) {
            return Err(DirectoryError::AddressInUse(address));
        }

        match self.nodes.iter_mut().find(|n| n.uuid == uuid) {
            Some(node) => node.unicast_address = address,
            None => {
                let node = self.provisioner_node(&provisioner, address);
                self.nodes.push(node);
            }
        }
        self.registry.replace(provisioner);
        self.commit(MeshChange::ProvisionerUpdated { uuid });
        Ok(())
    }

    pub fn selected_provisioner(&self) -> Option<Provisioner> {
        self.registry.selected().cloned()
    }

    pub fn provisioner(&self, uuid: Uuid) -> Option<Provisioner> {
        self.registry.get(uuid).cloned()
    }

    pub fn provisioners(&self) -> Vec<Provisioner> {
        self.registry.iter().cloned().collect()
    }

    // ---------------------------------------------------------------
    // Nodes
    // ---------------------------------------------------------------

    /// Registers a newly provisioned node.
    pub fn add_node(&mut self, node: ProvisionedNode) -> Result<()> {
        let mut block = check_node(&node, &self.nodes, &self.net_keys, &self.app_keys)?;
        if let Some(address) = block.find(|&a| self.exclusions.is_blocked(a, self.iv_index.index))
        {
            return Err(DirectoryError::AddressInUse(address));
        }

        let (uuid, address) = (node.uuid, node.unicast_address);
        info!(%uuid, address = format_args!("0x{address:04X}"), elements = node.element_count, "node added");
        self.nodes.push(node);
        self.commit(MeshChange::NodeAdded { uuid, address });
        Ok(())
    }

    /// Excludes and removes a node. Its element addresses are blocked under
    /// the current IV Index and its provisioner, if any, is removed as well.
    pub fn delete_node(&mut self, uuid: Uuid) -> Result<ProvisionedNode> {
        let pos = self
            .nodes
            .iter()
            .position(|n| n.uuid == uuid)
            .ok_or(DirectoryError::NodeNotFound(uuid))?;

        let mut node = self.nodes.remove(pos);
        node.excluded = true;
        if let Some(block) = node.addresses() {
            for address in block.clone() {
                self.replay.remove(address);
            }
            self.exclusions.exclude(self.iv_index.index, block);
        }
        let provisioner_removed = self.registry.remove(uuid).is_some();

        info!(
            %uuid,
            iv_index = self.iv_index.index,
            provisioner_removed,
            "node excluded and deleted"
        );
        self.commit(MeshChange::NodeDeleted {
            uuid,
            address: node.unicast_address,
            provisioner_removed,
        });
        Ok(node)
    }

    pub fn add_node_key(&mut self, uuid: Uuid, kind: KeyKind, index: u16) -> Result<bool> {
        match kind {
            KeyKind::Network => self.net_key_pos(index).map(|_| ())?,
            KeyKind::Application => self.app_key_pos(index).map(|_| ())?,
        }
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.uuid == uuid)
            .ok_or(DirectoryError::NodeNotFound(uuid))?;
        let added = node.add_key(kind, index);
        if added {
            self.commit(MeshChange::NodeUpdated { uuid });
        }
        Ok(added)
    }

    pub fn remove_node_key(&mut self, uuid: Uuid, kind: KeyKind, index: u16) -> Result<bool> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.uuid == uuid)
            .ok_or(DirectoryError::NodeNotFound(uuid))?;
        let removed = node.remove_key(kind, index);
        if removed {
            self.commit(MeshChange::NodeUpdated { uuid });
        }
        Ok(removed)
    }

    /// Records that a node acknowledged the latest value of a key.
    pub fn confirm_node_key_updated(&mut self, uuid: Uuid, kind: KeyKind, index: u16) -> Result<()> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.uuid == uuid)
            .ok_or(DirectoryError::NodeNotFound(uuid))?;
        if !node.set_key_updated(kind, index, true) {
            return Err(match kind {
                KeyKind::Network => DirectoryError::NetworkKeyNotFound(index),
                KeyKind::Application => DirectoryError::ApplicationKeyNotFound(index),
            });
        }
        self.commit(MeshChange::NodeUpdated { uuid });
        Ok(())
    }

    /// Nodes holding a key that have not yet confirmed its latest value.
    pub fn nodes_pending_key_update(&self, kind: KeyKind, index: u16) -> Vec<Uuid> {
        self.nodes
            .iter()
            .filter(|n| n.is_key_updated(kind, index) == Some(false))
            .map(|n| n.uuid)
            .collect()
    }

    pub fn node(&self, uuid: Uuid) -> Option<ProvisionedNode> {
        self.nodes.iter().find(|n| n.uuid == uuid).cloned()
    }

    pub fn node_by_address(&self, address: u16) -> Option<ProvisionedNode> {
        self.nodes
            .iter()
            .find(|n| n.contains_address(address))
            .cloned()
    }

    pub fn nodes(&self) -> Vec<ProvisionedNode> {
        self.nodes.clone()
    }

    /// First-fit address block for a new node inside a provisioner's ranges.
    ///
    /// Uses the selected provisioner when `provisioner` is `None`.
    pub fn next_available_unicast_address(
        &self,
        element_count: u8,
        provisioner: Option<Uuid>,
    ) -> Result<Option<u16>> {
        let provisioner = match provisioner {
            Some(uuid) => self
                .registry
                .get(uuid)
                .ok_or(DirectoryError::ProvisionerNotFound(uuid))?,
            None => self
                .registry
                .selected()
                .ok_or(DirectoryError::NoSelectedProvisioner)?,
        };

        let mut occupied: Vec<_> = self.nodes.iter().filter_map(ProvisionedNode::addresses).collect();
        occupied.extend(
            self.exclusions
                .blocked_addresses(self.iv_index.index)
                .into_iter()
                .map(|a| a..=a),
        );

        Ok(allocation::next_available_unicast_address(
            provisioner.unicast_ranges(),
            &occupied,
            element_count,
        ))
    }

    // ---------------------------------------------------------------
    // IV Index and freshness
    // ---------------------------------------------------------------

    pub fn iv_index(&self) -> IvIndex {
        self.iv_index
    }

    /// Overrides the IV Index, e.g. when joining an existing network.
    pub fn set_iv_index(&mut self, index: u32, update_active: bool) {
        self.iv_index = IvIndex::new(index, update_active, self.now());
        warn!(index, update_active, "iv index set manually");
        self.commit(MeshChange::IvIndexUpdated {
            index,
            update_active,
            sequence_reset: false,
            exclusions_purged: 0,
        });
    }

    pub fn network_exclusions(&self) -> NetworkExclusions {
        self.exclusions.clone()
    }

    /// Authenticates a beacon and, if it is fresh, moves the IV Index.
    pub fn process_beacon(&mut self, beacon: &SecureNetworkBeacon) -> BeaconOutcome {
        let now = self.now();

        let net_key_index = match authenticate(beacon, &self.net_keys, self.crypto.as_ref()) {
            Ok(net_key) => net_key.index(),
            Err(reason) => {
                debug!(?reason, "beacon discarded");
                return BeaconOutcome::Rejected(reason);
            }
        };

        if net_key_index != 0 && self.net_keys.iter().any(NetworkKey::is_primary) {
            debug!(net_key_index, "discarding beacon for secondary subnet");
            return BeaconOutcome::Rejected(BeaconRejection::SecondarySubnet { net_key_index });
        }

        let previous = self.iv_index;
        if let Err(reason) = can_overwrite(
            &previous,
            beacon.iv_index,
            beacon.iv_update_active(),
            now,
            self.policy(),
        ) {
            debug!(
                ?reason,
                beacon_index = beacon.iv_index,
                current_index = previous.index,
                "beacon discarded"
            );
            return BeaconOutcome::Rejected(reason);
        }

        let current = next_iv_index(&previous, beacon, now);
        self.iv_index = current;

        let sequence_reset =
            current.transmit_index() > previous.transmit_index() && self.reset_local_sequence();
        let exclusions_purged = if current.recovery {
            0
        } else {
            self.exclusions.purge(current.index)
        };

        info!(
            from = previous.index,
            to = current.index,
            update_active = current.update_active,
            recovery = current.recovery,
            sequence_reset,
            exclusions_purged,
            "iv index applied"
        );
        self.commit(MeshChange::IvIndexUpdated {
            index: current.index,
            update_active: current.update_active,
            sequence_reset,
            exclusions_purged,
        });

        BeaconOutcome::Applied(BeaconApplied {
            net_key_index,
            previous,
            current,
            sequence_reset,
            exclusions_purged,
        })
    }

    pub fn process_beacon_pdu(&mut self, pdu: &[u8]) -> std::result::Result<BeaconOutcome, BeaconError> {
        let beacon = SecureNetworkBeacon::decode(pdu)?;
        Ok(self.process_beacon(&beacon))
    }

    fn reset_local_sequence(&mut self) -> bool {
        let Some(uuid) = self.selected_node_uuid() else {
            return false;
        };
        match self.nodes.iter_mut().find(|n| n.uuid == uuid) {
            Some(node) => {
                node.sequence_number = 0;
                debug!(%uuid, "local sequence number reset");
                true
            }
            None => false,
        }
    }

    /// Returns true and records the pair if a message is not a replay.
    pub fn check_replay(&mut self, src: u16, iv_index: u32, sequence: u32) -> bool {
        let fresh = self.replay.check_and_update(src, iv_index, sequence);
        if !fresh {
            debug!(src = format_args!("0x{src:04X}"), iv_index, sequence, "replayed message dropped");
        }
        fresh
    }

    pub fn local_sequence_number(&self) -> Option<u32> {
        let uuid = self.selected_node_uuid()?;
        self.nodes
            .iter()
            .find(|n| n.uuid == uuid)
            .map(|n| n.sequence_number)
    }

    /// Allocates the next sequence number of the selected provisioner's node.
    pub fn next_local_sequence_number(&mut self) -> Result<u32> {
        let uuid = self
            .registry
            .selected()
            .map(Provisioner::uuid)
            .ok_or(DirectoryError::NoSelectedProvisioner)?;
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.uuid == uuid)
            .ok_or(DirectoryError::NodeNotFound(uuid))?;
        if node.sequence_number > MAX_SEQUENCE_NUMBER {
            return Err(DirectoryError::SequenceExhausted);
        }
        let sequence = node.sequence_number;
        node.sequence_number += 1;
        Ok(sequence)
    }
}

impl fmt::Debug for MeshDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshDirectory")
            .field("mesh_uuid", &self.mesh_uuid)
            .field("mesh_name", &self.mesh_name)
            .field("net_keys", &self.net_keys.len())
            .field("app_keys", &self.app_keys.len())
            .field("provisioners", &self.registry.len())
            .field("nodes", &self.nodes.len())
            .field("iv_index", &self.iv_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use mesh_crypto::testing::DigestCrypto;

    fn directory() -> MeshDirectory {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        MeshDirectory::with_clock(DirectoryConfig::default(), Arc::new(DigestCrypto), clock)
    }

    #[test]
    fn test_next_key_index() {
        assert_eq!(next_key_index(std::iter::empty()), Ok(0));
        assert_eq!(next_key_index([0u16, 4, 2].into_iter()), Ok(5));
        assert!(next_key_index([MAX_KEY_INDEX].into_iter()).is_err());
    }

    #[test]
    fn test_created_keys_are_dense() {
        let mut dir = directory();
        for expected in 0..4u16 {
            assert_eq!(dir.create_network_key().unwrap().index(), expected);
        }
        for expected in 0..3u16 {
            assert_eq!(dir.create_app_key(0).unwrap().index(), expected);
        }
    }

    #[test]
    fn test_app_key_requires_network_key() {
        let mut dir = directory();
        assert_eq!(
            dir.create_app_key(0).unwrap_err(),
            DirectoryError::MissingPrerequisite("a network key must exist")
        );
        dir.create_network_key().unwrap();
        assert!(matches!(
            dir.create_app_key(7),
            Err(DirectoryError::MissingPrerequisite(_))
        ));
    }

    #[test]
    fn test_next_local_sequence_number() {
        let mut dir = directory();
        assert_eq!(
            dir.next_local_sequence_number(),
            Err(DirectoryError::NoSelectedProvisioner)
        );
        let mut p = dir.create_default_provisioner().unwrap();
        p.assign_address(Some(0x0001)).unwrap();
        dir.add_provisioner(p).unwrap();

        assert_eq!(dir.next_local_sequence_number(), Ok(0));
        assert_eq!(dir.next_local_sequence_number(), Ok(1));
        assert_eq!(dir.local_sequence_number(), Some(2));
    }
}
