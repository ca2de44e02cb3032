//! End-to-end behaviour of the directory through its public API.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use mesh_common::DirectoryConfig;
use mesh_core::{
    AllocatedGroupRange, AllocatedSceneRange, AllocatedUnicastRange, BeaconFlags,
    SecureNetworkBeacon,
};
use mesh_crypto::testing::DigestCrypto;
use mesh_crypto::{KeyMaterial, KeyRefreshPhase, MeshCrypto};
use mesh_directory::{
    BeaconOutcome, BeaconRejection, DirectoryError, KeyKind, ManualClock, MeshChange,
    MeshDirectory, MeshObserver, MeshSnapshot, ProvisionedNode, Provisioner,
};
use uuid::Uuid;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn key(byte: u8) -> KeyMaterial {
    KeyMaterial::new([byte; 16])
}

fn setup() -> (MeshDirectory, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let dir = MeshDirectory::with_clock(
        DirectoryConfig::default(),
        Arc::new(DigestCrypto),
        clock.clone(),
    );
    (dir, clock)
}

/// Primary net key 0 and a selected provisioner owning the whole space at 0x0001.
fn setup_with_provisioner() -> (MeshDirectory, Arc<ManualClock>, Uuid) {
    let (mut dir, clock) = setup();
    dir.add_network_key(0, key(1)).unwrap();
    let mut p = dir.create_default_provisioner().unwrap();
    p.assign_address(Some(0x0001)).unwrap();
    let uuid = dir.add_provisioner(p).unwrap().uuid();
    (dir, clock, uuid)
}

fn signed_beacon(with: &KeyMaterial, iv_index: u32, update_active: bool) -> SecureNetworkBeacon {
    let crypto = DigestCrypto;
    let flags = if update_active {
        BeaconFlags::IV_UPDATE
    } else {
        BeaconFlags::empty()
    };
    let mut beacon = SecureNetworkBeacon {
        flags,
        network_id: crypto.derive_network_id(with),
        iv_index,
        auth_value: [0; 8],
    };
    beacon.auth_value = crypto.beacon_auth_value(with, &beacon.authenticated_payload());
    beacon
}

#[derive(Default)]
struct Recorder {
    changes: Mutex<Vec<MeshChange>>,
}

impl Recorder {
    fn take(&self) -> Vec<MeshChange> {
        std::mem::take(&mut *self.changes.lock().unwrap())
    }
}

impl MeshObserver for Recorder {
    fn on_change(&self, change: &MeshChange) {
        self.changes.lock().unwrap().push(change.clone());
    }
}

#[test]
fn test_key_indices_continue_after_highest() {
    let (mut dir, _) = setup();
    dir.add_network_key(5, key(5)).unwrap();
    assert_eq!(dir.create_network_key().unwrap().index(), 6);
    assert!(matches!(
        dir.add_network_key(5, key(9)),
        Err(DirectoryError::KeyIndexInUse {
            kind: KeyKind::Network,
            index: 5
        })
    ));
    assert_eq!(
        dir.add_network_key(7, key(5)).unwrap_err(),
        DirectoryError::DuplicateKeyMaterial(KeyKind::Network)
    );
}

#[test]
fn test_key_in_use_blocks_update_and_removal() {
    let (mut dir, _, _) = setup_with_provisioner();

    // Only the provisioner's own node holds key 0.
    dir.update_network_key(0, key(2)).unwrap();

    let lamp = ProvisionedNode::new(Uuid::new_v4(), "lamp", 0x0010, 1).with_net_key(0);
    dir.add_node(lamp).unwrap();
    assert_eq!(
        dir.update_network_key(0, key(3)).unwrap_err(),
        DirectoryError::KeyInUse {
            kind: KeyKind::Network,
            index: 0
        }
    );
    assert!(matches!(
        dir.remove_network_key(0),
        Err(DirectoryError::KeyInUse { .. })
    ));

    dir.add_network_key(1, key(4)).unwrap();
    dir.create_app_key(1).unwrap();
    assert!(matches!(
        dir.remove_network_key(1),
        Err(DirectoryError::KeyInUse { index: 1, .. })
    ));
}

#[test]
fn test_second_distribution_with_new_value_rejected() {
    let (mut dir, _) = setup();
    dir.add_network_key(0, key(1)).unwrap();
    dir.add_network_key(3, key(3)).unwrap();

    let distributed = dir.distribute_net_key(3, key(4)).unwrap();
    assert_eq!(distributed.phase(), KeyRefreshPhase::KeyDistribution);

    let err = dir.distribute_net_key(3, key(5)).unwrap_err();
    assert!(matches!(
        err,
        DirectoryError::InvalidPhaseTransition {
            phase: KeyRefreshPhase::KeyDistribution,
            ..
        }
    ));

    // Same value again is accepted without change.
    assert_eq!(
        dir.distribute_net_key(3, key(4)).unwrap().phase(),
        KeyRefreshPhase::KeyDistribution
    );
    assert_eq!(
        dir.distribute_net_key(0, key(4)).unwrap_err(),
        DirectoryError::DuplicateKeyMaterial(KeyKind::Network)
    );
}

#[test]
fn test_key_refresh_tracks_node_confirmation() {
    let (mut dir, _, own) = setup_with_provisioner();
    dir.add_app_key(0, 0, key(8)).unwrap();
    let lamp = Uuid::new_v4();
    dir.add_node(
        ProvisionedNode::new(lamp, "lamp", 0x0010, 2)
            .with_net_key(0)
            .with_app_key(0),
    )
    .unwrap();

    assert!(matches!(
        dir.distribute_app_key(0, key(9)),
        Err(DirectoryError::InvalidPhaseTransition {
            phase: KeyRefreshPhase::Normal,
            ..
        })
    ));

    dir.distribute_net_key(0, key(2)).unwrap();
    assert_eq!(dir.nodes_pending_key_update(KeyKind::Network, 0), vec![lamp]);
    assert_eq!(
        dir.node(own).unwrap().is_key_updated(KeyKind::Network, 0),
        Some(true)
    );

    let app = dir.distribute_app_key(0, key(9)).unwrap();
    assert_eq!(app.old_key(), Some(&key(8)));
    assert_eq!(
        dir.nodes_pending_key_update(KeyKind::Application, 0),
        vec![lamp]
    );

    dir.confirm_node_key_updated(lamp, KeyKind::Network, 0).unwrap();
    dir.confirm_node_key_updated(lamp, KeyKind::Application, 0).unwrap();
    assert!(dir.nodes_pending_key_update(KeyKind::Network, 0).is_empty());

    assert_eq!(
        dir.switch_to_new_key(0).unwrap().phase(),
        KeyRefreshPhase::UsingNewKeys
    );
    assert!(dir.distribute_app_key(0, key(10)).is_err());

    let net = dir.revoke_old_key(0).unwrap();
    assert_eq!(net.phase(), KeyRefreshPhase::Normal);
    assert!(net.old_key().is_none());
    assert!(dir.app_key(0).unwrap().old_key().is_none());
}

#[test]
fn test_switch_before_distribute_is_rejected() {
    let (mut dir, _) = setup();
    dir.add_network_key(0, key(1)).unwrap();
    assert!(matches!(
        dir.switch_to_new_key(0),
        Err(DirectoryError::InvalidPhaseTransition { .. })
    ));
    assert!(matches!(
        dir.revoke_old_key(0),
        Err(DirectoryError::InvalidPhaseTransition { .. })
    ));
}

#[test]
fn test_first_fit_address_between_nodes() {
    let (mut dir, _) = setup();
    let p = dir
        .create_provisioner(
            "narrow",
            AllocatedUnicastRange::new(0x0010, 0x0020).unwrap(),
            AllocatedGroupRange::full(),
            AllocatedSceneRange::full(),
        )
        .unwrap();
    dir.add_provisioner(p).unwrap();
    dir.add_node(ProvisionedNode::new(Uuid::new_v4(), "a", 0x0010, 2))
        .unwrap();
    dir.add_node(ProvisionedNode::new(Uuid::new_v4(), "b", 0x0015, 1))
        .unwrap();

    assert_eq!(dir.next_available_unicast_address(2, None), Ok(Some(0x0012)));
    assert_eq!(dir.next_available_unicast_address(4, None), Ok(Some(0x0016)));
    assert_eq!(dir.next_available_unicast_address(12, None), Ok(None));
}

#[test]
fn test_overlapping_provisioner_rejected() {
    let (mut dir, _) = setup();
    let a = dir
        .create_provisioner(
            "a",
            AllocatedUnicastRange::new(1, 100).unwrap(),
            AllocatedGroupRange::new(0xC000, 0xC0FF).unwrap(),
            AllocatedSceneRange::new(1, 0xFF).unwrap(),
        )
        .unwrap();
    let a_uuid = dir.add_provisioner(a).unwrap().uuid();
    let b = dir
        .create_provisioner(
            "b",
            AllocatedUnicastRange::new(50, 150).unwrap(),
            AllocatedGroupRange::new(0xC100, 0xC1FF).unwrap(),
            AllocatedSceneRange::new(0x100, 0x1FF).unwrap(),
        )
        .unwrap();

    assert_eq!(
        dir.add_provisioner(b).unwrap_err(),
        DirectoryError::RangeOverlap(a_uuid)
    );
    assert_eq!(dir.provisioners().len(), 1);
    assert_eq!(
        dir.provisioner(a_uuid).unwrap().unicast_ranges().as_slice(),
        &[AllocatedUnicastRange::new(1, 100).unwrap()]
    );
}

#[test]
fn test_provisioner_node_gets_all_keys() {
    let (mut dir, _) = setup();
    dir.add_network_key(0, key(1)).unwrap();
    dir.add_network_key(1, key(2)).unwrap();
    dir.add_app_key(0, 1, key(3)).unwrap();
    let mut p = dir.create_default_provisioner().unwrap();
    p.assign_address(Some(0x0100)).unwrap();
    let uuid = dir.add_provisioner(p).unwrap().uuid();

    let node = dir.node(uuid).unwrap();
    assert_eq!(node.unicast_address, 0x0100);
    assert!(node.has_key(KeyKind::Network, 0));
    assert!(node.has_key(KeyKind::Network, 1));
    assert!(node.has_key(KeyKind::Application, 0));
    assert!(dir.selected_provisioner().unwrap().is_last_selected());
}

#[test]
fn test_deleted_addresses_reusable_two_iv_indices_later() {
    let (mut dir, clock, _) = setup_with_provisioner();
    let lamp = Uuid::new_v4();
    dir.add_node(ProvisionedNode::new(lamp, "lamp", 0x0010, 2).with_net_key(0))
        .unwrap();

    let deleted = dir.delete_node(lamp).unwrap();
    assert!(deleted.excluded);
    assert_eq!(
        dir.network_exclusions().addresses_at(0).map(|s| s.len()),
        Some(2)
    );
    let again = || ProvisionedNode::new(Uuid::new_v4(), "again", 0x0010, 1);
    assert_eq!(
        dir.add_node(again()).unwrap_err(),
        DirectoryError::AddressInUse(0x0010)
    );

    for _ in 0..3 {
        dir.next_local_sequence_number().unwrap();
    }

    // 0 -> 1 (update active)
    clock.advance(Duration::hours(96));
    let outcome = dir.process_beacon(&signed_beacon(&key(1), 1, true));
    let BeaconOutcome::Applied(applied) = outcome else {
        panic!("expected the beacon to apply, got {outcome:?}");
    };
    assert!(!applied.sequence_reset);
    assert_eq!(applied.exclusions_purged, 0);
    assert_eq!(dir.local_sequence_number(), Some(3));

    // 1 (update active) -> 1 (normal): transmit index increases.
    clock.advance(Duration::hours(96));
    let outcome = dir.process_beacon(&signed_beacon(&key(1), 1, false));
    let BeaconOutcome::Applied(applied) = outcome else {
        panic!("expected the beacon to apply, got {outcome:?}");
    };
    assert!(applied.sequence_reset);
    assert_eq!(applied.exclusions_purged, 0);
    assert_eq!(dir.local_sequence_number(), Some(0));
    assert!(dir.add_node(again()).is_err());

    // 1 -> 2: exclusions made at 0 expire.
    clock.advance(Duration::hours(96));
    let outcome = dir.process_beacon(&signed_beacon(&key(1), 2, true));
    let BeaconOutcome::Applied(applied) = outcome else {
        panic!("expected the beacon to apply, got {outcome:?}");
    };
    assert_eq!(applied.exclusions_purged, 1);
    assert!(dir.network_exclusions().is_empty());
    dir.add_node(again()).unwrap();
}

#[test]
fn test_early_beacon_rejected_then_accepted() {
    let (mut dir, clock) = setup();
    dir.add_network_key(0, key(1)).unwrap();
    dir.set_iv_index(5, false);

    clock.advance(Duration::hours(95));
    let outcome = dir.process_beacon(&signed_beacon(&key(1), 6, true));
    assert!(matches!(
        outcome.rejection(),
        Some(BeaconRejection::DwellTime { .. })
    ));
    assert_eq!(dir.iv_index().index, 5);

    clock.advance(Duration::hours(2));
    assert!(dir.process_beacon(&signed_beacon(&key(1), 6, true)).is_applied());
    assert_eq!(dir.iv_index().index, 6);
    assert!(dir.iv_index().update_active);
}

#[test]
fn test_regular_update_accepted_after_recovery() {
    let (mut dir, clock) = setup();
    dir.add_network_key(0, key(1)).unwrap();

    clock.advance(Duration::hours(960));
    assert!(dir.process_beacon(&signed_beacon(&key(1), 5, false)).is_applied());
    assert!(dir.iv_index().recovery);

    clock.advance(Duration::hours(100));
    assert!(dir.process_beacon(&signed_beacon(&key(1), 6, true)).is_applied());
    assert_eq!(dir.iv_index().index, 6);
    assert!(!dir.iv_index().recovery);
}

#[test]
fn test_secondary_subnet_beacon_discarded() {
    let (mut dir, clock) = setup();
    dir.add_network_key(0, key(1)).unwrap();
    dir.add_network_key(1, key(2)).unwrap();
    clock.advance(Duration::hours(200));

    let outcome = dir.process_beacon(&signed_beacon(&key(2), 1, true));
    assert_eq!(
        outcome.rejection(),
        Some(BeaconRejection::SecondarySubnet { net_key_index: 1 })
    );
    assert_eq!(dir.iv_index().index, 0);

    let mut forged = signed_beacon(&key(1), 1, true);
    forged.auth_value[7] ^= 1;
    assert_eq!(
        dir.process_beacon(&forged).rejection(),
        Some(BeaconRejection::AuthenticationFailed)
    );
    assert_eq!(
        dir.process_beacon(&signed_beacon(&key(7), 1, true)).rejection(),
        Some(BeaconRejection::UnknownNetwork)
    );
}

#[test]
fn test_beacon_pdu_decoding_errors_surface() {
    let (mut dir, _) = setup();
    assert!(dir.process_beacon_pdu(&[0x01, 0x00]).is_err());
    assert!(dir.process_beacon_pdu(&[0x00; 22]).is_err());
}

#[test]
fn test_replay_check() {
    let (mut dir, _, _) = setup_with_provisioner();
    assert!(dir.check_replay(0x0010, 0, 5));
    assert!(!dir.check_replay(0x0010, 0, 5));
    assert!(!dir.check_replay(0x0010, 0, 4));
    assert!(dir.check_replay(0x0010, 1, 0));
}

#[test]
fn test_deleting_provisioner_node_removes_provisioner() {
    let (mut dir, _, own) = setup_with_provisioner();
    let other = dir
        .create_provisioner(
            "other",
            AllocatedUnicastRange::new(0x7000, 0x7FFF).unwrap(),
            AllocatedGroupRange::new(0xF000, 0xF0FF).unwrap(),
            AllocatedSceneRange::new(0xF000, 0xF0FF).unwrap(),
        );
    // The default provisioner owns everything, so nothing else fits.
    assert!(matches!(
        dir.add_provisioner(other.unwrap()),
        Err(DirectoryError::RangeOverlap(_))
    ));

    dir.delete_node(own).unwrap();
    assert!(dir.provisioners().is_empty());
    assert!(dir.selected_provisioner().is_none());
    assert_eq!(
        dir.next_local_sequence_number(),
        Err(DirectoryError::NoSelectedProvisioner)
    );
}

#[test]
fn test_each_change_notified_once() {
    let (mut dir, _) = setup();
    let recorder = Arc::new(Recorder::default());
    dir.set_observer(recorder.clone());

    dir.add_network_key(0, key(1)).unwrap();
    assert_eq!(recorder.take(), vec![MeshChange::NetworkKeyAdded { index: 0 }]);

    assert!(dir.add_network_key(0, key(2)).is_err());
    assert!(recorder.take().is_empty());

    let mut p = dir.create_default_provisioner().unwrap();
    p.assign_address(Some(0x0001)).unwrap();
    let own = dir.add_provisioner(p).unwrap().uuid();
    assert_eq!(recorder.take(), vec![MeshChange::ProvisionerAdded { uuid: own }]);

    let lamp = Uuid::new_v4();
    dir.add_node(ProvisionedNode::new(lamp, "lamp", 0x0020, 3))
        .unwrap();
    assert_eq!(
        recorder.take(),
        vec![MeshChange::NodeAdded {
            uuid: lamp,
            address: 0x0020
        }]
    );

    dir.delete_node(lamp).unwrap();
    assert_eq!(
        recorder.take(),
        vec![MeshChange::NodeDeleted {
            uuid: lamp,
            address: 0x0020,
            provisioner_removed: false
        }]
    );

    dir.distribute_net_key(0, key(2)).unwrap();
    dir.distribute_net_key(0, key(2)).unwrap();
    assert_eq!(recorder.take(), vec![MeshChange::NetworkKeyUpdated { index: 0 }]);

    dir.set_mesh_name("Home").unwrap();
    dir.set_mesh_name("Home").unwrap();
    assert!(dir.set_mesh_name("  ").is_err());
    assert_eq!(
        recorder.take(),
        vec![MeshChange::MeshRenamed {
            name: "Home".into()
        }]
    );

    dir.check_replay(0x0005, 0, 1);
    dir.next_local_sequence_number().unwrap();
    assert!(recorder.take().is_empty());
}

#[test]
fn test_snapshot_round_trip_through_file() {
    let (mut dir, _, _) = setup_with_provisioner();
    dir.add_network_key(1, key(2)).unwrap();
    dir.add_app_key(0, 1, key(3)).unwrap();
    dir.distribute_net_key(1, key(4)).unwrap();
    let lamp = Uuid::new_v4();
    dir.add_node(ProvisionedNode::new(lamp, "lamp", 0x0030, 2).with_net_key(1))
        .unwrap();
    dir.add_node(ProvisionedNode::new(Uuid::new_v4(), "switch", 0x0040, 1))
        .unwrap();
    dir.delete_node(lamp).unwrap();

    let snapshot = dir.snapshot();
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("mesh.json");
    snapshot.save(&path).unwrap();

    let loaded = MeshSnapshot::load(&path).unwrap();
    assert_eq!(loaded, snapshot);

    let restored = MeshDirectory::from_snapshot(
        loaded,
        DirectoryConfig::default(),
        Arc::new(DigestCrypto),
        Arc::new(ManualClock::new(t0())),
    )
    .unwrap();
    assert_eq!(restored.snapshot(), snapshot);
    assert_eq!(
        restored.network_key(1).unwrap().phase(),
        KeyRefreshPhase::KeyDistribution
    );
    assert_eq!(
        restored.network_key(1).unwrap().network_id(),
        dir.network_key(1).unwrap().network_id()
    );
    assert!(restored.network_exclusions().is_blocked(0x0031, 0));
}

#[test]
fn test_snapshot_with_overlapping_provisioners_refused() {
    let (dir, _, _) = setup_with_provisioner();
    let mut snapshot = dir.snapshot();
    let copy = Provisioner::new(
        Uuid::new_v4(),
        "copy",
        AllocatedUnicastRange::new(0x0100, 0x0200).unwrap(),
        AllocatedGroupRange::new(0xC000, 0xC001).unwrap(),
        AllocatedSceneRange::new(1, 2).unwrap(),
        5,
    )
    .unwrap();
    snapshot.provisioners.push(copy);

    let err = MeshDirectory::from_snapshot(
        snapshot,
        DirectoryConfig::default(),
        Arc::new(DigestCrypto),
        Arc::new(ManualClock::new(t0())),
    )
    .unwrap_err();
    assert!(matches!(err, DirectoryError::RangeOverlap(_)));

    let mut snapshot = dir.snapshot();
    snapshot.schema = "0.1".into();
    assert!(matches!(
        MeshDirectory::from_snapshot(
            snapshot,
            DirectoryConfig::default(),
            Arc::new(DigestCrypto),
            Arc::new(ManualClock::new(t0())),
        ),
        Err(DirectoryError::IncompatibleSnapshot(_))
    ));
}

fn restore(snapshot: MeshSnapshot) -> Result<MeshDirectory, DirectoryError> {
    MeshDirectory::from_snapshot(
        snapshot,
        DirectoryConfig::default(),
        Arc::new(DigestCrypto),
        Arc::new(ManualClock::new(t0())),
    )
}

fn assert_incompatible(snapshot: MeshSnapshot) {
    assert!(matches!(
        restore(snapshot),
        Err(DirectoryError::IncompatibleSnapshot(_))
    ));
}

#[test]
fn test_snapshot_with_invalid_nodes_refused() {
    let (mut dir, _, _) = setup_with_provisioner();
    dir.add_app_key(0, 0, key(3)).unwrap();
    dir.add_node(ProvisionedNode::new(Uuid::new_v4(), "lamp", 0x0030, 2))
        .unwrap();
    let base = dir.snapshot();
    assert!(restore(base.clone()).is_ok());

    let mut snapshot = base.clone();
    let twin = snapshot.nodes[1].clone();
    snapshot.nodes.push(twin);
    assert_incompatible(snapshot);

    let mut snapshot = base.clone();
    snapshot
        .nodes
        .push(ProvisionedNode::new(Uuid::new_v4(), "overlap", 0x0031, 1));
    assert_incompatible(snapshot);

    let mut snapshot = base.clone();
    snapshot
        .nodes
        .push(ProvisionedNode::new(Uuid::new_v4(), "empty", 0x0040, 0));
    assert_incompatible(snapshot);

    let mut snapshot = base.clone();
    snapshot
        .nodes
        .push(ProvisionedNode::new(Uuid::new_v4(), "net", 0x0040, 1).with_net_key(9));
    assert_incompatible(snapshot);

    let mut snapshot = base.clone();
    snapshot
        .nodes
        .push(ProvisionedNode::new(Uuid::new_v4(), "app", 0x0040, 1).with_app_key(9));
    assert_incompatible(snapshot);

    let mut snapshot = base;
    snapshot.app_keys[0].old_key = Some(key(4));
    assert_incompatible(snapshot);
}
