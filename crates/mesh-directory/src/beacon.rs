//! Secure Network Beacon authentication and IV Index freshness rules.
//!
//! A beacon is first matched to a network key by network ID and verified
//! against that key's authentication value. Only then is its IV Index
//! compared with the current one. Rejections are ordinary outcomes, not
//! errors: a stale or foreign beacon is expected traffic.

use chrono::{DateTime, Utc};
use mesh_common::helpers::constant_time_eq;
use mesh_core::{
    IvIndex, SecureNetworkBeacon, IV_RECOVERY_LIMIT, IV_RECOVERY_MIN_HOURS, IV_STATE_MIN_HOURS,
};
use mesh_crypto::{MeshCrypto, NetworkKey};
use serde::Serialize;

/// Relaxations of the IV Update procedure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IvUpdatePolicy {
    /// Removes one state's worth of the 96-hour dwell requirement.
    pub test_mode: bool,
    /// Accepts forward jumps of more than 42.
    pub allow_recovery_over_42: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BeaconRejection {
    /// No network key derives the beacon's network ID.
    UnknownNetwork,
    /// A key matched the network ID but the authentication value did not verify.
    AuthenticationFailed,
    /// Secondary subnet beacon while a primary key exists.
    SecondarySubnet { net_key_index: u16 },
    /// Lower IV Index, or no state change at the same index.
    NotNewer,
    /// More than 42 ahead without the recovery override.
    JumpTooLarge,
    /// The current state has not lasted long enough.
    DwellTime { elapsed_hours: i64, required_hours: i64 },
    /// Another recovery within 192 hours of the last.
    RecoveryLimit { elapsed_hours: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BeaconApplied {
    pub net_key_index: u16,
    pub previous: IvIndex,
    pub current: IvIndex,
    pub sequence_reset: bool,
    pub exclusions_purged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BeaconOutcome {
    Applied(BeaconApplied),
    Rejected(BeaconRejection),
}

impl BeaconOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn rejection(&self) -> Option<BeaconRejection> {
        match self {
            Self::Rejected(reason) => Some(*reason),
            Self::Applied(_) => None,
        }
    }
}

/// Finds the network key that authenticates `beacon`.
///
/// Every live value of every key is tried, so beacons sent with either the
/// old or new key during a refresh are accepted.
pub fn authenticate<'a>(
    beacon: &SecureNetworkBeacon,
    net_keys: impl IntoIterator<Item = &'a NetworkKey>,
    crypto: &dyn MeshCrypto,
) -> Result<&'a NetworkKey, BeaconRejection> {
    let payload = beacon.authenticated_payload();
    let mut id_matched = false;

    for net_key in net_keys {
        for (key, derived) in net_key.live_materials() {
            if derived.network_id != beacon.network_id {
                continue;
            }
            id_matched = true;
            let expected = crypto.beacon_auth_value(key, &payload);
            if constant_time_eq(&expected, &beacon.auth_value) {
                return Ok(net_key);
            }
        }
    }

    Err(if id_matched {
        BeaconRejection::AuthenticationFailed
    } else {
        BeaconRejection::UnknownNetwork
    })
}

/// Decides whether a beacon's `(index, update_active)` may replace `current`.
pub fn can_overwrite(
    current: &IvIndex,
    beacon_index: u32,
    beacon_update_active: bool,
    now: DateTime<Utc>,
    policy: IvUpdatePolicy,
) -> Result<(), BeaconRejection> {
    let current_index = u64::from(current.index);
    let incoming = u64::from(beacon_index);

    if incoming > current_index {
        if !policy.allow_recovery_over_42 && incoming > current_index + u64::from(IV_RECOVERY_LIMIT) {
            return Err(BeaconRejection::JumpTooLarge);
        }
    } else if incoming < current_index || !(current.update_active && !beacon_update_active) {
        return Err(BeaconRejection::NotNewer);
    }

    let elapsed_hours = current.hours_since_transition(now);

    let state_diff = (incoming as i64 - current_index as i64) * 2 - 1
        + i64::from(current.update_active)
        + i64::from(!beacon_update_active)
        - i64::from(current.recovery || policy.test_mode);
    let required_hours = state_diff * IV_STATE_MIN_HOURS;
    if elapsed_hours < required_hours {
        return Err(BeaconRejection::DwellTime {
            elapsed_hours,
            required_hours,
        });
    }

    // Only a further recovery is limited; a regular update step is not.
    let is_recovery =
        incoming > current_index + 1 || (incoming == current_index + 1 && !beacon_update_active);
    if is_recovery && current.recovery && elapsed_hours < IV_RECOVERY_MIN_HOURS {
        return Err(BeaconRejection::RecoveryLimit { elapsed_hours });
    }

    Ok(())
}

/// The IV Index that replaces `current` once a beacon is accepted.
pub fn next_iv_index(current: &IvIndex, beacon: &SecureNetworkBeacon, now: DateTime<Utc>) -> IvIndex {
    let update_active = beacon.iv_update_active();
    let changed = beacon.iv_index != current.index || update_active != current.update_active;
    let transition_date = if changed { now } else { current.transition_date };

    let mut next = IvIndex::new(beacon.iv_index, update_active, transition_date);
    next.recovery = u64::from(beacon.iv_index) > u64::from(current.index) + 1 && !update_active;
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use mesh_core::BeaconFlags;
    use mesh_crypto::testing::DigestCrypto;
    use mesh_crypto::KeyMaterial;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn at(hours: i64) -> DateTime<Utc> {
        t0() + Duration::hours(hours)
    }

    fn normal(index: u32) -> IvIndex {
        IvIndex::new(index, false, t0())
    }

    fn updating(index: u32) -> IvIndex {
        IvIndex::new(index, true, t0())
    }

    const POLICY: IvUpdatePolicy = IvUpdatePolicy {
        test_mode: false,
        allow_recovery_over_42: false,
    };

    #[test]
    fn test_dwell_time_95_vs_97_hours() {
        assert_eq!(
            can_overwrite(&normal(5), 6, true, at(95), POLICY),
            Err(BeaconRejection::DwellTime {
                elapsed_hours: 95,
                required_hours: 96
            })
        );
        assert_eq!(can_overwrite(&normal(5), 6, true, at(97), POLICY), Ok(()));
    }

    #[test]
    fn test_completing_update_needs_96_hours() {
        assert!(can_overwrite(&updating(6), 6, false, at(95), POLICY).is_err());
        assert_eq!(can_overwrite(&updating(6), 6, false, at(96), POLICY), Ok(()));
    }

    #[test]
    fn test_same_state_is_not_newer() {
        assert_eq!(
            can_overwrite(&normal(6), 6, false, at(500), POLICY),
            Err(BeaconRejection::NotNewer)
        );
        assert_eq!(
            can_overwrite(&updating(6), 6, true, at(500), POLICY),
            Err(BeaconRejection::NotNewer)
        );
        assert_eq!(
            can_overwrite(&normal(6), 6, true, at(500), POLICY),
            Err(BeaconRejection::NotNewer)
        );
        assert_eq!(
            can_overwrite(&normal(6), 5, false, at(500), POLICY),
            Err(BeaconRejection::NotNewer)
        );
    }

    #[test]
    fn test_jump_limit() {
        // 42 ahead normal: state_diff = 84 - 1 + 0 + 1 = 84 states.
        assert_eq!(
            can_overwrite(&normal(0), 42, false, at(84 * 96), POLICY),
            Ok(())
        );
        assert_eq!(
            can_overwrite(&normal(0), 43, false, at(100_000), POLICY),
            Err(BeaconRejection::JumpTooLarge)
        );
        let relaxed = IvUpdatePolicy {
            allow_recovery_over_42: true,
            ..POLICY
        };
        assert_eq!(
            can_overwrite(&normal(0), 43, false, at(100_000), relaxed),
            Ok(())
        );
    }

    #[test]
    fn test_test_mode_removes_one_state() {
        let test_mode = IvUpdatePolicy {
            test_mode: true,
            ..POLICY
        };
        assert_eq!(can_overwrite(&normal(5), 6, true, at(0), test_mode), Ok(()));
        assert!(can_overwrite(&normal(5), 6, false, at(95), test_mode).is_err());
        assert_eq!(can_overwrite(&normal(5), 6, false, at(96), test_mode), Ok(()));
    }

    #[test]
    fn test_recovery_limit() {
        let mut recovered = normal(20);
        recovered.recovery = true;
        // 21 in normal operation skips the update state: another recovery.
        assert_eq!(
            can_overwrite(&recovered, 21, false, at(100), POLICY),
            Err(BeaconRejection::RecoveryLimit { elapsed_hours: 100 })
        );
        assert_eq!(can_overwrite(&recovered, 21, false, at(192), POLICY), Ok(()));
    }

    #[test]
    fn test_regular_update_after_recovery_not_limited() {
        let mut recovered = normal(5);
        recovered.recovery = true;
        assert_eq!(can_overwrite(&recovered, 6, true, at(100), POLICY), Ok(()));
    }

    #[test]
    fn test_next_iv_index() {
        let beacon = SecureNetworkBeacon {
            flags: BeaconFlags::empty(),
            network_id: [0; 8],
            iv_index: 9,
            auth_value: [0; 8],
        };
        let next = next_iv_index(&normal(5), &beacon, at(2000));
        assert_eq!(next.index, 9);
        assert!(!next.update_active);
        assert!(next.recovery);
        assert_eq!(next.transition_date, at(2000));

        let step = SecureNetworkBeacon {
            flags: BeaconFlags::IV_UPDATE,
            iv_index: 6,
            ..beacon
        };
        let next = next_iv_index(&normal(5), &step, at(100));
        assert!(next.update_active);
        assert!(!next.recovery);
        assert_eq!(next.transmit_index(), 5);
    }

    #[test]
    fn test_authenticate_old_and_new_key() {
        let crypto = DigestCrypto;
        let mut net_key = NetworkKey::new(0, KeyMaterial::new([1; 16]), &crypto, t0()).unwrap();
        net_key
            .distribute(KeyMaterial::new([2; 16]), &crypto, t0())
            .unwrap();

        for key in [KeyMaterial::new([1; 16]), KeyMaterial::new([2; 16])] {
            let mut beacon = SecureNetworkBeacon {
                flags: BeaconFlags::KEY_REFRESH,
                network_id: crypto.derive_network_id(&key),
                iv_index: 3,
                auth_value: [0; 8],
            };
            beacon.auth_value = crypto.beacon_auth_value(&key, &beacon.authenticated_payload());
            let matched = authenticate(&beacon, [&net_key], &crypto).unwrap();
            assert_eq!(matched.index(), 0);

            beacon.auth_value[0] ^= 0xFF;
            assert_eq!(
                authenticate(&beacon, [&net_key], &crypto).unwrap_err(),
                BeaconRejection::AuthenticationFailed
            );
        }

        let foreign = SecureNetworkBeacon {
            flags: BeaconFlags::empty(),
            network_id: crypto.derive_network_id(&KeyMaterial::new([9; 16])),
            iv_index: 3,
            auth_value: [0; 8],
        };
        assert_eq!(
            authenticate(&foreign, [&net_key], &crypto).unwrap_err(),
            BeaconRejection::UnknownNetwork
        );
    }
}
