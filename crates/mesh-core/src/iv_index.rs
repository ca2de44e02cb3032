//! IV Index value type.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The network-wide IV Index and its update state.
///
/// Instances are replaced, never mutated, when a beacon moves the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IvIndex {
    pub index: u32,
    pub update_active: bool,
    /// Set when the last accepted beacon jumped more than one step outside an update.
    #[serde(default)]
    pub recovery: bool,
    pub transition_date: DateTime<Utc>,
}

impl IvIndex {
    pub fn new(index: u32, update_active: bool, transition_date: DateTime<Utc>) -> Self {
        Self {
            index,
            update_active,
            recovery: false,
            transition_date,
        }
    }

    /// Index used for outgoing messages: one behind while an update is in progress.
    pub fn transmit_index(&self) -> u32 {
        if self.update_active {
            self.index.saturating_sub(1)
        } else {
            self.index
        }
    }

    /// Whole hours elapsed since the last transition, clamped at zero.
    pub fn hours_since_transition(&self, now: DateTime<Utc>) -> i64 {
        (now - self.transition_date).num_hours().max(0)
    }

    /// True if `(index, update_active)` differs from `other`.
    pub fn state_differs(&self, other: &IvIndex) -> bool {
        self.index != other.index || self.update_active != other.update_active
    }
}

impl fmt::Display for IvIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({})",
            self.index,
            if self.update_active { "update in progress" } else { "normal" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_transmit_index() {
        assert_eq!(IvIndex::new(5, false, epoch()).transmit_index(), 5);
        assert_eq!(IvIndex::new(5, true, epoch()).transmit_index(), 4);
        assert_eq!(IvIndex::new(0, true, epoch()).transmit_index(), 0);
    }

    #[test]
    fn test_hours_since_transition() {
        let iv = IvIndex::new(1, false, epoch());
        assert_eq!(iv.hours_since_transition(epoch() + Duration::minutes(95 * 60 + 59)), 95);
        assert_eq!(iv.hours_since_transition(epoch() - Duration::hours(3)), 0);
    }

    #[test]
    fn test_state_differs_ignores_recovery_and_date() {
        let a = IvIndex::new(3, true, epoch());
        let mut b = IvIndex::new(3, true, epoch() + Duration::hours(1));
        b.recovery = true;
        assert!(!a.state_differs(&b));
        assert!(a.state_differs(&IvIndex::new(3, false, epoch())));
    }
}
