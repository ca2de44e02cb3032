//! Allocated address and scene ranges.
//!
//! A provisioner owns closed intervals of three kinds: unicast addresses,
//! group addresses and scene numbers. Each kind has a fixed domain; a range is
//! only constructible when `LOWER_BOUND <= low <= high <= UPPER_BOUND`.
//!
//! The algebra is small:
//! - `overlaps` tests two closed intervals for intersection
//! - `subtract` returns the 0, 1 or 2 pieces of a range not covered by another
//! - `merge` coalesces overlapping and adjacent ranges into a sorted cover
//!
//! [`RangeSet`] keeps a list of one kind permanently merged.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::address::{
    END_GROUP_ADDRESS, END_SCENE_NUMBER, END_UNICAST_ADDRESS, START_GROUP_ADDRESS,
    START_SCENE_NUMBER, START_UNICAST_ADDRESS,
};

/// Domain limits for one kind of range.
pub trait RangeKind: Copy + fmt::Debug + Eq + Hash + Send + Sync + 'static {
    const LOWER_BOUND: u16;
    const UPPER_BOUND: u16;
    const NAME: &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Unicast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Group;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scene;

impl RangeKind for Unicast {
    const LOWER_BOUND: u16 = START_UNICAST_ADDRESS;
    const UPPER_BOUND: u16 = END_UNICAST_ADDRESS;
    const NAME: &'static str = "unicast";
}

impl RangeKind for Group {
    const LOWER_BOUND: u16 = START_GROUP_ADDRESS;
    const UPPER_BOUND: u16 = END_GROUP_ADDRESS;
    const NAME: &'static str = "group";
}

impl RangeKind for Scene {
    const LOWER_BOUND: u16 = START_SCENE_NUMBER;
    const UPPER_BOUND: u16 = END_SCENE_NUMBER;
    const NAME: &'static str = "scene";
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("inverted {kind} range: low 0x{low:04X} is above high 0x{high:04X}")]
    Inverted {
        kind: &'static str,
        low: u16,
        high: u16,
    },

    #[error("{kind} range 0x{low:04X}..0x{high:04X} is outside 0x{lower:04X}..0x{upper:04X}")]
    OutOfBounds {
        kind: &'static str,
        low: u16,
        high: u16,
        lower: u16,
        upper: u16,
    },
}

/// A closed interval `[low, high]` inside the domain of `K`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RangeRepr", into = "RangeRepr", bound = "")]
pub struct AllocatedRange<K: RangeKind> {
    low: u16,
    high: u16,
    kind: PhantomData<K>,
}

pub type AllocatedUnicastRange = AllocatedRange<Unicast>;
pub type AllocatedGroupRange = AllocatedRange<Group>;
pub type AllocatedSceneRange = AllocatedRange<Scene>;

#[derive(Serialize, Deserialize)]
struct RangeRepr {
    low: u16,
    high: u16,
}

impl<K: RangeKind> TryFrom<RangeRepr> for AllocatedRange<K> {
    type Error = RangeError;

    fn try_from(repr: RangeRepr) -> Result<Self, Self::Error> {
        Self::new(repr.low, repr.high)
    }
}

impl<K: RangeKind> From<AllocatedRange<K>> for RangeRepr {
    fn from(range: AllocatedRange<K>) -> Self {
        Self {
            low: range.low,
            high: range.high,
        }
    }
}

impl<K: RangeKind> AllocatedRange<K> {
    pub const LOWER_BOUND: u16 = K::LOWER_BOUND;
    pub const UPPER_BOUND: u16 = K::UPPER_BOUND;

    /// Creates a range, rejecting inverted or out-of-domain bounds.
    pub fn new(low: u16, high: u16) -> Result<Self, RangeError> {
        if low > high {
            return Err(RangeError::Inverted {
                kind: K::NAME,
                low,
                high,
            });
        }
        if low < K::LOWER_BOUND || high > K::UPPER_BOUND {
            return Err(RangeError::OutOfBounds {
                kind: K::NAME,
                low,
                high,
                lower: K::LOWER_BOUND,
                upper: K::UPPER_BOUND,
            });
        }
        Ok(Self::span(low, high))
    }

    /// The whole domain of this kind.
    pub fn full() -> Self {
        Self::span(K::LOWER_BOUND, K::UPPER_BOUND)
    }

    // Callers guarantee LOWER_BOUND <= low <= high <= UPPER_BOUND.
    fn span(low: u16, high: u16) -> Self {
        debug_assert!(K::LOWER_BOUND <= low && low <= high && high <= K::UPPER_BOUND);
        Self {
            low,
            high,
            kind: PhantomData,
        }
    }

    pub fn low(&self) -> u16 {
        self.low
    }

    pub fn high(&self) -> u16 {
        self.high
    }

    /// Number of values covered (always at least 1).
    pub fn len(&self) -> u32 {
        u32::from(self.high - self.low) + 1
    }

    pub fn contains(&self, value: u16) -> bool {
        self.low <= value && value <= self.high
    }

    /// True when the two closed intervals share at least one value.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.low <= other.high && other.low <= self.high
    }

    pub fn intersect(&self, other: &Self) -> Option<Self> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Self::span(self.low.max(other.low), self.high.min(other.high)))
    }

    /// Parts of `self` not covered by `other`.
    ///
    /// A left piece exists iff `other.low > self.low`, a right piece iff
    /// `other.high < self.high`. Disjoint inputs return `self` unchanged.
    pub fn subtract(&self, other: &Self) -> Vec<Self> {
        if !self.overlaps(other) {
            return vec![*self];
        }

        let mut pieces = Vec::with_capacity(2);
        if other.low > self.low {
            pieces.push(Self::span(self.low, other.low - 1));
        }
        if other.high < self.high {
            pieces.push(Self::span(other.high + 1, self.high));
        }
        pieces
    }
}

impl AllocatedRange<Scene> {
    pub fn first_scene(&self) -> u16 {
        self.low
    }

    pub fn last_scene(&self) -> u16 {
        self.high
    }
}

impl<K: RangeKind> fmt::Debug for AllocatedRange<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:04X}..0x{:04X})", K::NAME, self.low, self.high)
    }
}

impl<K: RangeKind> fmt::Display for AllocatedRange<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}..0x{:04X}", self.low, self.high)
    }
}

/// Coalesces overlapping and adjacent ranges into a minimal sorted cover.
///
/// Input order does not matter. The output never contains two ranges that
/// overlap or touch.
pub fn merge<K: RangeKind>(ranges: &[AllocatedRange<K>]) -> Vec<AllocatedRange<K>> {
    let mut sorted = ranges.to_vec();
    sorted.sort_by_key(|r| (r.low, r.high));

    let mut merged = Vec::with_capacity(sorted.len());
    let mut accumulator: Option<AllocatedRange<K>> = None;

    for range in sorted {
        accumulator = match accumulator {
            None => Some(range),
            Some(acc) if range.high <= acc.high => Some(acc),
            Some(acc) if u32::from(range.low) <= u32::from(acc.high) + 1 => {
                Some(AllocatedRange::span(acc.low, range.high))
            }
            Some(acc) => {
                merged.push(acc);
                Some(range)
            }
        };
    }

    if let Some(acc) = accumulator {
        merged.push(acc);
    }
    merged
}

/// Subtracts `other` from every range and merges what remains.
pub fn subtract_from_all<K: RangeKind>(
    ranges: &[AllocatedRange<K>],
    other: &AllocatedRange<K>,
) -> Vec<AllocatedRange<K>> {
    let pieces: Vec<_> = ranges.iter().flat_map(|r| r.subtract(other)).collect();
    merge(&pieces)
}

/// A merged, sorted set of ranges of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeSet<K: RangeKind> {
    ranges: Vec<AllocatedRange<K>>,
}

impl<K: RangeKind> Default for RangeSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: RangeKind> RangeSet<K> {
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    pub fn from_ranges(ranges: impl IntoIterator<Item = AllocatedRange<K>>) -> Self {
        let ranges: Vec<_> = ranges.into_iter().collect();
        Self {
            ranges: merge(&ranges),
        }
    }

    pub fn single(range: AllocatedRange<K>) -> Self {
        Self {
            ranges: vec![range],
        }
    }

    /// Adds a range, re-sorting and re-merging the set.
    pub fn insert(&mut self, range: AllocatedRange<K>) {
        self.ranges.push(range);
        self.ranges = merge(&self.ranges);
    }

    /// Removes every value covered by `range`. Returns true if anything changed.
    pub fn remove(&mut self, range: &AllocatedRange<K>) -> bool {
        let remaining = subtract_from_all(&self.ranges, range);
        let changed = remaining != self.ranges;
        self.ranges = remaining;
        changed
    }

    pub fn contains(&self, value: u16) -> bool {
        self.ranges.iter().any(|r| r.contains(value))
    }

    pub fn overlaps_range(&self, range: &AllocatedRange<K>) -> bool {
        self.ranges.iter().any(|r| r.overlaps(range))
    }

    /// Pairwise overlap check against another set of the same kind.
    pub fn overlaps(&self, other: &RangeSet<K>) -> bool {
        self.ranges
            .iter()
            .any(|r| other.ranges.iter().any(|o| r.overlaps(o)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &AllocatedRange<K>> {
        self.ranges.iter()
    }

    pub fn as_slice(&self) -> &[AllocatedRange<K>] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Total number of values covered by the set.
    pub fn size(&self) -> u32 {
        self.ranges.iter().map(AllocatedRange::len).sum()
    }
}

impl<K: RangeKind> Serialize for RangeSet<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.ranges.serialize(serializer)
    }
}

impl<'de, K: RangeKind> Deserialize<'de> for RangeSet<K> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ranges = Vec::<AllocatedRange<K>>::deserialize(deserializer)?;
        Ok(Self::from_ranges(ranges))
    }
}

/// A range of any kind, for callers that dispatch on the kind at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnyRange {
    Unicast(AllocatedUnicastRange),
    Group(AllocatedGroupRange),
    Scene(AllocatedSceneRange),
}

impl AnyRange {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Unicast(_) => Unicast::NAME,
            Self::Group(_) => Group::NAME,
            Self::Scene(_) => Scene::NAME,
        }
    }
}

impl fmt::Display for AnyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unicast(r) => write!(f, "unicast {r}"),
            Self::Group(r) => write!(f, "group {r}"),
            Self::Scene(r) => write!(f, "scene {r}"),
        }
    }
}

impl From<AllocatedUnicastRange> for AnyRange {
    fn from(range: AllocatedUnicastRange) -> Self {
        Self::Unicast(range)
    }
}

impl From<AllocatedGroupRange> for AnyRange {
    fn from(range: AllocatedGroupRange) -> Self {
        Self::Group(range)
    }
}

impl From<AllocatedSceneRange> for AnyRange {
    fn from(range: AllocatedSceneRange) -> Self {
        Self::Scene(range)
    }
}
