//! First-fit unicast address search.

use std::ops::RangeInclusive;

use mesh_core::range::Unicast;
use mesh_core::RangeSet;

/// Lowest address `a` such that `[a, a + element_count - 1]` lies inside one
/// of `ranges` and touches none of `occupied`.
///
/// `occupied` may be unsorted and overlapping.
pub fn next_available_unicast_address(
    ranges: &RangeSet<Unicast>,
    occupied: &[RangeInclusive<u16>],
    element_count: u8,
) -> Option<u16> {
    if element_count == 0 {
        return None;
    }
    let span = u32::from(element_count) - 1;

    let mut blocks: Vec<(u32, u32)> = occupied
        .iter()
        .filter(|r| r.start() <= r.end())
        .map(|r| (u32::from(*r.start()), u32::from(*r.end())))
        .collect();
    blocks.sort_unstable();

    for range in ranges.iter() {
        let high = u32::from(range.high());
        let mut candidate = u32::from(range.low());

        while candidate + span <= high {
            let last = candidate + span;
            match blocks
                .iter()
                .find(|(start, end)| *start <= last && candidate <= *end)
            {
                Some(&(_, end)) => candidate = end + 1,
                None => return u16::try_from(candidate).ok(),
            }
        }
    }
    None
}
