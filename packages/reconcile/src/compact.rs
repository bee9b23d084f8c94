//! Compaction of missing hours into re-fetchable ranges.

use amp_sync_reconcile_models::{HOURS_PER_DAY, HourSlot, MissingRange};

/// A range never spans this many hours or more (start to end).
pub const MAX_RANGE_HOURS: i64 = 7 * HOURS_PER_DAY;

/// Merges ascending missing hours into inclusive ranges.
///
/// A slot extends the current range only if it is exactly one hour after the
/// range's end **and** it lies less than [`MAX_RANGE_HOURS`] after the
/// range's start. Otherwise it opens a new range. The span check runs on
/// the candidate before the range is extended.
#[must_use]
pub fn compact(missing: &[HourSlot]) -> Vec<MissingRange> {
    let mut ranges = Vec::new();
    let Some((&first, rest)) = missing.split_first() else {
        return ranges;
    };

    let mut current = MissingRange::single(first);
    for &slot in rest {
        let contiguous = current.end.next() == Some(slot);
        if contiguous && slot.hours_since(&current.start) < MAX_RANGE_HOURS {
            current.end = slot;
        } else {
            ranges.push(current);
            current = MissingRange::single(slot);
        }
    }
    ranges.push(current);

    ranges
}
