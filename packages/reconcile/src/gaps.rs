//! Observed hour collection and missing hour detection.

use std::collections::BTreeSet;

use amp_sync_reconcile_models::{HourSlot, RequiredWindow};

use crate::filename;

/// Parses every key and keeps the slots whose date falls inside `window`.
///
/// Keys that don't parse are skipped. Parseable keys outside the window are
/// ignored as well.
#[must_use]
pub fn observed_set<S: AsRef<str>>(keys: &[S], window: &RequiredWindow) -> BTreeSet<HourSlot> {
    let mut observed = BTreeSet::new();
    for key in keys {
        let key = key.as_ref();
        match filename::parse_key(key) {
            Some(slot) if window.contains_date(slot.date()) => {
                observed.insert(slot);
            }
            Some(slot) => log::trace!("{key}: {slot} outside {window}, ignoring"),
            None => log::trace!("{key}: no hour slot in key, skipping"),
        }
    }
    observed
}

/// Returns the slots of `required` that are absent from `observed`.
///
/// `required` is expected in ascending order; the result keeps that order.
#[must_use]
pub fn find_missing(required: &[HourSlot], observed: &BTreeSet<HourSlot>) -> Vec<HourSlot> {
    required
        .iter()
        .filter(|slot| !observed.contains(slot))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::timeline;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn keys_for_day(day: &str, hours: impl Iterator<Item = u32>) -> Vec<String> {
        hours
            .map(|h| format!("python-import/187_{day}_{h}#0.json"))
            .collect()
    }

    #[test]
    fn superset_leaves_nothing_missing() {
        let window = RequiredWindow::new(date(2024, 11, 1), date(2024, 11, 2)).unwrap();
        let mut keys = keys_for_day("2024-10-31", 0..24);
        keys.extend(keys_for_day("2024-11-01", 0..24));
        keys.extend(keys_for_day("2024-11-02", 0..24));
        keys.push("python-import/manifest.json".to_string());

        let observed = observed_set(&keys, &window);
        let missing = find_missing(&timeline::required_hours(&window), &observed);
        assert!(missing.is_empty());
    }

    #[test]
    fn keys_outside_window_are_ignored() {
        let window = RequiredWindow::single_day(date(2024, 11, 1));
        let keys = keys_for_day("2024-11-02", 0..24);
        assert!(observed_set(&keys, &window).is_empty());
    }

    #[test]
    fn keeps_ascending_order() {
        let window = RequiredWindow::single_day(date(2024, 11, 1));
        let keys = keys_for_day("2024-11-01", (0..24).filter(|h| h % 5 != 0));
        let missing = find_missing(
            &timeline::required_hours(&window),
            &observed_set(&keys, &window),
        );
        let hours: Vec<u32> = missing.iter().map(HourSlot::hour).collect();
        assert_eq!(hours, vec![0, 5, 10, 15, 20]);
    }

    #[test]
    fn duplicate_parts_count_once() {
        let window = RequiredWindow::single_day(date(2024, 11, 1));
        let keys = [
            "p/187_2024-11-01_4#0.json",
            "p/187_2024-11-01_4#1.json",
        ];
        assert_eq!(observed_set(&keys, &window).len(), 1);
    }
}
