#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Reconciliation of hourly export coverage against object-store keys.
//!
//! Given a snapshot of keys listed from the bucket and a [`RequiredWindow`],
//! works out which hours have no file and compacts them into
//! [`MissingRange`]s that can be passed straight back to the export API:
//!
//! 1. [`filename::parse_key`] turns each key into an [`HourSlot`] (or skips it).
//! 2. [`timeline::required_hours`] enumerates every hour of the window.
//! 3. [`gaps::find_missing`] filters out hours that were observed.
//! 4. [`compact::compact`] merges the rest into ranges shorter than a week.
//!
//! Everything here is synchronous and free of I/O. Running it twice on the
//! same listing yields the same ranges.

pub mod compact;
pub mod filename;
pub mod gaps;
pub mod timeline;

pub use amp_sync_reconcile_models::{HourSlot, MissingRange, ReconcileError, RequiredWindow};

use chrono::NaiveDate;

/// Outcome of reconciling one listing against one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Window that was checked. `None` when no hour was required.
    pub window: Option<RequiredWindow>,
    /// Number of hour slots the window requires.
    pub required_hours: usize,
    /// Number of distinct in-window hour slots found in the listing.
    pub observed_hours: usize,
    /// Missing hour slots, ascending.
    pub missing: Vec<HourSlot>,
    /// Missing hours compacted into re-fetchable ranges.
    pub ranges: Vec<MissingRange>,
}

impl Reconciliation {
    /// Result for a listing with no required window.
    #[must_use]
    pub const fn nothing_required() -> Self {
        Self {
            window: None,
            required_hours: 0,
            observed_hours: 0,
            missing: Vec::new(),
            ranges: Vec::new(),
        }
    }

    /// Whether every required hour is present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Compares `keys` against `window` and reports the missing hours.
#[must_use]
pub fn reconcile<S: AsRef<str>>(keys: &[S], window: RequiredWindow) -> Reconciliation {
    let required = timeline::required_hours(&window);
    let observed = gaps::observed_set(keys, &window);
    let missing = gaps::find_missing(&required, &observed);
    let ranges = compact::compact(&missing);

    log::debug!(
        "reconciled {window}: {} keys, {}/{} hours present, {} missing in {} range(s)",
        keys.len(),
        observed.len(),
        required.len(),
        missing.len(),
        ranges.len()
    );

    Reconciliation {
        window: Some(window),
        required_hours: required.len(),
        observed_hours: observed.len(),
        missing,
        ranges,
    }
}

/// Shorthand for [`reconcile`] when only the ranges are needed.
#[must_use]
pub fn missing_ranges<S: AsRef<str>>(keys: &[S], window: RequiredWindow) -> Vec<MissingRange> {
    reconcile(keys, window).ranges
}

/// Resolves the window from `start` / `end` / `today` (see
/// [`timeline::resolve_window`]) and reconciles `keys` against it.
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidRange`] if the bounds are inverted.
pub fn reconcile_listing<S: AsRef<str>>(
    keys: &[S],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<Reconciliation, ReconcileError> {
    let window = timeline::resolve_window(keys, start, end, today)?;
    Ok(window.map_or_else(Reconciliation::nothing_required, |window| {
        reconcile(keys, window)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn empty_bucket_needs_the_whole_day() {
        let keys: [&str; 0] = [];
        let ranges = missing_ranges(&keys, RequiredWindow::single_day(date(2024, 11, 1)));
        assert_eq!(ranges.len(), 1);
        assert_eq!(
            ranges[0].api_params(),
            ("20241101T00".to_string(), "20241101T23".to_string())
        );
    }

    #[test]
    fn single_missing_hour() {
        let keys: Vec<String> = (0..24)
            .filter(|h| *h != 5)
            .map(|h| format!("python-import/187_2024-11-01_{h}#0.json"))
            .collect();
        let result = reconcile(&keys, RequiredWindow::single_day(date(2024, 11, 1)));

        assert_eq!(result.required_hours, 24);
        assert_eq!(result.observed_hours, 23);
        assert_eq!(
            result.missing,
            vec![HourSlot::new(date(2024, 11, 1), 5).unwrap()]
        );
        assert_eq!(
            result.ranges[0].api_params(),
            ("20241101T05".to_string(), "20241101T05".to_string())
        );
    }

    #[test]
    fn full_coverage_is_complete() {
        let keys: Vec<String> = (0..48)
            .map(|h| {
                let day = if h < 24 { "2024-11-01" } else { "2024-11-02" };
                format!("events_{day}_{}.json.gz", h % 24)
            })
            .collect();
        let window = RequiredWindow::new(date(2024, 11, 1), date(2024, 11, 2)).unwrap();
        let result = reconcile(&keys, window);
        assert!(result.is_complete());
        assert!(result.ranges.is_empty());
    }

    #[test]
    fn reconcile_is_idempotent() {
        let keys = [
            "p/1_2024-11-02_3#0.json",
            "p/1_2024-11-04_0#0.json",
            "p/readme.txt",
        ];
        let window = RequiredWindow::new(date(2024, 11, 1), date(2024, 11, 5)).unwrap();
        assert_eq!(reconcile(&keys, window), reconcile(&keys, window));
    }

    #[test]
    fn listing_newer_than_yesterday_requires_nothing() {
        let keys = ["p/1_2024-11-10_3#0.json"];
        let result = reconcile_listing(&keys, None, None, date(2024, 11, 10)).unwrap();
        assert_eq!(result, Reconciliation::nothing_required());
        assert!(result.is_complete());
        assert!(result.ranges.is_empty());
    }

    #[test]
    fn listing_uses_earliest_key_as_start() {
        let keys = ["p/1_2024-11-08_0#0.json"];
        let result = reconcile_listing(&keys, None, None, date(2024, 11, 10)).unwrap();
        assert_eq!(
            result.window,
            Some(RequiredWindow::new(date(2024, 11, 8), date(2024, 11, 9)).unwrap())
        );
        assert_eq!(result.missing.len(), 47);
    }
}
