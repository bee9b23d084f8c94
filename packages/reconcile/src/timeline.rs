//! Required hour timeline and the default coverage window.

use amp_sync_reconcile_models::{HourSlot, ReconcileError, RequiredWindow};
use chrono::{NaiveDate, TimeDelta};

use crate::filename;

/// Days looked back from the default end date when no key parses.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// Builds the ascending, gap-free hour sequence for `start..=end`.
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidRange`] if `start > end`.
pub fn build(start: NaiveDate, end: NaiveDate) -> Result<Vec<HourSlot>, ReconcileError> {
    Ok(required_hours(&RequiredWindow::new(start, end)?))
}

/// Every hour slot from `window.start 00:00` through `window.end 23:00`.
#[must_use]
pub fn required_hours(window: &RequiredWindow) -> Vec<HourSlot> {
    let last = window.last_hour();
    std::iter::successors(Some(window.first_hour()), HourSlot::next)
        .take_while(|slot| *slot <= last)
        .collect()
}

/// Resolves the coverage window, filling in defaults for missing bounds.
///
/// * `end` defaults to the day before `today`.
/// * `start` defaults to the earliest date parsed from `keys`, or to
///   `end - 7 days` if none parse.
///
/// Returns `Ok(None)` when the defaulted start falls after `end`: every
/// stored key is newer than the window, so no hour is required.
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidRange`] if an explicit `start` is after
/// the (explicit or defaulted) `end`, or if a defaulted bound would fall
/// outside the representable calendar.
pub fn resolve_window<S: AsRef<str>>(
    keys: &[S],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<Option<RequiredWindow>, ReconcileError> {
    let end = match end {
        Some(end) => end,
        None => today.pred_opt().ok_or(ReconcileError::InvalidRange {
            start: today,
            end: today,
        })?,
    };

    let start = match start {
        Some(start) => start,
        None => {
            let earliest = keys
                .iter()
                .filter_map(|key| filename::parse_key_date(key.as_ref()))
                .min();
            match earliest {
                Some(earliest) if earliest > end => {
                    log::debug!(
                        "earliest observed date {earliest} is after {end}, nothing required"
                    );
                    return Ok(None);
                }
                Some(earliest) => earliest,
                None => end
                    .checked_sub_signed(TimeDelta::days(DEFAULT_LOOKBACK_DAYS))
                    .ok_or(ReconcileError::InvalidRange { start: end, end })?,
            }
        }
    };

    RequiredWindow::new(start, end).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn length_is_24_per_day() {
        let start = date(2024, 2, 25);
        for extra_days in [0_i64, 1, 4, 6, 30] {
            let end = start + TimeDelta::days(extra_days);
            let hours = build(start, end).unwrap();
            assert_eq!(hours.len() as i64, 24 * (extra_days + 1));
        }
    }

    #[test]
    fn covers_first_and_last_hour_in_order() {
        let hours = build(date(2024, 10, 31), date(2024, 11, 1)).unwrap();
        assert_eq!(hours[0], HourSlot::start_of_day(date(2024, 10, 31)));
        assert_eq!(hours[47], HourSlot::end_of_day(date(2024, 11, 1)));
        assert!(hours.windows(2).all(|w| w[0].next() == Some(w[1])));
    }

    #[test]
    fn inverted_range_fails() {
        assert!(matches!(
            build(date(2024, 11, 2), date(2024, 11, 1)),
            Err(ReconcileError::InvalidRange { .. })
        ));
    }

    #[test]
    fn default_window_without_keys_looks_back_a_week() {
        let keys: [&str; 0] = [];
        let window = resolve_window(&keys, None, None, date(2024, 11, 10))
            .unwrap()
            .unwrap();
        assert_eq!(window.end(), date(2024, 11, 9));
        assert_eq!(window.start(), date(2024, 11, 2));
    }

    #[test]
    fn default_start_is_earliest_parsed_key() {
        let keys = [
            "p/metadata.json",
            "p/1_2024-11-05_3#0.json",
            "p/1_2024-11-03_22#0.json",
        ];
        let window = resolve_window(&keys, None, None, date(2024, 11, 10))
            .unwrap()
            .unwrap();
        assert_eq!(window.start(), date(2024, 11, 3));
        assert_eq!(window.end(), date(2024, 11, 9));
    }

    #[test]
    fn keys_newer_than_default_end_require_nothing() {
        let keys = ["p/1_2024-11-10_3#0.json"];
        let window = resolve_window(&keys, None, None, date(2024, 11, 10)).unwrap();
        assert_eq!(window, None);
    }

    #[test]
    fn keys_newer_than_explicit_end_require_nothing() {
        let keys = ["p/1_2024-11-05_3#0.json"];
        let window =
            resolve_window(&keys, None, Some(date(2024, 11, 2)), date(2024, 11, 10)).unwrap();
        assert_eq!(window, None);
    }

    #[test]
    fn last_representable_day_builds_without_overflow() {
        let hours = build(NaiveDate::MAX, NaiveDate::MAX).unwrap();
        assert_eq!(hours.len(), 24);
        assert_eq!(hours[23], HourSlot::end_of_day(NaiveDate::MAX));
    }

    #[test]
    fn lookback_before_first_representable_day_is_invalid() {
        let keys: [&str; 0] = [];
        let result = resolve_window(&keys, None, Some(NaiveDate::MIN), date(2024, 11, 10));
        assert!(matches!(result, Err(ReconcileError::InvalidRange { .. })));

        let result = resolve_window(&keys, None, None, NaiveDate::MIN);
        assert!(matches!(result, Err(ReconcileError::InvalidRange { .. })));
    }

    #[test]
    fn explicit_bounds_win() {
        let keys = ["p/1_2024-01-01_0#0.json"];
        let window = resolve_window(
            &keys,
            Some(date(2024, 11, 1)),
            Some(date(2024, 11, 2)),
            date(2025, 1, 1),
        )
        .unwrap()
        .unwrap();
        assert_eq!(window.start(), date(2024, 11, 1));
        assert_eq!(window.end(), date(2024, 11, 2));
    }

    #[test]
    fn explicit_start_after_end_fails() {
        let keys: [&str; 0] = [];
        let result = resolve_window(&keys, Some(date(2024, 11, 12)), None, date(2024, 11, 10));
        assert!(matches!(result, Err(ReconcileError::InvalidRange { .. })));
    }
}
