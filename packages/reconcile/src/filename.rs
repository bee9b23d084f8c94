//! Hour slot extraction from object-store keys.
//!
//! Export files are named `<prefix>_<YYYY-MM-DD>_<H>...`, e.g.
//! `123456_2024-11-03_7#0.json` or `events_2024-11-03_7.json.gz`. Only the
//! key's basename is inspected, split on `_` into positional fields. The
//! first field that is a `YYYY-MM-DD` date and is followed by a field
//! starting with digits decides the outcome; the digits are the hour.

use amp_sync_reconcile_models::HourSlot;
use chrono::NaiveDate;

/// Parses the hour slot encoded in `key`.
///
/// Returns `None` for keys that don't follow the export naming scheme
/// (manifests, metadata files, directory markers). Hours above `23` and
/// impossible dates are treated the same way.
#[must_use]
pub fn parse_key(key: &str) -> Option<HourSlot> {
    let name = basename(key);
    let fields: Vec<&str> = name.split('_').collect();

    let (date, hour) = fields.windows(2).find_map(|pair| {
        let date = parse_date_field(pair[0])?;
        let hour = leading_digits(pair[1])?;
        Some((date, hour))
    })?;

    HourSlot::new(date, hour.parse().ok()?)
}

/// Returns the date encoded in `key`, ignoring the hour field's range.
///
/// Used when only the calendar day matters (e.g. picking a default window
/// start).
#[must_use]
pub fn parse_key_date(key: &str) -> Option<NaiveDate> {
    parse_key(key).map(|slot| slot.date())
}

fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Parses a field that is exactly `YYYY-MM-DD`.
fn parse_date_field(field: &str) -> Option<NaiveDate> {
    let bytes = field.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let digits_ok = bytes
        .iter()
        .enumerate()
        .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !digits_ok {
        return None;
    }
    NaiveDate::parse_from_str(field, "%Y-%m-%d").ok()
}

/// The run of ASCII digits at the start of `field`, if any.
fn leading_digits(field: &str) -> Option<&str> {
    let end = field
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(field.len());
    (end > 0).then(|| &field[..end])
}
