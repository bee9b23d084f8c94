#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Value types shared by the reconciliation core and its callers.
//!
//! An [`HourSlot`] is one hour of export data (calendar date + hour of day).
//! A [`RequiredWindow`] is the closed range of whole days that must be
//! covered, and a [`MissingRange`] is a compacted run of missing hours ready
//! to be handed back to the export API as a `start`/`end` pair.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use serde::Serialize;

/// Number of hour slots in one calendar day.
pub const HOURS_PER_DAY: i64 = 24;

/// `strftime` format of the date part of an export API timestamp.
const API_DATE_FORMAT: &str = "%Y%m%d";

/// Errors raised by the reconciliation core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    /// The window's start date is after its end date.
    #[error("Invalid range: start date {start} is after end date {end}")]
    InvalidRange {
        /// Requested start date.
        start: NaiveDate,
        /// Requested end date.
        end: NaiveDate,
    },
}

/// One hour of export data.
///
/// Ordered by `(date, hour)`, which is also chronological order.
///
/// Serialize-only: the `hour < 24` invariant is enforced by the
/// constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct HourSlot {
    date: NaiveDate,
    hour: u32,
}

impl HourSlot {
    /// Creates a slot, returning `None` if `hour` is not in `0..=23`.
    #[must_use]
    pub const fn new(date: NaiveDate, hour: u32) -> Option<Self> {
        if hour < 24 {
            Some(Self { date, hour })
        } else {
            None
        }
    }

    /// The `00:00` slot of `date`.
    #[must_use]
    pub const fn start_of_day(date: NaiveDate) -> Self {
        Self { date, hour: 0 }
    }

    /// The `23:00` slot of `date`.
    #[must_use]
    pub const fn end_of_day(date: NaiveDate) -> Self {
        Self { date, hour: 23 }
    }

    /// Truncates a timestamp to the hour it falls in.
    #[must_use]
    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        Self {
            date: dt.date(),
            hour: dt.hour(),
        }
    }

    /// Calendar date of this slot.
    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        self.date
    }

    /// Hour of day, `0..=23`.
    #[must_use]
    pub const fn hour(&self) -> u32 {
        self.hour
    }

    /// Start of this slot as a naive timestamp.
    #[must_use]
    pub fn to_datetime(&self) -> NaiveDateTime {
        self.date.and_time(NaiveTime::MIN) + TimeDelta::hours(i64::from(self.hour))
    }

    /// The slot one hour later, rolling over into the next day after `23`.
    /// `None` past the last representable date.
    #[must_use]
    pub fn next(&self) -> Option<Self> {
        self.to_datetime()
            .checked_add_signed(TimeDelta::hours(1))
            .map(Self::from_datetime)
    }

    /// Whole hours elapsed from `earlier` to `self` (negative if `earlier`
    /// is actually later).
    #[must_use]
    pub fn hours_since(&self, earlier: &Self) -> i64 {
        (self.to_datetime() - earlier.to_datetime()).num_hours()
    }

    /// Formats the slot as an export API timestamp, e.g. `20241101T05`.
    #[must_use]
    pub fn api_timestamp(&self) -> String {
        format!("{}T{:02}", self.date.format(API_DATE_FORMAT), self.hour)
    }

    /// Parses an export API timestamp of the form `YYYYMMDDTHH`.
    ///
    /// Returns `None` for anything that is not exactly eight date digits,
    /// a `T`, and a two-digit hour in `00..=23`.
    #[must_use]
    pub fn from_api_timestamp(s: &str) -> Option<Self> {
        let (date_part, hour_part) = s.split_once('T')?;
        if date_part.len() != 8
            || hour_part.len() != 2
            || !date_part.bytes().all(|b| b.is_ascii_digit())
            || !hour_part.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        let date = NaiveDate::parse_from_str(date_part, API_DATE_FORMAT).ok()?;
        Self::new(date, hour_part.parse().ok()?)
    }
}

impl fmt::Display for HourSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:02}:00", self.date, self.hour)
    }
}

/// A closed interval of whole days, `start..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequiredWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl RequiredWindow {
    /// Creates a window covering `start` through `end`, both inclusive.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::InvalidRange`] if `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ReconcileError> {
        if start > end {
            return Err(ReconcileError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// A window covering a single day.
    #[must_use]
    pub const fn single_day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// First day of the window.
    #[must_use]
    pub const fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day of the window.
    #[must_use]
    pub const fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days covered (always at least 1).
    #[must_use]
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Number of hour slots covered, `24 * days`.
    #[must_use]
    pub fn hour_count(&self) -> i64 {
        HOURS_PER_DAY * self.days()
    }

    /// First hour slot of the window (`start 00:00`).
    #[must_use]
    pub const fn first_hour(&self) -> HourSlot {
        HourSlot::start_of_day(self.start)
    }

    /// Last hour slot of the window (`end 23:00`).
    #[must_use]
    pub const fn last_hour(&self) -> HourSlot {
        HourSlot::end_of_day(self.end)
    }

    /// Whether `date` falls inside the window.
    #[must_use]
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for RequiredWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// An inclusive run of consecutive missing hours.
///
/// Invariant: `start <= end` and `end.hours_since(&start) < 168`. Values
/// are only produced by the range compactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MissingRange {
    /// First missing hour.
    pub start: HourSlot,
    /// Last missing hour (inclusive).
    pub end: HourSlot,
}

impl MissingRange {
    /// Range covering exactly one hour.
    #[must_use]
    pub const fn single(slot: HourSlot) -> Self {
        Self {
            start: slot,
            end: slot,
        }
    }

    /// Hours between the first and last slot (`0` for a single hour).
    #[must_use]
    pub fn span_hours(&self) -> i64 {
        self.end.hours_since(&self.start)
    }

    /// Number of hour slots covered, inclusive of both ends.
    #[must_use]
    pub fn hour_count(&self) -> i64 {
        self.span_hours() + 1
    }

    /// Whether `slot` lies within the range.
    #[must_use]
    pub fn contains(&self, slot: &HourSlot) -> bool {
        self.start <= *slot && *slot <= self.end
    }

    /// The `(start, end)` export API parameters for re-fetching this range.
    #[must_use]
    pub fn api_params(&self) -> (String, String) {
        (self.start.api_timestamp(), self.end.api_timestamp())
    }
}

impl fmt::Display for MissingRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (start, end) = self.api_params();
        write!(f, "{start}..{end}")
    }
}
