//! Printable summaries of a reconciliation.

use std::fmt::Write as _;

use amp_sync_reconcile::Reconciliation;
use chrono::NaiveDate;
use serde::Serialize;

/// One missing range, in export API form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeEntry {
    /// `YYYYMMDDTHH`, inclusive.
    pub start: String,
    /// `YYYYMMDDTHH`, inclusive.
    pub end: String,
    /// Number of hours covered.
    pub hours: i64,
}

/// JSON-friendly view of a [`Reconciliation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingReport {
    /// First checked date. `None` when every stored day is newer than the
    /// window, so nothing was required.
    pub start_date: Option<NaiveDate>,
    /// Last checked date, inclusive.
    pub end_date: Option<NaiveDate>,
    /// Hours the window calls for.
    pub required_hours: usize,
    /// Distinct hours found in the listing.
    pub observed_hours: usize,
    /// Required hours absent from the listing.
    pub missing_hours: usize,
    /// Missing hours grouped into fetchable ranges.
    pub ranges: Vec<RangeEntry>,
}

impl From<&Reconciliation> for MissingReport {
    fn from(result: &Reconciliation) -> Self {
        Self {
            start_date: result.window.map(|w| w.start()),
            end_date: result.window.map(|w| w.end()),
            required_hours: result.required_hours,
            observed_hours: result.observed_hours,
            missing_hours: result.missing.len(),
            ranges: result
                .ranges
                .iter()
                .map(|range| {
                    let (start, end) = range.api_params();
                    RangeEntry {
                        start,
                        end,
                        hours: range.hour_count(),
                    }
                })
                .collect(),
        }
    }
}

impl MissingReport {
    /// Plain-text table, one range per row.
    #[must_use]
    pub fn to_table(&self) -> String {
        let mut out = String::new();
        let (Some(start), Some(end)) = (self.start_date, self.end_date) else {
            let _ = writeln!(out, "No complete day to check: nothing required");
            return out;
        };
        let _ = writeln!(
            out,
            "Window {start}..={end}: {}/{} hours present, {} missing",
            self.observed_hours,
            self.required_hours,
            self.missing_hours
        );
        if self.ranges.is_empty() {
            return out;
        }

        let _ = writeln!(out, "{:<14} {:<14} HOURS", "START", "END");
        let _ = writeln!(out, "{}", "-".repeat(36));
        for range in &self.ranges {
            let _ = writeln!(out, "{:<14} {:<14} {}", range.start, range.end, range.hours);
        }
        out
    }
}
