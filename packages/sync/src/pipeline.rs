//! Reconcile-then-backfill orchestration.
//!
//! Everything here is generic over [`ArchiveSource`] and [`ObjectStore`] so
//! the same code runs against the live API and bucket or against in-memory
//! fakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use amp_sync_export::ArchiveSource;
use amp_sync_export::extract;
use amp_sync_progress::ProgressCallback;
use amp_sync_reconcile::{HourSlot, MissingRange, Reconciliation};
use amp_sync_s3::batch::{self, BatchOutcome};
use amp_sync_s3::{ObjectStore, TransferStats, normalize_prefix};
use chrono::{NaiveDate, TimeDelta};

use crate::PipelineError;
use crate::config::FAILED_DIR_NAME;

/// How many days behind `today` the default single-day export targets.
/// Amplitude needs a while before an hour's raw files are complete.
pub const DEFAULT_EXPORT_LAG_DAYS: i64 = 3;

/// The full day [`DEFAULT_EXPORT_LAG_DAYS`] before `today`, `T00` to `T23`.
#[must_use]
pub fn default_export_range(today: NaiveDate) -> MissingRange {
    let day = today - TimeDelta::days(DEFAULT_EXPORT_LAG_DAYS);
    MissingRange {
        start: HourSlot::start_of_day(day),
        end: HourSlot::end_of_day(day),
    }
}

/// Lists `prefix` and reconciles it against the resolved window.
///
/// See [`amp_sync_reconcile::timeline::resolve_window`] for how `start` / `end` default. When
/// every key is newer than the window, nothing is required and the result
/// is [`Reconciliation::nothing_required`].
///
/// # Errors
///
/// * [`PipelineError::Storage`] if the listing fails
/// * [`PipelineError::Reconcile`] if an explicit `start` is after `end`
pub async fn find_missing<S: ObjectStore>(
    store: &S,
    prefix: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<Reconciliation, PipelineError> {
    let prefix = normalize_prefix(prefix);
    let keys = store.list_keys(&prefix).await?;
    let result = amp_sync_reconcile::reconcile_listing(&keys, start, end, today)?;

    let Some(window) = result.window else {
        log::info!(
            "All {} key(s) under '{prefix}' are newer than the required window",
            keys.len()
        );
        return Ok(result);
    };

    log::info!(
        "Checked {window} against {} key(s) under '{prefix}'",
        keys.len()
    );
    log::info!(
        "{}/{} hours present, {} missing in {} range(s)",
        result.observed_hours,
        result.required_hours,
        result.missing.len(),
        result.ranges.len()
    );
    Ok(result)
}

/// Cleans up an extraction directory after a batch upload.
///
/// An uploaded batch leaves an empty directory, which is removed. A failed
/// batch is moved aside with [`quarantine_dir`] and the new location is
/// returned.
///
/// # Errors
///
/// Returns an I/O error if the quarantine rename fails.
pub fn settle_dir(dir: &Path, outcome: &BatchOutcome) -> std::io::Result<Option<PathBuf>> {
    match outcome {
        BatchOutcome::Uploaded(_) => {
            if dir.exists()
                && let Err(e) = std::fs::remove_dir(dir)
            {
                log::warn!("Could not remove {}: {e}", dir.display());
            }
            Ok(None)
        }
        BatchOutcome::Failed { remaining, .. } => {
            let dest = quarantine_dir(dir)?;
            log::warn!(
                "Moved {} unconfirmed file(s) to {}",
                remaining.len(),
                dest.display()
            );
            Ok(Some(dest))
        }
    }
}

/// Renames `dir` to a sibling named [`FAILED_DIR_NAME`], appending `_1`,
/// `_2`, ... if that name is taken. Returns the new path.
///
/// # Errors
///
/// Returns an I/O error if the rename fails.
pub fn quarantine_dir(dir: &Path) -> std::io::Result<PathBuf> {
    let parent = dir.parent().unwrap_or_else(|| Path::new("."));

    let mut dest = parent.join(FAILED_DIR_NAME);
    let mut suffix = 1u32;
    while dest.exists() {
        dest = parent.join(format!("{FAILED_DIR_NAME}_{suffix}"));
        suffix += 1;
    }

    std::fs::rename(dir, &dest)?;
    Ok(dest)
}

/// Fetches one range, saves and extracts the archive under `work_dir`,
/// and uploads the extracted files to `prefix`.
///
/// The archive is deleted once extracted. If the upload can't be
/// confirmed, the extracted files are quarantined next to it.
///
/// # Errors
///
/// * [`PipelineError::Export`] if the archive can't be fetched
/// * [`PipelineError::Extract`] if it can't be unpacked (the archive is
///   kept for inspection)
/// * [`PipelineError::Storage`] / [`PipelineError::Io`] on upload or
///   filesystem failures
pub async fn ingest_range<A: ArchiveSource, S: ObjectStore>(
    source: &A,
    store: &S,
    range: &MissingRange,
    prefix: &str,
    work_dir: &Path,
    progress: Option<Arc<dyn ProgressCallback>>,
) -> Result<BatchOutcome, PipelineError> {
    let (start, end) = range.api_params();
    let bytes = source.fetch_archive(&start, &end).await?;

    let range_dir = work_dir.join(format!("{start}_{end}"));
    tokio::fs::create_dir_all(&range_dir).await?;
    let archive_path = range_dir.join("data.zip");
    tokio::fs::write(&archive_path, &bytes).await?;
    drop(bytes);

    let extract_dir = range_dir.join("amp_data");
    let (zip_path, out_dir) = (archive_path.clone(), extract_dir.clone());
    tokio::task::spawn_blocking(move || extract::extract_to_dir(&zip_path, &out_dir))
        .await
        .map_err(std::io::Error::other)??;
    tokio::fs::remove_file(&archive_path).await?;

    let outcome = batch::upload_dir(store, &extract_dir, prefix, progress).await?;
    if settle_dir(&extract_dir, &outcome)?.is_none()
        && let Err(e) = std::fs::remove_dir(&range_dir)
    {
        log::debug!("Leaving {}: {e}", range_dir.display());
    }

    Ok(outcome)
}

/// Inputs to [`backfill`].
#[derive(Debug, Clone, Copy)]
pub struct BackfillOptions<'a> {
    /// Destination key prefix.
    pub prefix: &'a str,
    /// Scratch directory for archives and extracted files.
    pub work_dir: &'a Path,
    /// First required date (see [`amp_sync_reconcile::timeline::resolve_window`]).
    pub start: Option<NaiveDate>,
    /// Last required date.
    pub end: Option<NaiveDate>,
    /// Reference date for defaults.
    pub today: NaiveDate,
}

/// A range that could not be backfilled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRange {
    /// The range.
    pub range: MissingRange,
    /// What went wrong.
    pub reason: String,
    /// Whether the export API failure looked temporary (network, rate
    /// limit, server error), so a later run is likely to succeed.
    pub transient: bool,
}

/// Summary of a [`backfill`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    /// Reconciliation before any fetching.
    pub before: Reconciliation,
    /// Reconciliation of the same window afterwards. `None` if nothing was
    /// missing to begin with.
    pub after: Option<Reconciliation>,
    /// Ranges whose files were all uploaded.
    pub uploaded: Vec<MissingRange>,
    /// Ranges the API had no data for.
    pub empty: Vec<MissingRange>,
    /// Ranges that failed.
    pub failed: Vec<FailedRange>,
    /// Combined upload tally.
    pub stats: TransferStats,
}

impl BackfillReport {
    /// Whether any range failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Hours still missing after the run.
    #[must_use]
    pub fn remaining_hours(&self) -> usize {
        self.after
            .as_ref()
            .map_or(self.before.missing.len(), |after| after.missing.len())
    }
}

/// Reconciles the store, then fetches and uploads every missing range in
/// order. A failing range is logged and recorded; the run carries on with
/// the next one. Finishes by reconciling the same window again.
///
/// `progress` advances once per range.
///
/// # Errors
///
/// Only the reconciliation steps are fatal; see [`find_missing`].
pub async fn backfill<A: ArchiveSource, S: ObjectStore>(
    source: &A,
    store: &S,
    options: BackfillOptions<'_>,
    progress: Option<Arc<dyn ProgressCallback>>,
) -> Result<BackfillReport, PipelineError> {
    let before = find_missing(
        store,
        options.prefix,
        options.start,
        options.end,
        options.today,
    )
    .await?;

    let mut report = BackfillReport {
        before: before.clone(),
        after: None,
        uploaded: Vec::new(),
        empty: Vec::new(),
        failed: Vec::new(),
        stats: TransferStats::default(),
    };

    let Some(window) = before.window.filter(|_| !before.is_complete()) else {
        log::info!("Nothing missing");
        return Ok(report);
    };

    if let Some(p) = &progress {
        p.set_total(before.ranges.len() as u64);
    }

    for (i, range) in before.ranges.iter().enumerate() {
        log::info!(
            "[{}/{}] Backfilling {range} ({} hours)",
            i + 1,
            before.ranges.len(),
            range.hour_count()
        );
        if let Some(p) = &progress {
            p.set_message(range.to_string());
        }

        match ingest_range(source, store, range, options.prefix, options.work_dir, None).await {
            Ok(BatchOutcome::Uploaded(stats)) => {
                report.stats.merge(stats);
                report.uploaded.push(*range);
            }
            Ok(BatchOutcome::Failed { remaining, stats }) => {
                report.stats.merge(stats);
                report.failed.push(FailedRange {
                    range: *range,
                    reason: format!("{} file(s) not confirmed", remaining.len()),
                    transient: false,
                });
            }
            Err(PipelineError::Export(e)) if e.is_not_found() => {
                log::warn!("No export data for {range}, skipping");
                report.empty.push(*range);
            }
            Err(e) => {
                let transient = matches!(&e, PipelineError::Export(x) if x.is_transient());
                if transient {
                    log::error!("Failed to backfill {range} (transient, retry later): {e}");
                } else {
                    log::error!("Failed to backfill {range}: {e}");
                }
                report.failed.push(FailedRange {
                    range: *range,
                    reason: e.to_string(),
                    transient,
                });
            }
        }

        if let Some(p) = &progress {
            p.inc(1);
        }
    }

    if let Some(p) = &progress {
        p.finish(format!(
            "Backfill: {} uploaded, {} empty, {} failed",
            report.uploaded.len(),
            report.empty.len(),
            report.failed.len()
        ));
    }

    let after = find_missing(
        store,
        options.prefix,
        Some(window.start()),
        Some(window.end()),
        options.today,
    )
    .await?;

    if after.is_complete() {
        log::info!("All hours in {window} are now present");
    } else {
        log::warn!(
            "{} hour(s) still missing in {window}:",
            after.missing.len()
        );
        for range in &after.ranges {
            log::warn!("  {range}");
        }
    }

    report.after = Some(after);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};
    use std::sync::Mutex;

    use amp_sync_export::ExportError;
    use amp_sync_progress::null_progress;
    use amp_sync_s3::memory::MemoryStore;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    /// Serves a zip holding one file per requested hour, or a 404.
    #[derive(Default)]
    struct FakeExport {
        no_data: bool,
        fail_status: Option<u16>,
        requests: Mutex<Vec<(String, String)>>,
    }

    impl FakeExport {
        fn requests(&self) -> Vec<(String, String)> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl ArchiveSource for FakeExport {
        async fn fetch_archive(&self, start: &str, end: &str) -> Result<Vec<u8>, ExportError> {
            self.requests
                .lock()
                .unwrap()
                .push((start.to_string(), end.to_string()));

            if self.no_data {
                return Err(ExportError::Status {
                    status: 404,
                    message: "Raw data files were not found.".to_string(),
                });
            }
            if let Some(status) = self.fail_status {
                return Err(ExportError::Status {
                    status,
                    message: "upstream failure".to_string(),
                });
            }

            let first = HourSlot::from_api_timestamp(start).unwrap();
            let last = HourSlot::from_api_timestamp(end).unwrap();
            let slots: Vec<HourSlot> = std::iter::successors(Some(first), HourSlot::next)
                .take_while(|s| *s <= last)
                .collect();
            Ok(build_archive(&slots))
        }
    }

    fn build_archive(slots: &[HourSlot]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for slot in slots {
            let name = format!("187/187_{}_{}#0.json.gz", slot.date(), slot.hour());
            let mut gz = GzEncoder::new(Vec::new(), Compression::default());
            gz.write_all(b"{\"event_type\":\"page_view\"}\n").unwrap();
            writer.start_file(name, options).unwrap();
            writer.write_all(&gz.finish().unwrap()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn day_keys(day: &str, skip: &[u32]) -> Vec<String> {
        (0..24)
            .filter(|h| !skip.contains(h))
            .map(|h| format!("python-import/187_{day}_{h}#0.json"))
            .collect()
    }

    fn work_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn options(work_dir: &Path) -> BackfillOptions<'_> {
        BackfillOptions {
            prefix: "python-import",
            work_dir,
            start: Some(date(2024, 11, 1)),
            end: Some(date(2024, 11, 1)),
            today: date(2024, 11, 10),
        }
    }

    #[test]
    fn default_export_range_is_three_days_back() {
        let range = default_export_range(date(2024, 11, 4));
        assert_eq!(
            range.api_params(),
            ("20241101T00".to_string(), "20241101T23".to_string())
        );
    }

    #[tokio::test]
    async fn find_missing_uses_listing_under_prefix() {
        let mut keys = day_keys("2024-11-01", &[5]);
        keys.push("other/187_2024-11-01_5#0.json".to_string());
        let store = MemoryStore::with_keys(&keys);

        let result = find_missing(
            &store,
            "python-import/",
            None,
            Some(date(2024, 11, 1)),
            date(2024, 11, 10),
        )
        .await
        .unwrap();

        assert_eq!(result.window.unwrap().start(), date(2024, 11, 1));
        assert_eq!(result.ranges.len(), 1);
        assert_eq!(
            result.ranges[0].api_params(),
            ("20241101T05".to_string(), "20241101T05".to_string())
        );
    }

    #[tokio::test]
    async fn find_missing_rejects_inverted_window() {
        let store = MemoryStore::new();
        let result = find_missing(
            &store,
            "python-import/",
            Some(date(2024, 11, 5)),
            Some(date(2024, 11, 1)),
            date(2024, 11, 10),
        )
        .await;
        assert!(matches!(result, Err(PipelineError::Reconcile(_))));
    }

    #[tokio::test]
    async fn backfill_fills_gaps_and_second_pass_is_clean() {
        let dir = work_dir("amp_sync_pipeline_fill");
        let store = MemoryStore::with_keys(&day_keys("2024-11-01", &[5, 6, 7, 20]));
        let source = FakeExport::default();

        let report = backfill(&source, &store, options(&dir), Some(null_progress()))
            .await
            .unwrap();

        assert_eq!(
            source.requests(),
            vec![
                ("20241101T05".to_string(), "20241101T07".to_string()),
                ("20241101T20".to_string(), "20241101T20".to_string()),
            ]
        );
        assert_eq!(report.uploaded.len(), 2);
        assert!(!report.has_failures());
        assert_eq!(report.stats.transferred, 4);
        assert_eq!(report.remaining_hours(), 0);
        assert!(report.after.as_ref().unwrap().is_complete());
        assert!(
            store
                .get("python-import/187_2024-11-01_6#0.json")
                .is_some()
        );
        assert!(!dir.join("20241101T05_20241101T07").exists());

        let again = backfill(&source, &store, options(&dir), None)
            .await
            .unwrap();
        assert!(again.before.is_complete());
        assert!(again.after.is_none());
        assert_eq!(source.requests().len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn backfill_skips_ranges_without_data() {
        let dir = work_dir("amp_sync_pipeline_no_data");
        let store = MemoryStore::with_keys(&day_keys("2024-11-01", &[3]));
        let source = FakeExport {
            no_data: true,
            ..FakeExport::default()
        };

        let report = backfill(&source, &store, options(&dir), None)
            .await
            .unwrap();

        assert_eq!(report.empty.len(), 1);
        assert!(!report.has_failures());
        assert_eq!(report.remaining_hours(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn export_failures_are_flagged_transient_or_not() {
        let dir = work_dir("amp_sync_pipeline_transient");
        let store = MemoryStore::with_keys(&day_keys("2024-11-01", &[2]));

        for (status, transient) in [(503, true), (429, true), (400, false)] {
            let source = FakeExport {
                fail_status: Some(status),
                ..FakeExport::default()
            };
            let report = backfill(&source, &store, options(&dir), None)
                .await
                .unwrap();

            assert_eq!(report.failed.len(), 1, "status {status}");
            assert_eq!(report.failed[0].transient, transient, "status {status}");
            assert_eq!(report.remaining_hours(), 1);
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn backfill_with_only_fresh_keys_fetches_nothing() {
        let dir = work_dir("amp_sync_pipeline_fresh");
        let store = MemoryStore::with_keys(&day_keys("2024-11-10", &[]));
        let source = FakeExport::default();
        let opts = BackfillOptions {
            start: None,
            end: None,
            ..options(&dir)
        };

        let report = backfill(&source, &store, opts, None).await.unwrap();

        assert_eq!(report.before, Reconciliation::nothing_required());
        assert!(report.after.is_none());
        assert!(source.requests().is_empty());
        assert_eq!(report.remaining_hours(), 0);
    }

    #[tokio::test]
    async fn unconfirmed_uploads_are_quarantined() {
        let dir = work_dir("amp_sync_pipeline_quarantine");
        let store = MemoryStore::with_keys(&day_keys("2024-11-01", &[8, 9]));
        store.fail_uploads_to("python-import/187_2024-11-01_9#0.json");
        let source = FakeExport::default();

        let report = backfill(&source, &store, options(&dir), None)
            .await
            .unwrap();

        assert!(report.has_failures());
        assert_eq!(report.failed[0].range.hour_count(), 2);
        assert!(!report.failed[0].transient);
        assert_eq!(report.remaining_hours(), 1);

        let quarantined = dir
            .join("20241101T08_20241101T09")
            .join(FAILED_DIR_NAME);
        assert!(quarantined.join("187_2024-11-01_9#0.json").exists());
        assert!(!quarantined.join("187_2024-11-01_8#0.json").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn quarantine_picks_a_free_name() {
        let root = work_dir("amp_sync_pipeline_rename");
        std::fs::create_dir_all(root.join(FAILED_DIR_NAME)).unwrap();
        let src = root.join("amp_data");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.json"), b"{}").unwrap();

        let dest = quarantine_dir(&src).unwrap();
        assert_eq!(dest, root.join(format!("{FAILED_DIR_NAME}_1")));
        assert!(dest.join("a.json").exists());
        assert!(!src.exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn settle_removes_empty_uploaded_dir() {
        let root = work_dir("amp_sync_pipeline_settle");
        let src = root.join("amp_data");
        std::fs::create_dir_all(&src).unwrap();

        let moved = settle_dir(&src, &BatchOutcome::Uploaded(TransferStats::default())).unwrap();
        assert_eq!(moved, None);
        assert!(!src.exists());

        let _ = std::fs::remove_dir_all(&root);
    }
}
