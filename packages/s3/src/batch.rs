//! Directory upload with verification.
//!
//! [`upload_dir`] pushes every file of a local directory under a key prefix,
//! lists the prefix to confirm what actually landed, deletes the confirmed
//! local copies, and reports the rest as a [`BatchOutcome::Failed`]. What to
//! do with a directory that still has files in it is the caller's call.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use amp_sync_progress::ProgressCallback;

use crate::{ObjectStore, S3Error, TransferStats, normalize_prefix};

/// Result of uploading a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every local file was confirmed in the store and removed locally.
    Uploaded(TransferStats),
    /// Some files could not be confirmed; they are still on disk.
    Failed {
        /// Names of the files left in the directory.
        remaining: Vec<String>,
        /// Tally of the upload attempts.
        stats: TransferStats,
    },
}

impl BatchOutcome {
    /// Upload stats regardless of outcome.
    #[must_use]
    pub const fn stats(&self) -> TransferStats {
        match self {
            Self::Uploaded(stats) | Self::Failed { stats, .. } => *stats,
        }
    }

    /// Whether the batch fully succeeded.
    #[must_use]
    pub const fn is_uploaded(&self) -> bool {
        matches!(self, Self::Uploaded(_))
    }
}

/// Uploads each regular file in `local_dir` to `prefix/<file name>`.
///
/// A failed upload doesn't stop the batch. Afterwards the prefix is listed
/// and local files present remotely are deleted. A missing directory is an
/// empty batch.
///
/// # Errors
///
/// Returns [`S3Error::List`] if the verification listing fails and
/// [`S3Error::Io`] if the directory can't be read or a confirmed file can't
/// be removed. Individual upload errors are logged and counted instead.
pub async fn upload_dir<S: ObjectStore>(
    store: &S,
    local_dir: &Path,
    prefix: &str,
    progress: Option<Arc<dyn ProgressCallback>>,
) -> Result<BatchOutcome, S3Error> {
    let prefix = normalize_prefix(prefix);

    if !local_dir.exists() {
        log::warn!("{} does not exist, nothing to upload", local_dir.display());
        return Ok(BatchOutcome::Uploaded(TransferStats::default()));
    }

    let files = list_local_files(local_dir)?;
    log::info!(
        "Uploading {} file(s) from {} to {prefix}",
        files.len(),
        local_dir.display()
    );

    if let Some(p) = &progress {
        p.set_total(files.len() as u64);
    }

    let mut stats = TransferStats::default();
    for name in &files {
        if let Some(p) = &progress {
            p.set_message(name.clone());
        }

        let key = format!("{prefix}{name}");
        match store.upload(&key, &local_dir.join(name)).await {
            Ok(s) => stats.merge(s),
            Err(e) => {
                log::error!("Failed to upload {name}: {e}");
                stats.failed += 1;
            }
        }

        if let Some(p) = &progress {
            p.inc(1);
        }
    }

    let remote: BTreeSet<String> = store
        .list_keys(&prefix)
        .await?
        .into_iter()
        .filter_map(|key| key.strip_prefix(prefix.as_str()).map(str::to_string))
        .collect();

    let mut remaining = Vec::new();
    for name in files {
        if remote.contains(&name) {
            std::fs::remove_file(local_dir.join(&name))?;
        } else {
            remaining.push(name);
        }
    }

    if let Some(p) = &progress {
        p.finish(format!("Upload: {stats}"));
    }

    if remaining.is_empty() {
        log::info!("Upload complete: {stats}");
        Ok(BatchOutcome::Uploaded(stats))
    } else {
        log::warn!(
            "{} file(s) not confirmed in the store: {}",
            remaining.len(),
            remaining.join(", ")
        );
        Ok(BatchOutcome::Failed { remaining, stats })
    }
}

/// Names of the regular files directly inside `dir`, sorted.
///
/// # Errors
///
/// Returns [`S3Error::Io`] if the directory can't be read.
pub fn list_local_files(dir: &Path) -> Result<Vec<String>, S3Error> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use amp_sync_progress::null_progress;

    use super::*;
    use crate::memory::MemoryStore;

    fn scratch_dir(name: &str, files: &[&str]) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        for file in files {
            std::fs::write(dir.join(file), file.as_bytes()).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn uploads_and_clears_directory() {
        let dir = scratch_dir(
            "amp_sync_batch_ok",
            &["187_2024-11-01_0#0.json", "187_2024-11-01_1#0.json"],
        );
        let store = MemoryStore::new();

        let outcome = upload_dir(&store, &dir, "python-import", Some(null_progress()))
            .await
            .unwrap();

        assert!(outcome.is_uploaded());
        assert_eq!(outcome.stats().transferred, 2);
        assert_eq!(
            store.keys(),
            vec![
                "python-import/187_2024-11-01_0#0.json".to_string(),
                "python-import/187_2024-11-01_1#0.json".to_string(),
            ]
        );
        assert!(list_local_files(&dir).unwrap().is_empty());
        assert_eq!(
            store.get("python-import/187_2024-11-01_1#0.json").unwrap(),
            b"187_2024-11-01_1#0.json"
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn failed_uploads_stay_local() {
        let dir = scratch_dir("amp_sync_batch_partial", &["a.json", "b.json", "c.json"]);
        let store = MemoryStore::new();
        store.fail_uploads_to("events/b.json");

        let outcome = upload_dir(&store, &dir, "events/", None).await.unwrap();

        match outcome {
            BatchOutcome::Failed { remaining, stats } => {
                assert_eq!(remaining, vec!["b.json".to_string()]);
                assert_eq!(stats.transferred, 2);
                assert_eq!(stats.failed, 1);
            }
            BatchOutcome::Uploaded(_) => panic!("expected a failed batch"),
        }
        assert_eq!(list_local_files(&dir).unwrap(), vec!["b.json".to_string()]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_directory_is_empty_batch() {
        let dir = std::env::temp_dir().join("amp_sync_batch_missing_dir");
        let _ = std::fs::remove_dir_all(&dir);
        let store = MemoryStore::new();

        let outcome = upload_dir(&store, &dir, "events", None).await.unwrap();
        assert_eq!(outcome, BatchOutcome::Uploaded(TransferStats::default()));
    }

    #[test]
    fn lists_only_regular_files() {
        let dir = scratch_dir("amp_sync_batch_list", &["b.json", "a.json"]);
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        assert_eq!(
            list_local_files(&dir).unwrap(),
            vec!["a.json".to_string(), "b.json".to_string()]
        );
        let _ = std::fs::remove_dir_all(&dir);
    }
}
