//! In-memory [`ObjectStore`] for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{ObjectStore, S3Error, TransferStats};

/// Objects kept in a sorted map. Keys listed in `fail_uploads` reject
/// uploads, to exercise partial batch failures.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_uploads: Mutex<BTreeSet<String>>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with empty objects at `keys`.
    #[must_use]
    pub fn with_keys<S: AsRef<str>>(keys: &[S]) -> Self {
        let store = Self::default();
        {
            let mut objects = store.objects();
            for key in keys {
                objects.insert(key.as_ref().to_string(), Vec::new());
            }
        }
        store
    }

    /// Makes every upload to `key` fail.
    pub fn fail_uploads_to(&self, key: &str) {
        lock(&self.fail_uploads).insert(key.to_string());
    }

    /// Sorted snapshot of the stored keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    /// Contents of `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects().get(key).cloned()
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        lock(&self.objects)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ObjectStore for MemoryStore {
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, S3Error> {
        Ok(self
            .objects()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn upload(&self, key: &str, local_path: &Path) -> Result<TransferStats, S3Error> {
        let rejected = lock(&self.fail_uploads).contains(key);
        if rejected {
            return Err(S3Error::Upload {
                bucket: "memory".to_string(),
                key: key.to_string(),
                source: "upload rejected".into(),
            });
        }
        if !local_path.exists() {
            return Ok(TransferStats {
                not_found: 1,
                ..TransferStats::default()
            });
        }
        let data = tokio::fs::read(local_path).await?;
        self.objects().insert(key.to_string(), data);
        Ok(TransferStats::one_transferred())
    }

    async fn delete(&self, key: &str) -> Result<(), S3Error> {
        self.objects().remove(key);
        Ok(())
    }
}
