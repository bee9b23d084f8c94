#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! S3 object store gateway for exported event files.
//!
//! [`ObjectStore`] is the seam the sync pipeline talks to: list keys under a
//! prefix, upload a local file to a key, delete a key. [`S3Client`] is the
//! `aws-sdk-s3` implementation; [`memory::MemoryStore`] keeps objects in a
//! map for tests. [`batch::upload_dir`] builds the directory upload on top
//! of the trait.
//!
//! ## Smart upload
//!
//! Uploads compare **size + MD5/ETag** with the remote object first and skip
//! the transfer when they already match, so re-running an upload after a
//! partial failure only sends what is missing.

pub mod batch;
pub mod memory;

use std::future::Future;
use std::path::Path;

use aws_config::Region;
use aws_sdk_s3::config::{Credentials, StalledStreamProtectionConfig};

/// Errors that can occur during object store operations.
#[derive(Debug, thiserror::Error)]
pub enum S3Error {
    /// S3 `PutObject` failed.
    #[error("Failed to upload s3://{bucket}/{key}: {source}")]
    Upload {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// S3 `HeadObject` failed.
    #[error("Failed to head s3://{bucket}/{key}: {source}")]
    Head {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// S3 `DeleteObject` failed.
    #[error("Failed to delete s3://{bucket}/{key}: {source}")]
    Delete {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// S3 `ListObjectsV2` failed.
    #[error("Failed to list s3://{bucket}/{prefix}: {source}")]
    List {
        /// Bucket name.
        bucket: String,
        /// Key prefix.
        prefix: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// I/O error reading local files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Maximum number of upload attempts (initial + retries).
const MAX_UPLOAD_ATTEMPTS: u32 = 3;

/// Base delay between upload retries (doubles each attempt).
const RETRY_BASE_DELAY: std::time::Duration = std::time::Duration::from_secs(2);

/// Tally of an upload batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    /// Files actually sent.
    pub transferred: u64,
    /// Files skipped because the remote copy already matched.
    pub skipped: u64,
    /// Files that were missing locally.
    pub not_found: u64,
    /// Files whose upload failed.
    pub failed: u64,
}

impl TransferStats {
    /// Stats for a single transferred file.
    #[must_use]
    pub const fn one_transferred() -> Self {
        Self {
            transferred: 1,
            skipped: 0,
            not_found: 0,
            failed: 0,
        }
    }

    /// Merge another stats into this one.
    pub const fn merge(&mut self, other: Self) {
        self.transferred += other.transferred;
        self.skipped += other.skipped;
        self.not_found += other.not_found;
        self.failed += other.failed;
    }

    /// Total number of files considered.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.transferred + self.skipped + self.not_found + self.failed
    }
}

impl std::fmt::Display for TransferStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} transferred, {} skipped (unchanged), {} not found, {} failed",
            self.transferred, self.skipped, self.not_found, self.failed
        )
    }
}

/// Object store operations used by the sync pipeline.
pub trait ObjectStore: Send + Sync {
    /// Lists every key under `prefix`, following pagination.
    ///
    /// # Errors
    ///
    /// Returns [`S3Error::List`] if listing fails.
    fn list_keys(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>, S3Error>> + Send;

    /// Uploads `local_path` to `key`, overwriting any existing object.
    ///
    /// # Errors
    ///
    /// Returns [`S3Error::Upload`] or [`S3Error::Io`] on failure.
    fn upload(
        &self,
        key: &str,
        local_path: &Path,
    ) -> impl Future<Output = Result<TransferStats, S3Error>> + Send;

    /// Deletes `key`. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`S3Error::Delete`] on failure.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), S3Error>> + Send;
}

/// Connection settings for [`S3Client`].
#[derive(Clone)]
pub struct S3Settings {
    /// Bucket holding the exported files.
    pub bucket: String,
    /// AWS region, e.g. `eu-west-2`.
    pub region: String,
    /// Access key ID.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: String,
    /// Custom endpoint for S3-compatible stores (path-style addressing).
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Remote object metadata from `HeadObject`.
struct RemoteMeta {
    /// Content length in bytes.
    size: u64,
    /// `ETag` (usually the MD5 hex digest surrounded by quotes for
    /// non-multipart uploads).
    etag: Option<String>,
}

/// `aws-sdk-s3` backed [`ObjectStore`] bound to one bucket.
pub struct S3Client {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Client {
    /// Creates a client with explicit credentials.
    #[must_use]
    pub fn new(settings: &S3Settings) -> Self {
        let creds = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None,
            None,
            "amp-sync-config",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .region(Region::new(settings.region.clone()))
            .credentials_provider(creds)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled());

        if let Some(endpoint) = &settings.endpoint {
            log::info!("Using custom S3 endpoint: {endpoint}");
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: settings.bucket.clone(),
        }
    }

    /// Bucket this client writes to.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Uploads a local file, skipping it when the remote object already
    /// matches. Retries up to [`MAX_UPLOAD_ATTEMPTS`] times.
    ///
    /// # Errors
    ///
    /// Returns [`S3Error::Upload`] after all retries are exhausted,
    /// [`S3Error::Head`] if the metadata check fails, [`S3Error::Io`] on
    /// local filesystem errors.
    pub async fn upload(&self, key: &str, local_path: &Path) -> Result<TransferStats, S3Error> {
        let bucket = &self.bucket;

        if !local_path.exists() {
            log::warn!(
                "  {} does not exist locally, skipping",
                local_path.display()
            );
            return Ok(TransferStats {
                not_found: 1,
                ..TransferStats::default()
            });
        }

        if let Some(remote) = self.head(key).await?
            && is_local_match(local_path, &remote).await
        {
            log::info!(
                "  {} -> s3://{bucket}/{key}: skipped (unchanged)",
                local_path.display()
            );
            return Ok(TransferStats {
                skipped: 1,
                ..TransferStats::default()
            });
        }

        let mut attempt = 1;
        loop {
            match self.upload_once(key, local_path).await {
                Ok(()) => return Ok(TransferStats::one_transferred()),
                Err(e @ S3Error::Upload { .. }) if attempt < MAX_UPLOAD_ATTEMPTS => {
                    let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt - 1);
                    log::warn!(
                        "  upload attempt {attempt}/{MAX_UPLOAD_ATTEMPTS} failed ({e}), \
                         retrying in {delay:.1?}..."
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Single upload attempt (always transfers).
    async fn upload_once(&self, key: &str, local_path: &Path) -> Result<(), S3Error> {
        let bucket = &self.bucket;
        let data = tokio::fs::read(local_path).await?;
        #[allow(clippy::cast_precision_loss)] // display-only KB value
        let kb = data.len() as f64 / 1024.0;
        log::info!(
            "Pushing {} -> s3://{bucket}/{key} ({kb:.1} KB)",
            local_path.display(),
        );

        let body = aws_sdk_s3::primitives::ByteStream::from(data);

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type_for(key))
            .send()
            .await
            .map_err(|e| S3Error::Upload {
                bucket: bucket.clone(),
                key: key.to_string(),
                source: Box::new(e),
            })?;

        log::info!("  uploaded {key}");
        Ok(())
    }

    /// Deletes an object.
    ///
    /// Silently succeeds if the object doesn't exist (S3 `DeleteObject`
    /// is idempotent).
    ///
    /// # Errors
    ///
    /// Returns [`S3Error::Delete`] on S3 failures.
    pub async fn delete(&self, key: &str) -> Result<(), S3Error> {
        let bucket = &self.bucket;
        log::info!("Deleting s3://{bucket}/{key}");

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| S3Error::Delete {
                bucket: bucket.clone(),
                key: key.to_string(),
                source: Box::new(e),
            })?;

        Ok(())
    }

    /// Lists all object keys under a prefix.
    ///
    /// Returns the full keys (not stripped of the prefix).
    ///
    /// # Errors
    ///
    /// Returns [`S3Error::List`] on S3 failures.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, S3Error> {
        let bucket = &self.bucket;
        log::info!("Listing s3://{bucket}/{prefix}*");

        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let output = request.send().await.map_err(|e| S3Error::List {
                bucket: bucket.clone(),
                prefix: prefix.to_string(),
                source: Box::new(e),
            })?;

            for obj in output.contents() {
                if let Some(key) = obj.key() {
                    keys.push(key.to_string());
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        log::info!("  found {} objects", keys.len());
        Ok(keys)
    }

    /// Fetch object metadata via `HeadObject`.
    ///
    /// Returns `None` if the object doesn't exist (`NotFound`).
    async fn head(&self, key: &str) -> Result<Option<RemoteMeta>, S3Error> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let size = output.content_length().unwrap_or(0);
                #[allow(clippy::cast_sign_loss)] // S3 content-length is non-negative
                let size = size as u64;
                let etag = output.e_tag().map(str::to_string);
                Ok(Some(RemoteMeta { size, etag }))
            }
            Err(err) => {
                let service_err = err.as_service_error();
                if service_err
                    .is_some_and(aws_sdk_s3::operation::head_object::HeadObjectError::is_not_found)
                {
                    return Ok(None);
                }
                Err(S3Error::Head {
                    bucket: self.bucket.clone(),
                    key: key.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }
}

impl ObjectStore for S3Client {
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, S3Error> {
        Self::list_keys(self, prefix).await
    }

    async fn upload(&self, key: &str, local_path: &Path) -> Result<TransferStats, S3Error> {
        Self::upload(self, key, local_path).await
    }

    async fn delete(&self, key: &str) -> Result<(), S3Error> {
        Self::delete(self, key).await
    }
}

/// Returns `prefix` with exactly one trailing `/` (empty stays empty, which
/// means the bucket root).
#[must_use]
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

fn content_type_for(key: &str) -> &'static str {
    if key.ends_with(".json") {
        "application/json"
    } else {
        "application/octet-stream"
    }
}

/// Checks whether a local file matches the remote object.
///
/// Sizes must match. When the remote `ETag` is a plain MD5 digest
/// (non-multipart upload) the local MD5 must match too; multipart `ETag`s
/// fall back to the size comparison.
async fn is_local_match(local_path: &Path, remote: &RemoteMeta) -> bool {
    let Ok(meta) = tokio::fs::metadata(local_path).await else {
        return false;
    };

    if meta.len() != remote.size {
        return false;
    }

    if let Some(etag) = &remote.etag {
        let clean = etag.trim_matches('"');
        // Multipart ETags contain a `-` (e.g. "abc123-5")
        if !clean.contains('-')
            && clean.len() == 32
            && let Ok(local_md5) = compute_md5(local_path).await
        {
            return local_md5 == clean;
        }
    }

    true
}

/// Compute MD5 hex digest of a local file.
async fn compute_md5(path: &Path) -> Result<String, std::io::Error> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || compute_md5_sync(&path))
        .await
        .map_err(std::io::Error::other)?
}

/// Synchronous MD5 computation (runs in blocking thread).
fn compute_md5_sync(path: &Path) -> Result<String, std::io::Error> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }
    Ok(format!("{:x}", context.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_prefixes() {
        assert_eq!(normalize_prefix("python-import"), "python-import/");
        assert_eq!(normalize_prefix("python-import/"), "python-import/");
        assert_eq!(normalize_prefix("a/b//"), "a/b/");
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("/"), "");
    }

    #[test]
    fn json_gets_json_content_type() {
        assert_eq!(content_type_for("p/1_2024-11-01_0#0.json"), "application/json");
        assert_eq!(content_type_for("p/data.zip"), "application/octet-stream");
    }

    #[test]
    fn stats_merge_and_total() {
        let mut stats = TransferStats::one_transferred();
        stats.merge(TransferStats {
            skipped: 2,
            failed: 1,
            ..TransferStats::default()
        });
        assert_eq!(stats.total(), 4);
        assert_eq!(
            stats.to_string(),
            "1 transferred, 2 skipped (unchanged), 0 not found, 1 failed"
        );
    }

    #[test]
    fn md5_of_known_content() {
        let path = std::env::temp_dir().join("amp_sync_s3_md5_test.json");
        std::fs::write(&path, b"hello world").unwrap();
        assert_eq!(
            compute_md5_sync(&path).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn settings_debug_redacts_secrets() {
        let settings = S3Settings {
            bucket: "events".to_string(),
            region: "eu-west-2".to_string(),
            access_key: "AKIAEXAMPLE".to_string(),
            secret_key: "very-secret".to_string(),
            endpoint: None,
        };
        let dbg = format!("{settings:?}");
        assert!(dbg.contains("events"));
        assert!(!dbg.contains("AKIAEXAMPLE"));
        assert!(!dbg.contains("very-secret"));
    }
}
