#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Amplitude Export API client and archive extraction.
//!
//! [`ExportClient`] downloads the raw event archive for an hour range
//! (`start`/`end` in `YYYYMMDDTHH` form, both inclusive). The archive is a
//! zip of gzipped hourly JSON files; [`extract`] turns it into plain JSON
//! files ready for upload.

pub mod extract;
pub mod retry;

use std::path::Path;
use std::time::Duration;

use amp_sync_reconcile_models::HourSlot;

/// Export API base URL for EU data residency.
pub const EU_BASE_URL: &str = "https://analytics.eu.amplitude.com";

/// Export API base URL for the default (US) data center.
pub const US_BASE_URL: &str = "https://amplitude.com";

/// Path of the export endpoint, relative to the base URL.
const EXPORT_PATH: &str = "/api/2/export";

/// Per-request timeout. Archives for a full week can run to hundreds of MB.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Errors from the export API.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The request could not be sent or the body could not be read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("Export API returned HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        message: String,
    },

    /// A timestamp was not in `YYYYMMDDTHH` form.
    #[error("Invalid export timestamp '{0}' (expected YYYYMMDDTHH)")]
    InvalidTimestamp(String),

    /// `start` is after `end`.
    #[error("Export range start {start} is after end {end}")]
    InvalidRange {
        /// Requested start.
        start: String,
        /// Requested end.
        end: String,
    },

    /// I/O error writing the archive locally.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    /// Whether retrying later might succeed (network failures, rate limits,
    /// server errors).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidTimestamp(_) | Self::InvalidRange { .. } | Self::Io(_) => false,
        }
    }

    /// Whether the API reported that no data exists for the range.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

/// Source of export archives for an hour range.
///
/// Implemented by [`ExportClient`]; the sync pipeline is generic over it.
pub trait ArchiveSource: Send + Sync {
    /// Fetches the archive covering `start..=end` (`YYYYMMDDTHH`).
    ///
    /// # Errors
    ///
    /// Returns [`ExportError`] if the archive can't be retrieved.
    fn fetch_archive(
        &self,
        start: &str,
        end: &str,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, ExportError>> + Send;
}

/// HTTP client for the export endpoint, authenticated with an API key and
/// secret via basic auth.
pub struct ExportClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    secret_key: String,
}

impl std::fmt::Debug for ExportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ExportClient {
    /// Creates a client for `base_url` (see [`EU_BASE_URL`] / [`US_BASE_URL`]).
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Http`] if the HTTP client can't be built.
    pub fn new(base_url: &str, api_key: &str, secret_key: &str) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("amp-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    /// Full URL of the export endpoint.
    #[must_use]
    pub fn export_url(&self) -> String {
        format!("{}{EXPORT_PATH}", self.base_url)
    }

    /// Downloads the archive for `start..=end`.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidTimestamp`] / [`ExportError::InvalidRange`]
    /// before any request is made if the bounds are malformed, otherwise see
    /// [`retry::send_bytes`].
    pub async fn fetch_archive(&self, start: &str, end: &str) -> Result<Vec<u8>, ExportError> {
        validate_range(start, end)?;

        let url = self.export_url();
        log::info!("Requesting export {start}..{end} from {url}");

        let bytes = retry::send_bytes(|| {
            self.client
                .get(&url)
                .query(&[("start", start), ("end", end)])
                .basic_auth(&self.api_key, Some(&self.secret_key))
        })
        .await?;

        #[allow(clippy::cast_precision_loss)] // display-only MB value
        let mb = bytes.len() as f64 / 1_048_576.0;
        log::info!("  retrieved {start}..{end} ({mb:.1} MB)");

        Ok(bytes)
    }

    /// Downloads the archive for `start..=end` to `path`, creating parent
    /// directories. Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// See [`Self::fetch_archive`]; also [`ExportError::Io`] on write failure.
    pub async fn download_archive(
        &self,
        start: &str,
        end: &str,
        path: &Path,
    ) -> Result<u64, ExportError> {
        let bytes = self.fetch_archive(start, end).await?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &bytes).await?;
        log::info!("Archive saved to {}", path.display());
        Ok(bytes.len() as u64)
    }
}

impl ArchiveSource for ExportClient {
    async fn fetch_archive(&self, start: &str, end: &str) -> Result<Vec<u8>, ExportError> {
        Self::fetch_archive(self, start, end).await
    }
}

/// Checks both bounds are `YYYYMMDDTHH` and `start <= end`.
///
/// # Errors
///
/// Returns [`ExportError::InvalidTimestamp`] or [`ExportError::InvalidRange`].
pub fn validate_range(start: &str, end: &str) -> Result<(), ExportError> {
    let start_slot = HourSlot::from_api_timestamp(start)
        .ok_or_else(|| ExportError::InvalidTimestamp(start.to_string()))?;
    let end_slot = HourSlot::from_api_timestamp(end)
        .ok_or_else(|| ExportError::InvalidTimestamp(end.to_string()))?;
    if start_slot > end_slot {
        return Err(ExportError::InvalidRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    Ok(())
}
