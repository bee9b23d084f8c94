//! Process configuration.
//!
//! Read once at startup from the environment (plus an optional `.env` file)
//! and passed by reference to whatever needs it. Export and storage
//! settings are resolved independently so that commands touching only one
//! side don't require credentials for the other.
//!
//! # Environment Variables
//!
//! | Variable | Required | Description |
//! |---|---|---|
//! | `AMP_API_KEY` | export | Export API key |
//! | `AMP_SECRET_KEY` | export | Export API secret |
//! | `AMP_BASE_URL` | no | Export API base URL (overrides `AMP_DATA_REGION`) |
//! | `AMP_DATA_REGION` | no | `eu` or `us`, picks the base URL (default: `eu`) |
//! | `AWS_ACCESS_KEY` | storage | Access key ID |
//! | `AWS_SECRET_KEY` | storage | Secret access key |
//! | `AWS_BUCKET_NAME` | storage | Destination bucket |
//! | `AWS_REGION` | no | Bucket region (default: `eu-west-2`) |
//! | `AWS_ENDPOINT_URL` | no | Custom S3-compatible endpoint |
//! | `AMP_SYNC_PREFIX` | no | Destination key prefix (default: `python-import/`) |
//! | `AMP_SYNC_DATA_DIR` | no | Local working directory (default: `data`) |

use std::path::PathBuf;

use amp_sync_export::{EU_BASE_URL, US_BASE_URL};
use amp_sync_s3::{S3Settings, normalize_prefix};

/// Default destination key prefix.
pub const DEFAULT_PREFIX: &str = "python-import/";

/// Default local working directory.
pub const DEFAULT_DATA_DIR: &str = "data";

/// Default bucket region.
pub const DEFAULT_REGION: &str = "eu-west-2";

/// Name of the sibling directory files are moved to when an upload can't be
/// confirmed.
pub const FAILED_DIR_NAME: &str = "data_failed_to_upload";

/// Errors resolving configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Missing required environment variable.
    #[error("Missing environment variable: {name}")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: String,
    },
}

/// Base URL for a data residency region. Anything other than `us` means
/// the EU endpoint.
fn region_base_url(region: Option<&str>) -> &'static str {
    match region {
        Some(r) if r.eq_ignore_ascii_case("us") => US_BASE_URL,
        Some(r) if !r.eq_ignore_ascii_case("eu") => {
            log::warn!("Unknown AMP_DATA_REGION '{r}', using EU endpoint");
            EU_BASE_URL
        }
        _ => EU_BASE_URL,
    }
}

/// Export API credentials and endpoint.
#[derive(Clone)]
pub struct ExportSettings {
    /// Base URL, e.g. `https://analytics.eu.amplitude.com`.
    pub base_url: String,
    /// API key.
    pub api_key: String,
    /// Secret key.
    pub secret_key: String,
}

impl std::fmt::Debug for ExportSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Everything the binary needs, resolved once.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    export: Result<ExportSettings, ConfigError>,
    storage: Result<S3Settings, ConfigError>,
    /// Destination key prefix, always ending in `/` unless empty.
    pub prefix: String,
    /// Local working directory for archives and extracted files.
    pub data_dir: PathBuf,
}

impl SyncConfig {
    /// Loads `.env` (if present) and reads the process environment.
    ///
    /// Never fails: missing credentials are reported when
    /// [`Self::export`] or [`Self::storage`] is called.
    #[must_use]
    pub fn from_env() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => log::debug!("Loaded {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => log::warn!("Ignoring unreadable .env file: {e}"),
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable lookup. Blank values
    /// count as unset.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |name: &str| {
            get(name).ok_or_else(|| ConfigError::MissingEnv {
                name: name.to_string(),
            })
        };

        let export = (|| {
            Ok(ExportSettings {
                api_key: require("AMP_API_KEY")?,
                secret_key: require("AMP_SECRET_KEY")?,
                base_url: get("AMP_BASE_URL").unwrap_or_else(|| {
                    region_base_url(get("AMP_DATA_REGION").as_deref()).to_string()
                }),
            })
        })();

        let storage = (|| {
            Ok(S3Settings {
                access_key: require("AWS_ACCESS_KEY")?,
                secret_key: require("AWS_SECRET_KEY")?,
                bucket: require("AWS_BUCKET_NAME")?,
                region: get("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
                endpoint: get("AWS_ENDPOINT_URL"),
            })
        })();

        Self {
            export,
            storage,
            prefix: normalize_prefix(
                &get("AMP_SYNC_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            ),
            data_dir: get("AMP_SYNC_DATA_DIR")
                .map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from),
        }
    }

    /// Export API settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnv`] naming the first missing variable.
    pub fn export(&self) -> Result<&ExportSettings, ConfigError> {
        self.export.as_ref().map_err(Clone::clone)
    }

    /// Object store settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnv`] naming the first missing variable.
    pub fn storage(&self) -> Result<&S3Settings, ConfigError> {
        self.storage.as_ref().map_err(Clone::clone)
    }

    /// Where a downloaded archive is saved by default.
    #[must_use]
    pub fn archive_path(&self) -> PathBuf {
        self.data_dir.join("data.zip")
    }

    /// Where archives are extracted by default.
    #[must_use]
    pub fn extract_dir(&self) -> PathBuf {
        self.data_dir.join("amp_data")
    }

    /// Scratch directory for backfill runs.
    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.data_dir.join("backfill")
    }
}
