#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Keeps an S3 prefix in sync with the Amplitude Export API.
//!
//! The bucket listing is the source of truth: [`pipeline::find_missing`]
//! reconciles it against the required hourly window, and
//! [`pipeline::backfill`] re-fetches each missing range, extracts it, and
//! uploads the resulting files.

pub mod config;
pub mod pipeline;
pub mod report;

use amp_sync_export::ExportError;
use amp_sync_export::extract::ExtractError;
use amp_sync_reconcile::ReconcileError;
use amp_sync_s3::S3Error;

use crate::config::ConfigError;

/// Errors from the sync pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Invalid reconciliation window.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// Export API error.
    #[error(transparent)]
    Export(#[from] ExportError),

    /// Archive extraction error.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Object store error.
    #[error(transparent)]
    Storage(#[from] S3Error),

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
