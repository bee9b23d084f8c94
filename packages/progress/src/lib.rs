#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Progress reporting for uploads and backfills.
//!
//! Library crates report through [`ProgressCallback`] and never touch a
//! terminal themselves. The binary decides how progress is rendered
//! (`indicatif` bars in `amp_sync_cli_utils`), and tests pass
//! [`null_progress`].

use std::sync::Arc;

/// Receives progress updates from a long-running operation.
///
/// Shared as `Arc<dyn ProgressCallback>` across async tasks, hence
/// `Send + Sync`.
pub trait ProgressCallback: Send + Sync {
    /// Sets the number of units of work expected.
    fn set_total(&self, total: u64);

    /// Advances by `delta` units.
    fn inc(&self, delta: u64);

    /// Replaces the message shown next to the indicator (e.g. current file).
    fn set_message(&self, msg: String);

    /// Marks the operation finished, leaving `msg` on screen.
    fn finish(&self, msg: String);
}

/// Discards every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Shared [`NullProgress`] handle.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
