// src/errors.rs

//! Crate-wide error types.
//!
//! Wiring-level failures (config loading, watcher startup) flow through
//! `anyhow`. The typed errors below are the ones that cross the client API
//! boundary, where callers need to tell the failure classes apart.

use std::time::Duration;

pub use anyhow::{Context, Error, Result};

/// Failure modes of the client-facing sync operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The cookie was not observed within the caller's deadline.
    #[error("sync timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Outstanding cookies were aborted because the watcher lost events and
    /// a catch-up crawl is rebuilding the view. Callers normally never see
    /// this: `sync_to_now` retries with a fresh cookie until its deadline.
    #[error("cookie sync aborted by recrawl")]
    Aborted,

    /// The root is cancelled or its I/O thread has terminated.
    #[error("root is no longer watched")]
    RootStopped,

    /// Creating or removing a cookie file failed.
    #[error("cookie I/O: {0}")]
    Io(#[from] std::io::Error),
}
