// src/root/sync.rs

//! Client-facing sync operations on a root.

use std::time::Duration;

use tracing::{debug, error};

use crate::errors::SyncError;
use crate::perf::PerfSample;
use crate::root::{Root, RootEvent};

impl Root {
    /// Create a cookie under the root and wait for the watcher to observe
    /// it. When this returns, every watcher event that causally preceded
    /// the cookie's creation has been processed into the view.
    pub async fn sync_to_now(&self, timeout: Duration) -> Result<(), SyncError> {
        self.touch_client_activity();

        let mut sample = PerfSample::new("sync_to_now");
        sample.add_meta("root", self.path().display().to_string());
        sample.add_meta("timeout_ms", timeout.as_millis().to_string());

        match self.cookies.sync_to_now(timeout).await {
            Ok(()) => {
                if sample.finish() {
                    sample.log();
                }
                debug!(
                    root = %self.path().display(),
                    timeout_ms = timeout.as_millis() as u64,
                    recrawl_count = self.recrawl_count(),
                    "sync_to_now complete"
                );
                Ok(())
            }
            Err(err) => {
                sample.add_meta("success", "false");
                sample.add_meta("reason", err.to_string());
                sample.force_log();
                sample.finish();
                sample.log();
                error!(
                    root = %self.path().display(),
                    error = %err,
                    timeout_ms = timeout.as_millis() as u64,
                    recrawl_count = self.recrawl_count(),
                    "sync_to_now failed"
                );
                Err(err)
            }
        }
    }

    /// Wait until the root has been quiet for at least `period`.
    ///
    /// Resolves on the first settle notification whose preceding quiet
    /// interval reaches `period`; immediately if the root is already
    /// settled and that quiet.
    pub async fn wait_for_settle(&self, period: Duration) -> Result<(), SyncError> {
        self.touch_client_activity();

        let mut rx = self.subscribe();
        if self.done_initial() && self.quiet_duration() >= period {
            return Ok(());
        }

        loop {
            match rx.recv().await {
                Ok(RootEvent::Settled) => {
                    if self.quiet_duration() >= period {
                        return Ok(());
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    return Err(SyncError::RootStopped);
                }
            }
        }
    }
}
