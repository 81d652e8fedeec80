// src/cookies.rs

//! Cookie-file rendezvous.
//!
//! A cookie is a uniquely named temporary file created under the root. When
//! the watcher reports it back, every kernel event that causally preceded
//! its creation must already have been delivered, so observing the cookie
//! proves the view has caught up. Cookie files never enter the view.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::SyncError;

type CookieWaiter = oneshot::Sender<Result<(), SyncError>>;

/// Out-of-band rendezvous files proving the watcher has caught up.
#[derive(Debug)]
pub struct CookieSync {
    cookie_dir: PathBuf,
    /// Filename prefix of cookies this instance creates. Includes the pid so
    /// cookies from other processes on the same tree are not ours and get
    /// reported like any other file change.
    prefix: String,
    serial: AtomicU64,
    outstanding: Mutex<HashMap<PathBuf, Vec<CookieWaiter>>>,
}

impl CookieSync {
    pub fn new(root: &Path) -> Self {
        Self {
            cookie_dir: root.to_path_buf(),
            prefix: format!(".treewatch-cookie-{}-", process::id()),
            serial: AtomicU64::new(0),
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    /// True if `path` names a cookie this instance may have created: a
    /// direct child of the cookie directory carrying our prefix. Cookies of
    /// nested watches or foreign processes do not match and are treated as
    /// ordinary files.
    pub fn is_cookie_prefix(&self, path: &Path) -> bool {
        if path.parent() != Some(self.cookie_dir.as_path()) {
            return false;
        }
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(&self.prefix))
    }

    /// Create a cookie and wait for the watcher to observe it.
    ///
    /// If the cookie is aborted by a recrawl before being observed, a fresh
    /// cookie is created and the wait continues, bounded by `timeout`
    /// overall.
    pub async fn sync_to_now(&self, timeout: Duration) -> Result<(), SyncError> {
        let deadline = Instant::now() + timeout;

        loop {
            let (path, rx) = self.prepare_cookie()?;
            debug!(cookie = %path.display(), "cookie created, awaiting observation");

            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, rx).await {
                Ok(Ok(Ok(()))) => return Ok(()),
                Ok(Ok(Err(SyncError::Aborted))) => {
                    debug!(cookie = %path.display(), "cookie aborted, recreating");
                    if Instant::now() >= deadline {
                        return Err(SyncError::Timeout { timeout });
                    }
                }
                Ok(Ok(Err(err))) => return Err(err),
                // The waiter list was dropped wholesale: the root shut down.
                Ok(Err(_)) => return Err(SyncError::RootStopped),
                Err(_) => {
                    self.forget(&path);
                    return Err(SyncError::Timeout { timeout });
                }
            }
        }
    }

    /// Register a waiter, then touch the cookie file. Registration happens
    /// first so a fast watcher cannot observe the cookie before anyone is
    /// listening.
    fn prepare_cookie(&self) -> Result<(PathBuf, oneshot::Receiver<Result<(), SyncError>>), SyncError>
    {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let path = self.cookie_dir.join(format!("{}{}", self.prefix, serial));

        let (tx, rx) = oneshot::channel();
        self.outstanding
            .lock()
            .unwrap()
            .entry(path.clone())
            .or_default()
            .push(tx);

        if let Err(err) = File::create(&path) {
            self.outstanding.lock().unwrap().remove(&path);
            return Err(SyncError::Io(err));
        }

        Ok((path, rx))
    }

    /// Called by the I/O thread when a cookie path comes through the
    /// pending queue. Resolves every waiter for it and unlinks the file.
    pub fn notify_cookie(&self, path: &Path) {
        let waiters = self.outstanding.lock().unwrap().remove(path);
        if let Some(waiters) = waiters {
            debug!(cookie = %path.display(), "cookie observed");
            for tx in waiters {
                let _ = tx.send(Ok(()));
            }
        }
        let _ = std::fs::remove_file(path);
    }

    /// Abort every outstanding cookie so clients recreate them. Used after
    /// a recrawl: notifications for the old cookies may have been dropped,
    /// and seeing one mid-crawl would not prove anything anyway.
    pub fn abort_all_cookies(&self) {
        self.fail_outstanding(|| SyncError::Aborted);
    }

    /// Fail every outstanding cookie permanently. Used when the root stops.
    pub fn shutdown(&self) {
        self.fail_outstanding(|| SyncError::RootStopped);
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.lock().unwrap().len()
    }

    fn fail_outstanding(&self, err: impl Fn() -> SyncError) {
        let drained: Vec<_> = self.outstanding.lock().unwrap().drain().collect();
        for (path, waiters) in drained {
            warn!(cookie = %path.display(), "failing outstanding cookie");
            for tx in waiters {
                let _ = tx.send(Err(err()));
            }
            let _ = std::fs::remove_file(&path);
        }
    }

    fn forget(&self, path: &Path) {
        self.outstanding.lock().unwrap().remove(path);
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cookie_prefix_matches_only_direct_children_with_our_prefix() {
        let root = tempfile::tempdir().unwrap();
        let cookies = CookieSync::new(root.path());

        let own = root.path().join(format!(".treewatch-cookie-{}-7", process::id()));
        assert!(cookies.is_cookie_prefix(&own));

        // Foreign process pid prefix.
        assert!(!cookies.is_cookie_prefix(&root.path().join(".treewatch-cookie-0-7")));
        // Nested watch cookie.
        assert!(!cookies.is_cookie_prefix(&root.path().join("sub").join(
            format!(".treewatch-cookie-{}-7", process::id()),
        )));
        // Ordinary file.
        assert!(!cookies.is_cookie_prefix(&root.path().join("README")));
    }

    #[tokio::test]
    async fn observing_the_cookie_resolves_the_sync() {
        let root = tempfile::tempdir().unwrap();
        let cookies = std::sync::Arc::new(CookieSync::new(root.path()));

        let observer = std::sync::Arc::clone(&cookies);
        let root_path = root.path().to_path_buf();
        let echo = tokio::spawn(async move {
            loop {
                for entry in std::fs::read_dir(&root_path).unwrap().flatten() {
                    observer.notify_cookie(&entry.path());
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        cookies.sync_to_now(Duration::from_secs(5)).await.unwrap();
        assert_eq!(cookies.outstanding_count(), 0);
        echo.abort();
    }

    #[tokio::test]
    async fn unobserved_cookie_times_out_and_is_cleaned_up() {
        let root = tempfile::tempdir().unwrap();
        let cookies = CookieSync::new(root.path());

        let err = cookies
            .sync_to_now(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Timeout { .. }));
        assert_eq!(cookies.outstanding_count(), 0);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn abort_makes_the_client_retry_with_a_fresh_cookie() {
        let root = tempfile::tempdir().unwrap();
        let cookies = std::sync::Arc::new(CookieSync::new(root.path()));

        let client = {
            let cookies = std::sync::Arc::clone(&cookies);
            tokio::spawn(async move { cookies.sync_to_now(Duration::from_secs(5)).await })
        };

        // Wait for the first cookie, abort it, then observe the retry.
        while cookies.outstanding_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cookies.abort_all_cookies();

        loop {
            let retried: Vec<_> = std::fs::read_dir(root.path())
                .unwrap()
                .flatten()
                .map(|e| e.path())
                .collect();
            if !retried.is_empty() && cookies.outstanding_count() > 0 {
                for path in retried {
                    cookies.notify_cookie(&path);
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        client.await.unwrap().unwrap();
    }
}
