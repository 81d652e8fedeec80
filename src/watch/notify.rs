// src/watch/notify.rs

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::Result;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use tracing::info;

use crate::pending::{PendingCollection, PendingFlags};
use crate::watch::watcher::{DirHandle, OsDirHandle, Watcher, WatcherCapabilities};

/// Production watcher backed by the `notify` crate.
///
/// A single recursive watch on the root covers every subdirectory, so the
/// per-directory `start_watch_dir` step reduces to opening the directory.
/// The notify callback runs on notify's own thread, which makes it the
/// producer side of the shared pending queue.
pub struct NotifyWatcher {
    inner: Mutex<RecommendedWatcher>,
}

impl std::fmt::Debug for NotifyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyWatcher").finish()
    }
}

impl NotifyWatcher {
    /// Start watching `root` recursively, depositing raw change paths into
    /// `pending`.
    pub fn spawn(root: &Path, pending: Arc<PendingCollection>) -> Result<Self> {
        let root = root.to_path_buf();
        let callback_root = root.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                handle_notify_event(&callback_root, &pending, res);
            },
            Config::default(),
        )?;

        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!(root = %root.display(), "filesystem watcher started");

        Ok(Self {
            inner: Mutex::new(watcher),
        })
    }
}

fn handle_notify_event(
    root: &PathBuf,
    pending: &PendingCollection,
    res: notify::Result<Event>,
) {
    let now = SystemTime::now();
    match res {
        Ok(event) => {
            if event.need_rescan() {
                // The kernel queue overflowed; everything must be re-walked.
                pending.add(
                    root,
                    now,
                    PendingFlags::IS_DESYNCED | PendingFlags::CRAWL_ONLY | PendingFlags::RECURSIVE,
                );
                return;
            }
            for path in &event.paths {
                pending.add(path, now, PendingFlags::VIA_NOTIFY);
            }
        }
        Err(_) => {
            // We cannot tell what was lost; request a catch-up crawl.
            pending.add(
                root,
                now,
                PendingFlags::IS_DESYNCED | PendingFlags::CRAWL_ONLY | PendingFlags::RECURSIVE,
            );
        }
    }
}

impl Watcher for NotifyWatcher {
    fn capabilities(&self) -> WatcherCapabilities {
        // inotify-style backends report per-file paths; renames arrive as
        // separate from/to events.
        WatcherCapabilities::PER_FILE_NOTIFICATIONS
    }

    fn start_watch_dir(&self, path: &Path) -> io::Result<Box<dyn DirHandle>> {
        Ok(Box::new(OsDirHandle::open(path)?))
    }

    fn stop_watch(&self, root: &Path) {
        let _ = self.inner.lock().unwrap().unwatch(root);
    }
}
