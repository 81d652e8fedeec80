#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use treewatch::config::RootOptions;
use treewatch::fs::RealFileSystem;
use treewatch::pending::{PendingCollection, PendingFlags};
use treewatch::watch::{DirHandle, OsDirHandle, Watcher, WatcherCapabilities};
use treewatch::WatchService;

/// Watcher for tests: never produces events on its own. Tests play the
/// watcher thread by pushing paths into the shared queue themselves.
#[derive(Debug, Default)]
pub struct StubWatcher;

impl Watcher for StubWatcher {
    fn capabilities(&self) -> WatcherCapabilities {
        WatcherCapabilities::PER_FILE_NOTIFICATIONS
    }

    fn start_watch_dir(&self, path: &Path) -> io::Result<Box<dyn DirHandle>> {
        Ok(Box::new(OsDirHandle::open(path)?))
    }

    fn stop_watch(&self, _root: &Path) {}
}

/// Tight timers so tests settle quickly; reaping disabled so an idle test
/// never loses its root.
pub fn fast_options() -> RootOptions {
    RootOptions {
        trigger_settle: Duration::from_millis(10),
        notify_sleep: Duration::ZERO,
        hint_num_files_per_dir: 8,
        gc_interval: Duration::from_secs(3600),
        gc_age: Duration::from_secs(3600),
        idle_reap_age: Duration::ZERO,
    }
}

pub fn start_service(root: &Path) -> WatchService {
    let pending = Arc::new(PendingCollection::new());
    WatchService::start(
        root,
        fast_options(),
        Arc::new(RealFileSystem),
        Arc::new(StubWatcher),
        pending,
    )
    .expect("starting watch service")
}

/// Push a raw watcher-style notification for `path`.
pub fn notify_path(service: &WatchService, path: &Path) {
    service
        .view()
        .pending_from_watcher()
        .add(path, SystemTime::now(), PendingFlags::VIA_NOTIFY);
}

/// Poll until `predicate` holds. Panics after `timeout`.
pub async fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration, what: &str) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !predicate() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Play the watcher's part of the cookie protocol: report any cookie file
/// appearing under the root back into the queue, like a kernel
/// notification would.
pub fn spawn_cookie_echo(service: &WatchService) -> tokio::task::JoinHandle<()> {
    let pending = Arc::clone(service.view().pending_from_watcher());
    let root = service.root().path().to_path_buf();

    tokio::spawn(async move {
        loop {
            if let Ok(entries) = std::fs::read_dir(&root) {
                for entry in entries.flatten() {
                    let name = entry.file_name();
                    if name.to_string_lossy().starts_with(".treewatch-cookie-") {
                        pending.add(&entry.path(), SystemTime::now(), PendingFlags::VIA_NOTIFY);
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
}
