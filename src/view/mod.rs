// src/view/mod.rs

//! The in-memory view subsystem.
//!
//! [`InMemoryView`] owns the mirrored tree, the queue shared with the
//! watcher, and the crawl state. All mutation happens on the I/O thread;
//! client threads observe atomic flags and interact through promises.
//!
//! Three clocks meet here and must not be confused:
//! - wall-clock timestamps from file stats,
//! - monotonic timers driving settle detection,
//! - the logical tick clock stamped on every view mutation.

pub mod database;
mod iothread;
mod statpath;

pub use database::{DirNode, FileNode, ViewDatabase};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use tokio::sync::watch;
use tracing::debug;

use crate::errors::SyncError;
use crate::fs::FileSystem;
use crate::pending::PendingCollection;
use crate::root::Root;
use crate::watch::Watcher;

/// The lazily created "ready to query" promise. `promise` fires once when
/// the initial (or re-) crawl completes; `future` is the shared handle
/// additional waiters clone.
#[derive(Debug, Default)]
pub(crate) struct CrawlState {
    pub(crate) promise: Option<watch::Sender<bool>>,
    pub(crate) future: Option<watch::Receiver<bool>>,
}

/// In-memory mirror of one watched root, plus the machinery that keeps it
/// reconciled with kernel notifications.
pub struct InMemoryView {
    root_path: PathBuf,
    fs: Arc<dyn FileSystem>,
    watcher: Arc<dyn Watcher>,

    /// Queue the watcher produces into; the I/O thread is the consumer.
    pending_from_watcher: Arc<PendingCollection>,

    /// The mirrored tree. Write-held for a full crawl pass or one batch
    /// step.
    view: RwLock<ViewDatabase>,

    pub(crate) crawl_state: Mutex<CrawlState>,

    /// Logical clock: incremented at the start of every crawl pass and
    /// every post-wait processing pass. Never decreases.
    most_recent_tick: AtomicU64,

    /// Inode the root was last observed at; 0 before the first crawl.
    root_inode: AtomicU64,

    stop_threads: AtomicBool,
}

impl std::fmt::Debug for InMemoryView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryView")
            .field("root_path", &self.root_path)
            .field("tick", &self.most_recent_tick())
            .finish_non_exhaustive()
    }
}

impl InMemoryView {
    pub fn new(
        root_path: PathBuf,
        fs: Arc<dyn FileSystem>,
        watcher: Arc<dyn Watcher>,
        pending_from_watcher: Arc<PendingCollection>,
    ) -> Arc<Self> {
        Arc::new(Self {
            view: RwLock::new(ViewDatabase::new(root_path.clone())),
            root_path,
            fs,
            watcher,
            pending_from_watcher,
            crawl_state: Mutex::new(CrawlState::default()),
            most_recent_tick: AtomicU64::new(1),
            root_inode: AtomicU64::new(0),
            stop_threads: AtomicBool::new(false),
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub(crate) fn fs(&self) -> &dyn FileSystem {
        &*self.fs
    }

    pub(crate) fn watcher(&self) -> &dyn Watcher {
        &*self.watcher
    }

    /// The queue the watcher deposits raw change records into.
    pub fn pending_from_watcher(&self) -> &Arc<PendingCollection> {
        &self.pending_from_watcher
    }

    pub fn most_recent_tick(&self) -> u64 {
        self.most_recent_tick.load(Ordering::Acquire)
    }

    pub(crate) fn bump_tick(&self) -> u64 {
        self.most_recent_tick.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn root_inode(&self) -> u64 {
        self.root_inode.load(Ordering::Acquire)
    }

    pub(crate) fn set_root_inode(&self, ino: u64) {
        self.root_inode.store(ino, Ordering::Release);
    }

    /// Run `f` against the current view under the read lock. This is the
    /// observation surface a query engine builds on.
    pub fn read_view<R>(&self, f: impl FnOnce(&ViewDatabase) -> R) -> R {
        f(&self.view.read().unwrap())
    }

    /// Wait until everything currently in the shared queue has been
    /// processed into the view. Unlike a cookie sync this proves nothing
    /// about what the kernel has delivered; it only flushes what already
    /// arrived.
    pub async fn flush_pending(&self, timeout: std::time::Duration) -> Result<(), SyncError> {
        let rx = self.pending_from_watcher.add_sync();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SyncError::RootStopped),
            Err(_) => Err(SyncError::Timeout { timeout }),
        }
    }

    pub(crate) fn view_lock(&self) -> &RwLock<ViewDatabase> {
        &self.view
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stop_threads.load(Ordering::Acquire)
    }

    /// Request cooperative termination of the I/O thread. The queue is
    /// pinged so a waiter wakes immediately.
    pub fn request_stop(&self) {
        self.stop_threads.store(true, Ordering::Release);
        self.pending_from_watcher.ping();
    }

    /// Spawn the I/O thread for `root`.
    pub fn spawn_io_thread(self: &Arc<Self>, root: &Arc<Root>) -> thread::JoinHandle<()> {
        let view = Arc::clone(self);
        let root = Arc::clone(root);
        thread::spawn(move || {
            debug!(root = %root.path().display(), "I/O thread started");
            view.io_thread(&root);
        })
    }
}
