// src/pending.rs

//! The pending-change queue shared between the watcher and the I/O thread.
//!
//! The watcher thread deposits raw change records here; the I/O thread
//! steals them in batches. Adds coalesce: a queued recursive entry covers
//! all of its descendants, and a new recursive entry subsumes any queued
//! descendants. The queue also carries sync barriers, resolved by the I/O
//! thread once the batch they were enqueued with has been fully processed.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use bitflags::bitflags;
use tokio::sync::oneshot;
use tracing::trace;

bitflags! {
    /// Flags carried by a [`PendingChange`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PendingFlags: u8 {
        /// Process descendants of this path too.
        const RECURSIVE = 1 << 0;
        /// Originated from the watcher, not from recursive crawling.
        const VIA_NOTIFY = 1 << 1;
        /// Treat as a directory crawl request; do not stat the path itself.
        const CRAWL_ONLY = 1 << 2;
        /// Directory freshly added by the watcher: stat its immediate
        /// children even on watchers that get per-file notifications.
        const NONRECURSIVE_SCAN = 1 << 3;
        /// The watcher declared loss of notifications and a catch-up crawl
        /// is in progress.
        const IS_DESYNCED = 1 << 4;
    }
}

/// One queued change observation.
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub path: PathBuf,
    /// Wall-clock time at which the change was observed.
    pub now: SystemTime,
    pub flags: PendingFlags,
}

/// A coalescing batch of pending changes plus sync barriers.
///
/// Also used thread-privately by the I/O thread as its overflow queue, in
/// which case no locking is involved.
#[derive(Debug, Default)]
pub struct PendingChanges {
    items: VecDeque<PendingChange>,
    syncs: Vec<oneshot::Sender<()>>,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.syncs.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Queue a change, coalescing against what is already pending:
    ///
    /// - an entry for the same path merges its flags into the existing one;
    /// - a descendant of a queued `RECURSIVE` entry is dropped, the crawl
    ///   will visit it anyway;
    /// - a new `RECURSIVE` entry subsumes queued descendants.
    pub fn add(&mut self, path: &Path, now: SystemTime, flags: PendingFlags) {
        // An already-queued recursive ancestor covers this path entirely.
        if self
            .items
            .iter()
            .any(|e| e.flags.contains(PendingFlags::RECURSIVE) && path != e.path && path.starts_with(&e.path))
        {
            trace!(path = %path.display(), "pending change covered by queued recursive entry");
            return;
        }

        // A recursive entry subsumes any queued descendants.
        if flags.contains(PendingFlags::RECURSIVE) {
            self.items
                .retain(|e| e.path == path || !e.path.starts_with(path));
        }

        if let Some(existing) = self.items.iter_mut().find(|e| e.path == path) {
            existing.flags |= flags;
            return;
        }

        self.items.push_back(PendingChange {
            path: path.to_path_buf(),
            now,
            flags,
        });
    }

    /// Enqueue a sync barrier. The returned receiver resolves once every
    /// item queued before the barrier has been processed into the view.
    pub fn add_sync(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.syncs.push(tx);
        rx
    }

    /// Take every queued item, in arrival order, leaving the queue empty.
    pub fn steal_items(&mut self) -> VecDeque<PendingChange> {
        std::mem::take(&mut self.items)
    }

    /// Take every queued sync barrier.
    pub fn steal_syncs(&mut self) -> Vec<oneshot::Sender<()>> {
        std::mem::take(&mut self.syncs)
    }

    /// Concatenate stolen items and syncs onto this batch, order preserved.
    /// No coalescing happens here; the entries were already coalesced when
    /// first added.
    pub fn append(&mut self, items: VecDeque<PendingChange>, syncs: Vec<oneshot::Sender<()>>) {
        self.items.extend(items);
        self.syncs.extend(syncs);
    }
}

#[derive(Debug, Default)]
struct Shared {
    changes: PendingChanges,
    pinged: bool,
}

/// Locked access to the shared queue. Obtained from
/// [`PendingCollection::lock`] or [`PendingCollection::lock_and_wait`].
pub struct PendingLock<'a> {
    guard: MutexGuard<'a, Shared>,
}

impl PendingLock<'_> {
    pub fn is_empty(&self) -> bool {
        self.guard.changes.is_empty()
    }

    pub fn add(&mut self, path: &Path, now: SystemTime, flags: PendingFlags) {
        self.guard.changes.add(path, now, flags);
    }

    pub fn steal_items(&mut self) -> VecDeque<PendingChange> {
        self.guard.changes.steal_items()
    }

    pub fn steal_syncs(&mut self) -> Vec<oneshot::Sender<()>> {
        self.guard.changes.steal_syncs()
    }
}

/// The queue shared between the watcher thread (producer) and the I/O
/// thread (consumer), serialized by a mutex with a condition variable.
#[derive(Debug, Default)]
pub struct PendingCollection {
    shared: Mutex<Shared>,
    cond: Condvar,
}

impl PendingCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> PendingLock<'_> {
        PendingLock {
            guard: self.shared.lock().unwrap(),
        }
    }

    /// Queue a change and wake the consumer.
    pub fn add(&self, path: &Path, now: SystemTime, flags: PendingFlags) {
        self.shared.lock().unwrap().changes.add(path, now, flags);
        self.cond.notify_one();
    }

    /// Enqueue a sync barrier and wake the consumer.
    pub fn add_sync(&self) -> oneshot::Receiver<()> {
        let rx = self.shared.lock().unwrap().changes.add_sync();
        self.cond.notify_one();
        rx
    }

    /// Wake the consumer without queueing anything.
    pub fn ping(&self) {
        self.shared.lock().unwrap().pinged = true;
        self.cond.notify_one();
    }

    /// Block until the queue is non-empty, a sync barrier is enqueued, a
    /// ping arrives, or `timeout` expires. The boolean distinguishes a wake
    /// (`true`) from a timeout with nothing queued (`false`).
    pub fn lock_and_wait(&self, timeout: Duration) -> (PendingLock<'_>, bool) {
        let guard = self.shared.lock().unwrap();

        let (mut guard, woken) = if guard.changes.is_empty() && !guard.pinged {
            let (guard, result) = self
                .cond
                .wait_timeout_while(guard, timeout, |shared| {
                    shared.changes.is_empty() && !shared.pinged
                })
                .unwrap();
            (guard, !result.timed_out())
        } else {
            (guard, true)
        };

        guard.pinged = false;
        (PendingLock { guard }, woken)
    }
}
