// src/view/iothread.rs

//! The I/O thread: the full-crawl / poll / settle / recrawl loop.
//!
//! One thread per root owns this loop; nothing else mutates the view. The
//! watcher deposits into the shared queue, the loop steals batches into
//! its thread-private overflow queue and runs them through the crawler or
//! the single-path stat, which may push further entries into the same
//! batch (bounded by tree depth). An empty wait means the root settled.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::sync::{Arc, MutexGuard, RwLockWriteGuard};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, error, info, trace, warn};

use crate::errors::SyncError;
use crate::pending::{PendingChange, PendingChanges, PendingFlags};
use crate::perf::PerfSample;
use crate::root::{RecrawlInfo, Root};
use crate::watch::WatcherCapabilities;

use super::database::ViewDatabase;
use super::statpath::stat_path;
use super::{CrawlState, InMemoryView};

/// Whether the state machine should keep looping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Continue {
    Continue,
    Stop,
}

/// Whether a processed batch carried watcher-desync markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IsDesynced {
    Yes,
    No,
}

/// Thread-private state of the I/O loop.
pub(crate) struct IoThreadState {
    biggest_timeout: Duration,
    current_timeout: Duration,
    local_pending: PendingChanges,
    last_age_out: Option<Instant>,
}

impl IoThreadState {
    pub(crate) fn new(root: &Root) -> Self {
        Self {
            biggest_timeout: biggest_timeout_for(root),
            current_timeout: root.options.trigger_settle,
            local_pending: PendingChanges::default(),
            last_age_out: None,
        }
    }

    #[cfg(test)]
    fn current_timeout(&self) -> Duration {
        self.current_timeout
    }
}

/// The longest the loop will ever sleep: the smallest non-zero of
/// `gc_interval` and `idle_reap_age`, falling back to 24h when both are
/// disabled.
fn biggest_timeout_for(root: &Root) -> Duration {
    let mut biggest = root.options.gc_interval;

    let idle_reap_age = root.options.idle_reap_age;
    if biggest.is_zero() || (!idle_reap_age.is_zero() && idle_reap_age < biggest) {
        biggest = idle_reap_age;
    }
    if biggest.is_zero() {
        biggest = Duration::from_secs(24 * 60 * 60);
    }
    biggest
}

fn log_open_error(path: &Path, operation: &str, err: &io::Error) {
    match err.kind() {
        io::ErrorKind::NotFound => {
            debug!(path = %path.display(), operation, "path is gone");
        }
        io::ErrorKind::PermissionDenied => {
            warn!(
                path = %path.display(),
                operation,
                "permission denied; contents will appear deleted until access is restored"
            );
        }
        _ => {
            warn!(path = %path.display(), operation, error = %err, "directory access failed");
        }
    }
}

impl InMemoryView {
    pub(crate) fn io_thread(&self, root: &Arc<Root>) {
        let mut state = IoThreadState::new(root);
        while let Continue::Continue = self.step_io_thread(root, &mut state) {}
        self.finish(root);
        debug!(root = %self.root_path().display(), "I/O thread exiting");
    }

    fn step_io_thread(&self, root: &Arc<Root>, state: &mut IoThreadState) -> Continue {
        if self.is_stopping() {
            return Continue::Stop;
        }

        if !root.done_initial() {
            // First order of business: find everything under the root.
            self.full_crawl(root, &mut state.local_pending);
            state.current_timeout = root.options.trigger_settle;
        }

        // Wait for the watcher to hand us pending items, or for the settle
        // period to expire.
        let pinged = {
            trace!(
                timeout_ms = state.current_timeout.as_millis() as u64,
                "waiting for pending changes"
            );
            let (mut lock, pinged) = self
                .pending_from_watcher()
                .lock_and_wait(state.current_timeout);
            trace!(pinged, "woke up");
            state
                .local_pending
                .append(lock.steal_items(), lock.steal_syncs());
            pinged
        };

        if self.handle_should_recrawl(root) {
            self.full_crawl(root, &mut state.local_pending);
            state.current_timeout = root.options.trigger_settle;
            return Continue::Continue;
        }

        // The wait timed out with nothing queued: consider the root settled.
        if !pinged && state.local_pending.is_empty() {
            if let Continue::Stop = self.do_settle_things(root, state) {
                return Continue::Stop;
            }
            state.current_timeout = (state.current_timeout * 2).min(state.biggest_timeout);
            return Continue::Continue;
        }

        // We have items to stat and crawl, so we are by definition
        // unsettled; the next wait drops back to the settle period.
        state.current_timeout = root.options.trigger_settle;
        root.mark_unsettled();

        // Some kernels report unlink events before the inode cache is
        // evicted; an optional sleep lets them catch up, at the cost of
        // latency on every sync.
        if !root.options.notify_sleep.is_zero() {
            std::thread::sleep(root.options.notify_sleep);
        }

        let mut view = self.view_lock().write().unwrap();
        debug_assert!(
            root.done_initial(),
            "a full crawl cannot be pending at this point in the loop"
        );
        self.bump_tick();

        let desynced = self.process_all_pending(root, &mut view, &mut state.local_pending);
        drop(view);

        if desynced == IsDesynced::Yes {
            warn!(
                root = %self.root_path().display(),
                "catch-up crawl complete, aborting outstanding cookies"
            );
            root.cookies.abort_all_cookies();
        }

        Continue::Continue
    }

    /// Recursively reconcile the whole tree with disk, then publish
    /// readiness.
    fn full_crawl(&self, root: &Arc<Root>, local_pending: &mut PendingChanges) {
        root.recrawl_info.write().unwrap().crawl_start = Some(Instant::now());

        let mut sample = PerfSample::new("full-crawl");

        {
            let mut view = self.view_lock().write().unwrap();
            // A new, distinct tick: a subscription established right after
            // the watch begins must not observe an empty view forever.
            self.bump_tick();

            self.pending_from_watcher()
                .add(self.root_path(), SystemTime::now(), PendingFlags::RECURSIVE);

            // Coalescing means the outstanding set must be consumed before
            // new watcher input merges in, or changes landing mid-crawl can
            // hide behind the already-queued recursive entry. Hence two
            // levels: the outer loop sweeps in watcher data, the inner one
            // processes it plus whatever recursion picks up.
            loop {
                {
                    let mut lock = self.pending_from_watcher().lock();
                    local_pending.append(lock.steal_items(), lock.steal_syncs());
                }
                if local_pending.is_empty() {
                    break;
                }
                let _ = self.process_all_pending(root, &mut view, local_pending);
            }
        }

        let recrawl_count = {
            let (mut info, mut crawl) = self.locked_pair(root);
            info.should_recrawl = false;
            info.crawl_finish = Some(Instant::now());
            if let Some(promise) = crawl.promise.take() {
                let _ = promise.send(true);
                crawl.future = None;
            }
            root.set_done_initial(true);
            info.recrawl_count
        };
        // Guards are released: aborting cookies resolves client futures.
        root.cookies.abort_all_cookies();

        sample.add_meta("root", self.root_path().display().to_string());
        sample.add_meta("recrawl_count", recrawl_count.to_string());
        sample.finish();
        sample.force_log();
        sample.log();

        if recrawl_count > 0 {
            info!(root = %self.root_path().display(), recrawl_count, "recrawl complete");
        } else {
            info!(root = %self.root_path().display(), "crawl complete");
        }
    }

    /// One-shot full crawl for non-daemon use. Emits no settle
    /// notification.
    pub fn client_mode_crawl(&self, root: &Arc<Root>) {
        let mut pending = PendingChanges::default();
        self.full_crawl(root, &mut pending);
    }

    /// The empty-wait branch: broadcast the settle, then housekeeping.
    fn do_settle_things(&self, root: &Arc<Root>, state: &mut IoThreadState) -> Continue {
        if !root.done_initial() {
            // A recrawl is wanted; the next iteration performs it.
            return Continue::Continue;
        }

        debug!(root = %self.root_path().display(), "settled");
        root.broadcast_settled();

        if root.consider_reap() {
            info!(
                root = %self.root_path().display(),
                idle_reap_age_s = root.options.idle_reap_age.as_secs(),
                "root was not used within idle_reap_age, stopping watch"
            );
            return Continue::Stop;
        }

        self.consider_age_out(root, state);
        Continue::Continue
    }

    fn consider_age_out(&self, root: &Arc<Root>, state: &mut IoThreadState) {
        let interval = root.options.gc_interval;
        if interval.is_zero() {
            return;
        }
        if let Some(last) = state.last_age_out {
            if last.elapsed() < interval {
                return;
            }
        }
        state.last_age_out = Some(Instant::now());

        let mut view = self.view_lock().write().unwrap();
        let removed = view.age_out(root.options.gc_age, SystemTime::now());
        if removed > 0 {
            info!(root = %self.root_path().display(), removed, "aged out deleted nodes");
        }
    }

    /// Reads `should_recrawl`; when set, charges the recrawl counter and
    /// clears `done_initial` so the step loop re-runs the full crawl.
    /// A cancelled root skips the bookkeeping but still reports true.
    fn handle_should_recrawl(&self, root: &Arc<Root>) -> bool {
        {
            let info = root.recrawl_info.read().unwrap();
            if !info.should_recrawl {
                return false;
            }
        }

        if !root.cancelled() {
            let mut info = root.recrawl_info.write().unwrap();
            info.recrawl_count += 1;
            if let Some(reason) = info.reason.take() {
                warn!(
                    root = %self.root_path().display(),
                    reason,
                    "tree inconsistency, recrawling"
                );
            }
            root.set_done_initial(false);
        }

        true
    }

    /// A future satisfied once `done_initial` holds with no recrawl
    /// pending. Concurrent callers share one resolution.
    pub async fn wait_until_ready_to_query(&self, root: &Arc<Root>) -> Result<(), SyncError> {
        root.touch_client_activity();

        let receiver = {
            let (info, mut crawl) = self.locked_pair(root);

            if let Some(future) = &crawl.future {
                Some(future.clone())
            } else if root.done_initial() && !info.should_recrawl {
                None
            } else {
                let (promise, future) = tokio::sync::watch::channel(false);
                crawl.promise = Some(promise);
                crawl.future = Some(future.clone());
                Some(future)
            }
        };

        match receiver {
            None => Ok(()),
            Some(mut rx) => rx
                .wait_for(|ready| *ready)
                .await
                .map(|_| ())
                .map_err(|_| SyncError::RootStopped),
        }
    }

    /// Acquire the recrawl-info and crawl-state locks, always in this
    /// order. Callers must drop both guards before resolving anything a
    /// client may be waiting on.
    fn locked_pair<'a>(
        &'a self,
        root: &'a Root,
    ) -> (
        RwLockWriteGuard<'a, RecrawlInfo>,
        MutexGuard<'a, CrawlState>,
    ) {
        let info = root.recrawl_info.write().unwrap();
        let crawl = self.crawl_state.lock().unwrap();
        (info, crawl)
    }

    /// Terminal cleanup: nothing a client awaits may be left dangling.
    fn finish(&self, root: &Arc<Root>) {
        root.cancel();
        self.watcher().stop_watch(root.path());
        {
            let (_info_guard, mut crawl) = self.locked_pair(root);
            // Dropping the promise wakes ready-waiters with RootStopped.
            crawl.promise = None;
            crawl.future = None;
        }
        root.cookies.shutdown();
    }

    /// Drain `coll` to empty, routing every item through [`Self::process_path`].
    /// Sync barriers are resolved only after the recursive processing of
    /// the pass has completed.
    fn process_all_pending(
        &self,
        root: &Arc<Root>,
        view: &mut ViewDatabase,
        coll: &mut PendingChanges,
    ) -> IsDesynced {
        let mut desync_state = IsDesynced::No;
        let mut deferred_syncs = Vec::new();

        while !coll.is_empty() {
            debug!(
                events = coll.item_count(),
                root = %self.root_path().display(),
                "processing pending batch"
            );

            let mut items = coll.steal_items();
            deferred_syncs.extend(coll.steal_syncs());

            // A flat loop that transfers ownership as it advances; when a
            // stop is requested we keep walking so the remainder drains
            // without doing work.
            while let Some(pending) = items.pop_front() {
                if self.is_stopping() {
                    continue;
                }

                if pending.flags.contains(PendingFlags::IS_DESYNCED)
                    && pending.flags.contains(PendingFlags::CRAWL_ONLY)
                {
                    // Cookies seen during the catch-up crawl prove nothing
                    // (their notifications may also simply have been
                    // dropped); the pass ends by aborting them so clients
                    // recreate them.
                    desync_state = IsDesynced::Yes;
                }

                // process_path may push new items into `coll`; the outer
                // loop picks them up.
                self.process_path(root, view, coll, &pending, None);
            }
        }

        for sync in deferred_syncs {
            let _ = sync.send(());
        }

        desync_state
    }

    /// Route one pending item: cookie handling, then crawl vs stat.
    fn process_path(
        &self,
        root: &Arc<Root>,
        view: &mut ViewDatabase,
        coll: &mut PendingChanges,
        pending: &PendingChange,
        pre_stat: Option<&crate::watch::DirEntry>,
    ) {
        debug_assert!(
            pending.path.starts_with(self.root_path()),
            "processed paths must lie within the watched root"
        );

        // Four kinds of cookie can come through here: ours, a sibling
        // sync's on this watch, another process's, and a nested watch's.
        // The prefix check matches the first two; those never enter the
        // view and only count as sync evidence when their arrival proves
        // the watcher has drained up to them.
        if root.cookies.is_cookie_prefix(&pending.path) {
            let consider_cookie = if self
                .watcher()
                .capabilities()
                .contains(WatcherCapabilities::PER_FILE_NOTIFICATIONS)
            {
                pending.flags.contains(PendingFlags::VIA_NOTIFY) || !root.done_initial()
            } else {
                !pending.flags.contains(PendingFlags::IS_DESYNCED)
            };

            if consider_cookie {
                root.cookies.notify_cookie(&pending.path);
            }
            return;
        }

        if pending.path == self.root_path() || pending.flags.contains(PendingFlags::CRAWL_ONLY) {
            self.crawler(root, view, coll, pending);
        } else {
            stat_path(self, view, coll, pending, pre_stat);
        }
    }

    /// Read one directory, reconcile its children against the view, and
    /// enqueue follow-up work.
    fn crawler(
        &self,
        root: &Arc<Root>,
        view: &mut ViewDatabase,
        coll: &mut PendingChanges,
        pending: &PendingChange,
    ) {
        let mut recursive = pending.flags.contains(PendingFlags::RECURSIVE);

        let caps = self.watcher().capabilities();
        let stat_all = if caps.contains(WatcherCapabilities::PER_FILE_NOTIFICATIONS) {
            caps.contains(WatcherCapabilities::COALESCED_RENAME)
        } else {
            // Without per-file notifications we track files individually
            // and get explicit updates for them, so a crawl only stats
            // everything when the watcher itself added this directory.
            pending.flags.contains(PendingFlags::NONRECURSIVE_SCAN)
        };

        let tick = self.most_recent_tick();

        if view.resolve_dir(&pending.path, true, tick).is_none() {
            return;
        }

        // Root replacement detection. Some filesystems never emit events
        // for things like subvolume deletes; if the root inode changed
        // underneath us unnoticed, the cookie mechanism would be broken
        // forever. The root never has a file node, so the inode check for
        // it lives here rather than in the stat path.
        if pending.path == self.root_path() {
            match self.fs().file_info(&pending.path) {
                Ok(st) => {
                    let root_inode = self.root_inode();
                    if st.ino != root_inode {
                        if root_inode != 0 {
                            root.schedule_recrawl(
                                "root was replaced and we didn't get notified by the kernel",
                            );
                            return;
                        }
                        // First observation of the root.
                        recursive = true;
                        self.set_root_inode(st.ino);
                    }
                }
                Err(err) => {
                    log_open_error(&pending.path, "stat", &err);
                    view.mark_dir_deleted(&pending.path, tick, pending.now, true);
                    return;
                }
            }
        }

        debug!(
            path = %pending.path.display(),
            recursive,
            stat_all,
            "opening directory for crawl"
        );

        let mut handle = match self.watcher().start_watch_dir(&pending.path) {
            Ok(handle) => handle,
            Err(err) => {
                log_open_error(&pending.path, "opendir", &err);
                view.mark_dir_deleted(&pending.path, tick, pending.now, true);
                return;
            }
        };

        {
            let Some(dir) = view.resolve_dir(&pending.path, true, tick) else {
                return;
            };
            dir.note_crawled(tick);
            if dir.files.is_empty() {
                // st_nlink is usually subdir count plus two.
                let num_dirs = handle
                    .nlink_hint()
                    .map(|n| n.saturating_sub(2) as usize)
                    .unwrap_or(0);
                dir.reserve_hint(num_dirs, root.options.hint_num_files_per_dir);
            }
            // Delete detection: anything not seen again below stays
            // flagged.
            for file in dir.files.values_mut() {
                if file.exists {
                    file.maybe_deleted = true;
                }
            }
        }

        loop {
            let entry = match handle.read_dir_entry() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    error!(
                        path = %pending.path.display(),
                        error = %err,
                        "error while reading dir, re-adding to pending to re-assess"
                    );
                    coll.add(&pending.path, pending.now, PendingFlags::empty());
                    break;
                }
            };

            if entry.name == OsStr::new(".") || entry.name == OsStr::new("..") {
                continue;
            }

            let (known_existing, full_path) = {
                let Some(dir) = view.resolve_dir(&pending.path, true, tick) else {
                    break;
                };
                let known = match dir.files.get_mut(&entry.name) {
                    Some(file) => {
                        file.maybe_deleted = false;
                        file.exists
                    }
                    None => false,
                };
                (known, dir.full_path_to_child(&entry.name))
            };

            // Analyse the child when it is newly existing, or when this
            // crawl wants everything looked at.
            if !known_existing || stat_all || recursive {
                let mut new_flags = PendingFlags::empty();
                if recursive || !known_existing {
                    new_flags |= PendingFlags::RECURSIVE;
                }
                if pending.flags.contains(PendingFlags::IS_DESYNCED) {
                    new_flags |= PendingFlags::IS_DESYNCED;
                }

                trace!(
                    path = %full_path.display(),
                    flags = ?new_flags,
                    "crawler examining child"
                );
                let child = PendingChange {
                    path: full_path,
                    now: pending.now,
                    flags: new_flags,
                };
                self.process_path(root, view, coll, &child, Some(&entry));
            }
        }

        // Release the directory handle before post-processing.
        drop(handle);

        // Anything still flagged was not seen on disk, so it is deleted;
        // re-process it shortly. Existing subdirectories are re-queued
        // when crawling recursively.
        if let Some(dir) = view.dir_ref(&pending.path) {
            let flags = if recursive {
                PendingFlags::RECURSIVE
            } else {
                PendingFlags::empty()
            };
            let requeue: Vec<_> = dir
                .files
                .values()
                .filter(|file| {
                    file.exists && (file.maybe_deleted || (file.is_dir_entry() && recursive))
                })
                .map(|file| dir.full_path_to_child(file.name()))
                .collect();
            for path in requeue {
                coll.add(&path, pending.now, flags);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RootOptions;
    use crate::fs::RealFileSystem;
    use crate::pending::PendingCollection;
    use crate::root::RootEvent;
    use crate::watch::{DirHandle, OsDirHandle, Watcher, WatcherCapabilities};

    #[derive(Debug, Default)]
    struct StubWatcher;

    impl Watcher for StubWatcher {
        fn capabilities(&self) -> WatcherCapabilities {
            WatcherCapabilities::PER_FILE_NOTIFICATIONS
        }

        fn start_watch_dir(&self, path: &Path) -> io::Result<Box<dyn DirHandle>> {
            Ok(Box::new(OsDirHandle::open(path)?))
        }

        fn stop_watch(&self, _root: &Path) {}
    }

    fn test_options(trigger_ms: u64, gc_interval_ms: u64) -> RootOptions {
        RootOptions {
            trigger_settle: Duration::from_millis(trigger_ms),
            notify_sleep: Duration::ZERO,
            hint_num_files_per_dir: 4,
            gc_interval: Duration::from_millis(gc_interval_ms),
            gc_age: Duration::from_secs(3600),
            idle_reap_age: Duration::ZERO,
        }
    }

    fn harness(options: RootOptions) -> (tempfile::TempDir, Arc<Root>, Arc<InMemoryView>) {
        let dir = tempfile::tempdir().unwrap();
        let root_path = dir.path().canonicalize().unwrap();
        let root = Root::new(root_path.clone(), options);
        let view = InMemoryView::new(
            root_path,
            Arc::new(RealFileSystem),
            Arc::new(StubWatcher),
            Arc::new(PendingCollection::new()),
        );
        (dir, root, view)
    }

    #[test]
    fn first_step_crawls_and_following_idle_steps_double_the_timeout() {
        let (dir, root, view) = harness(test_options(1, 16));
        std::fs::write(dir.path().join("a"), b"a").unwrap();

        let mut state = IoThreadState::new(&root);

        // Step 1: full crawl, then the 1ms wait times out and we settle.
        assert_eq!(view.step_io_thread(&root, &mut state), Continue::Continue);
        assert!(root.done_initial());
        assert!(view.read_view(|db| db
            .file_ref(&root.path().join("a"))
            .is_some_and(|f| f.exists)));
        assert_eq!(state.current_timeout(), Duration::from_millis(2));

        // Idle steps keep doubling, capped at the biggest timeout.
        assert_eq!(view.step_io_thread(&root, &mut state), Continue::Continue);
        assert_eq!(state.current_timeout(), Duration::from_millis(4));
        assert_eq!(view.step_io_thread(&root, &mut state), Continue::Continue);
        assert_eq!(state.current_timeout(), Duration::from_millis(8));
        assert_eq!(view.step_io_thread(&root, &mut state), Continue::Continue);
        assert_eq!(state.current_timeout(), Duration::from_millis(16));
        assert_eq!(view.step_io_thread(&root, &mut state), Continue::Continue);
        assert_eq!(state.current_timeout(), Duration::from_millis(16));
    }

    #[test]
    fn a_new_event_resets_the_timeout_and_advances_the_tick() {
        let (dir, root, view) = harness(test_options(1, 1000));
        let file = dir.path().canonicalize().unwrap().join("a");
        std::fs::write(&file, b"one").unwrap();

        let mut state = IoThreadState::new(&root);
        view.step_io_thread(&root, &mut state); // crawl + settle
        view.step_io_thread(&root, &mut state); // idle, timeout doubles
        let tick_before = view.most_recent_tick();
        assert!(state.current_timeout() > root.options.trigger_settle);

        std::fs::write(&file, b"two longer").unwrap();
        view.pending_from_watcher()
            .add(&file, SystemTime::now(), PendingFlags::VIA_NOTIFY);

        view.step_io_thread(&root, &mut state);
        assert_eq!(state.current_timeout(), root.options.trigger_settle);
        assert!(view.most_recent_tick() > tick_before);
        let (otime, size) = view.read_view(|db| {
            let f = db.file_ref(&file).unwrap();
            (f.otime, f.stat.unwrap().size)
        });
        assert_eq!(otime, view.most_recent_tick());
        assert_eq!(size, b"two longer".len() as u64);
    }

    #[test]
    fn settle_is_broadcast_once_per_idle_wait() {
        let (_dir, root, view) = harness(test_options(1, 1000));
        let mut rx = root.subscribe();

        let mut state = IoThreadState::new(&root);
        view.step_io_thread(&root, &mut state);

        assert_eq!(rx.try_recv().unwrap(), RootEvent::Settled);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn scheduled_recrawl_charges_the_counter_and_recrawls() {
        let (dir, root, view) = harness(test_options(1, 1000));
        let mut state = IoThreadState::new(&root);
        view.step_io_thread(&root, &mut state);
        assert_eq!(root.recrawl_count(), 0);

        // A file that appeared without any notification: only the recrawl
        // can find it.
        std::fs::write(dir.path().join("found-by-recrawl"), b"x").unwrap();
        root.schedule_recrawl("test requested");
        view.pending_from_watcher().ping();

        view.step_io_thread(&root, &mut state);
        assert_eq!(root.recrawl_count(), 1);
        assert!(root.done_initial());
        assert!(!root.should_recrawl());
        assert!(view.read_view(|db| db
            .file_ref(&root.path().join("found-by-recrawl"))
            .is_some_and(|f| f.exists)));
    }

    #[test]
    fn desynced_crawl_aborts_outstanding_cookies() {
        let (_dir, root, view) = harness(test_options(1, 1000));
        let mut state = IoThreadState::new(&root);
        view.step_io_thread(&root, &mut state);

        // Register a cookie but never observe it.
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let pending_sync = {
            let root = Arc::clone(&root);
            rt.spawn(async move { root.cookies.sync_to_now(Duration::from_secs(30)).await })
        };
        rt.block_on(async {
            while root.cookies.outstanding_count() == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        view.pending_from_watcher().add(
            root.path(),
            SystemTime::now(),
            PendingFlags::IS_DESYNCED | PendingFlags::CRAWL_ONLY | PendingFlags::RECURSIVE,
        );
        view.step_io_thread(&root, &mut state);

        // The original cookie was aborted; the client retried and now has
        // a fresh one outstanding.
        rt.block_on(async {
            tokio::time::timeout(Duration::from_secs(5), async {
                while root.cookies.outstanding_count() == 0 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
            .await
            .unwrap();
        });
        assert!(!pending_sync.is_finished());
        pending_sync.abort();
    }

    #[test]
    fn stop_request_terminates_the_loop() {
        let (_dir, root, view) = harness(test_options(1, 1000));
        let mut state = IoThreadState::new(&root);
        view.step_io_thread(&root, &mut state);

        view.request_stop();
        assert_eq!(view.step_io_thread(&root, &mut state), Continue::Stop);
    }

    #[test]
    fn biggest_timeout_prefers_the_smallest_enabled_limit() {
        let mut options = test_options(1, 0);
        options.idle_reap_age = Duration::from_secs(5);
        let (_dir, root, _view) = harness(options);
        assert_eq!(biggest_timeout_for(&root), Duration::from_secs(5));

        let (_dir2, root2, _view2) = harness(test_options(1, 0));
        assert_eq!(
            biggest_timeout_for(&root2),
            Duration::from_secs(24 * 60 * 60)
        );
    }
}
