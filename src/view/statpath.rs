// src/view/statpath.rs

//! Single-path stat and view reconciliation.

use std::io;
use std::path::Path;

use tracing::{debug, trace, warn};

use crate::fs::FileInfo;
use crate::pending::{PendingChange, PendingChanges, PendingFlags};
use crate::watch::DirEntry;

use super::database::{FileNode, ViewDatabase};
use super::InMemoryView;

/// Stat one path and reconcile the view with what is on disk. May enqueue
/// follow-up work (directory crawls, parent resurrection) onto `coll`.
///
/// `pre_stat` is the directory entry the crawler just read for this path,
/// if that is where the request came from.
pub(super) fn stat_path(
    ivw: &InMemoryView,
    view: &mut ViewDatabase,
    coll: &mut PendingChanges,
    pending: &PendingChange,
    pre_stat: Option<&DirEntry>,
) {
    debug_assert!(
        pending.path != ivw.root_path(),
        "the root is only ever crawled, never stat'ed as a file"
    );

    let tick = ivw.most_recent_tick();
    let Some(parent_path) = pending.path.parent().map(Path::to_path_buf) else {
        return;
    };
    let Some(name) = pending.path.file_name().map(std::ffi::OsStr::to_os_string) else {
        return;
    };

    match ivw.fs().file_info(&pending.path) {
        Ok(st) => {
            if let Some(hint_kind) = pre_stat.and_then(|entry| entry.kind) {
                if hint_kind != st.kind {
                    // The entry changed type between readdir and stat; what
                    // stat said wins.
                    trace!(
                        path = %pending.path.display(),
                        hint = ?hint_kind,
                        observed = ?st.kind,
                        "dir entry raced a rename"
                    );
                }
            }
            reconcile_present(view, coll, pending, &parent_path, name, st, tick);
        }
        Err(err) => {
            if err.kind() == io::ErrorKind::NotFound {
                debug!(path = %pending.path.display(), "no longer present");
            } else {
                warn!(
                    path = %pending.path.display(),
                    error = %err,
                    "stat failed, marking deleted"
                );
            }
            view.mark_file_deleted(&pending.path, tick, pending.now);
            if view.dir_ref(&pending.path).is_some_and(|dir| dir.exists) {
                view.mark_dir_deleted(&pending.path, tick, pending.now, true);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn reconcile_present(
    view: &mut ViewDatabase,
    coll: &mut PendingChanges,
    pending: &PendingChange,
    parent_path: &Path,
    name: std::ffi::OsString,
    st: FileInfo,
    tick: u64,
) {
    let recursive = pending.flags.contains(PendingFlags::RECURSIVE);
    let desynced = pending.flags.contains(PendingFlags::IS_DESYNCED);

    let (prev_exists, prev_ino, prev_was_dir) = {
        let Some(dir) = view.resolve_dir(parent_path, true, tick) else {
            return;
        };
        match dir.files.get(&name) {
            Some(file) => (file.exists, file.stat.map(|s| s.ino), file.is_dir_entry()),
            None => (false, None, false),
        }
    };
    let newly_observed = !prev_exists;

    // A directory replaced by a non-directory leaves its subtree tombstoned.
    if prev_was_dir && !st.is_dir() {
        view.mark_dir_deleted(&pending.path, tick, pending.now, true);
    }

    {
        let Some(dir) = view.resolve_dir(parent_path, true, tick) else {
            return;
        };
        let file = dir
            .files
            .entry(name.clone())
            .or_insert_with(|| FileNode::new(name, st, tick, pending.now));
        file.exists = true;
        file.maybe_deleted = false;
        file.stat = Some(st);
        file.otime = tick;
        file.observed_at = pending.now;
    }

    if st.is_dir() {
        let inode_changed = prev_ino.is_some_and(|ino| ino != st.ino);
        if recursive || newly_observed || inode_changed {
            let mut flags = PendingFlags::CRAWL_ONLY | PendingFlags::RECURSIVE;
            if desynced {
                flags |= PendingFlags::IS_DESYNCED;
            }
            if newly_observed && pending.flags.contains(PendingFlags::VIA_NOTIFY) {
                // Freshly added by the watcher: even per-file watchers have
                // no notifications for children that predate the watch.
                flags |= PendingFlags::NONRECURSIVE_SCAN;
            }
            coll.add(&pending.path, pending.now, flags);
        }
    }

    // Observing a child under a tombstoned parent resurrects the parent.
    if view.dir_ref(parent_path).is_some_and(|dir| !dir.exists) {
        debug!(parent = %parent_path.display(), "parent was tombstoned, re-crawling it");
        coll.add(parent_path, pending.now, PendingFlags::CRAWL_ONLY);
    }
}
