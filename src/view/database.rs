// src/view/database.rs

//! In-memory mirror of the watched tree.
//!
//! An ownership tree rooted at the watched path. Directory nodes own their
//! children; the parent of a node is derived from its path, so ownership
//! points strictly downward. Every child — file or directory — has a file
//! node in its parent's file map carrying stat metadata; directories
//! additionally have a directory node in the parent's dir map. The root is
//! only ever a directory node, never a file node.
//!
//! Deleted nodes are tombstoned (marked non-existent) rather than removed,
//! so queries can observe the deletion tick; the age-out pass erases
//! tombstones later.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::fs::FileInfo;

/// A child entry of a directory: a file, or the file-side record of a
/// subdirectory.
#[derive(Debug, Clone)]
pub struct FileNode {
    name: OsString,
    pub exists: bool,
    /// Transient flag used only inside a crawl pass for delete detection.
    pub maybe_deleted: bool,
    pub stat: Option<FileInfo>,
    /// Logical tick at which this node was last observed to change.
    pub otime: u64,
    /// Wall-clock time of that observation; drives age-out.
    pub observed_at: SystemTime,
}

impl FileNode {
    pub fn new(name: OsString, stat: FileInfo, tick: u64, now: SystemTime) -> Self {
        Self {
            name,
            exists: true,
            maybe_deleted: false,
            stat: Some(stat),
            otime: tick,
            observed_at: now,
        }
    }

    pub fn name(&self) -> &OsStr {
        &self.name
    }

    pub fn is_dir_entry(&self) -> bool {
        self.stat.map(|s| s.is_dir()).unwrap_or(false)
    }
}

/// A directory node owning its children.
#[derive(Debug)]
pub struct DirNode {
    path: PathBuf,
    pub files: HashMap<OsString, FileNode>,
    pub dirs: HashMap<OsString, DirNode>,
    pub exists: bool,
    /// Logical tick of the last structural change or crawl.
    pub tick: u64,
}

impl DirNode {
    fn new(path: PathBuf, tick: u64) -> Self {
        Self {
            path,
            files: HashMap::new(),
            dirs: HashMap::new(),
            exists: true,
            tick,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn full_path_to_child(&self, name: &OsStr) -> PathBuf {
        self.path.join(name)
    }

    /// Pre-size the child maps ahead of an initial crawl.
    pub fn reserve_hint(&mut self, num_dirs: usize, num_files: usize) {
        if self.files.is_empty() && num_files > 0 {
            self.files.reserve(num_files);
        }
        if self.dirs.is_empty() && num_dirs > 0 {
            self.dirs.reserve(num_dirs);
        }
    }

    /// Record that a crawl observed this directory on disk.
    pub fn note_crawled(&mut self, tick: u64) {
        self.exists = true;
        self.tick = tick;
    }

    fn mark_deleted(&mut self, tick: u64, now: SystemTime, recursive: bool) {
        self.exists = false;
        self.tick = tick;
        for file in self.files.values_mut() {
            if file.exists {
                file.exists = false;
                file.maybe_deleted = false;
                file.otime = tick;
                file.observed_at = now;
            }
        }
        if recursive {
            for dir in self.dirs.values_mut() {
                dir.mark_deleted(tick, now, true);
            }
        }
    }

    fn age_out(&mut self, deadline: SystemTime) -> usize {
        let mut removed = 0;

        self.files.retain(|_, file| {
            let expired = !file.exists && file.observed_at < deadline;
            if expired {
                removed += 1;
            }
            !expired
        });

        self.dirs.retain(|_, dir| {
            removed += dir.age_out(deadline);
            let expired = !dir.exists && dir.files.is_empty() && dir.dirs.is_empty();
            if expired {
                removed += 1;
            }
            !expired
        });

        removed
    }

    fn count_entries(&self) -> (usize, usize) {
        let mut dirs = 0;
        // Subdirectories also have a file-side entry; count them once.
        let mut files = self
            .files
            .values()
            .filter(|f| f.exists && !f.is_dir_entry())
            .count();
        for dir in self.dirs.values() {
            if dir.exists {
                dirs += 1;
            }
            let (d, f) = dir.count_entries();
            dirs += d;
            files += f;
        }
        (dirs, files)
    }
}

/// The tree of directories and files mirrored from disk.
///
/// Mutated only by the I/O thread, under the view write lock. Every
/// mutation records the logical tick passed in by the caller; the tick
/// counter itself lives with the I/O thread state, not here.
#[derive(Debug)]
pub struct ViewDatabase {
    root_path: PathBuf,
    root: DirNode,
}

impl ViewDatabase {
    pub fn new(root_path: PathBuf) -> Self {
        let root = DirNode::new(root_path.clone(), 0);
        Self { root_path, root }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn root_dir(&self) -> &DirNode {
        &self.root
    }

    /// Resolve the directory node for `path`, creating the chain when
    /// `create` is set. Returns `None` for paths outside the root, or for
    /// unknown directories when not creating.
    pub fn resolve_dir(&mut self, path: &Path, create: bool, tick: u64) -> Option<&mut DirNode> {
        let rel = path.strip_prefix(&self.root_path).ok()?;

        let mut dir = &mut self.root;
        for component in rel.components() {
            let name = component.as_os_str().to_os_string();
            if !create && !dir.dirs.contains_key(&name) {
                return None;
            }
            let child_path = dir.path.join(&name);
            dir = dir
                .dirs
                .entry(name)
                .or_insert_with(|| DirNode::new(child_path, tick));
        }
        Some(dir)
    }

    /// Read-side lookup of a directory node.
    pub fn dir_ref(&self, path: &Path) -> Option<&DirNode> {
        let rel = path.strip_prefix(&self.root_path).ok()?;
        let mut dir = &self.root;
        for component in rel.components() {
            dir = dir.dirs.get(component.as_os_str())?;
        }
        Some(dir)
    }

    /// Read-side lookup of the file node for `path`.
    pub fn file_ref(&self, path: &Path) -> Option<&FileNode> {
        let parent = path.parent()?;
        let name = path.file_name()?;
        self.dir_ref(parent)?.files.get(name)
    }

    /// Tombstone the file node for `path`, if one is known.
    pub fn mark_file_deleted(&mut self, path: &Path, tick: u64, now: SystemTime) {
        let Some(parent) = path.parent() else { return };
        let Some(name) = path.file_name() else { return };
        let Some(dir) = self.resolve_dir(parent, false, tick) else {
            return;
        };
        if let Some(file) = dir.files.get_mut(name) {
            if file.exists {
                file.exists = false;
                file.maybe_deleted = false;
                file.otime = tick;
                file.observed_at = now;
            }
        }
    }

    /// Tombstone a directory and its file entries; with `recursive`, the
    /// whole subtree.
    pub fn mark_dir_deleted(&mut self, path: &Path, tick: u64, now: SystemTime, recursive: bool) {
        if let Some(dir) = self.resolve_dir(path, false, tick) {
            dir.mark_deleted(tick, now, recursive);
        }
        // The directory is also a child entry of its parent.
        if path != self.root_path {
            self.mark_file_deleted(path, tick, now);
        }
    }

    /// Erase tombstones older than `gc_age`, and any deleted directories
    /// left empty. Returns how many nodes were dropped.
    pub fn age_out(&mut self, gc_age: Duration, now: SystemTime) -> usize {
        let deadline = now.checked_sub(gc_age).unwrap_or(SystemTime::UNIX_EPOCH);
        self.root.age_out(deadline)
    }

    /// Count live (non-tombstoned) directories and files, excluding the
    /// root itself.
    pub fn count_entries(&self) -> (usize, usize) {
        self.root.count_entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileInfo, FileKind};

    fn stat(kind: FileKind, ino: u64) -> FileInfo {
        FileInfo {
            kind,
            ino,
            size: 0,
            nlink: 1,
            mtime: SystemTime::UNIX_EPOCH,
        }
    }

    fn add_file(view: &mut ViewDatabase, path: &str, tick: u64) {
        let path = PathBuf::from(path);
        let parent = path.parent().unwrap().to_path_buf();
        let name = path.file_name().unwrap().to_os_string();
        let dir = view.resolve_dir(&parent, true, tick).unwrap();
        dir.files.insert(
            name.clone(),
            FileNode::new(name, stat(FileKind::File, 1), tick, SystemTime::now()),
        );
    }

    #[test]
    fn resolve_dir_creates_the_chain_and_paths_stay_consistent() {
        let mut view = ViewDatabase::new(PathBuf::from("/w"));
        view.resolve_dir(Path::new("/w/a/b/c"), true, 1).unwrap();

        let a = view.dir_ref(Path::new("/w/a")).unwrap();
        assert_eq!(a.path(), Path::new("/w/a"));
        let b = a.dirs.get(OsStr::new("b")).unwrap();
        assert_eq!(b.path(), a.path().join("b"));
        let c = b.dirs.get(OsStr::new("c")).unwrap();
        assert_eq!(c.path(), b.path().join("c"));
    }

    #[test]
    fn resolve_dir_rejects_paths_outside_the_root() {
        let mut view = ViewDatabase::new(PathBuf::from("/w"));
        assert!(view.resolve_dir(Path::new("/elsewhere"), true, 1).is_none());
    }

    #[test]
    fn resolve_dir_without_create_does_not_invent_nodes() {
        let mut view = ViewDatabase::new(PathBuf::from("/w"));
        assert!(view.resolve_dir(Path::new("/w/missing"), false, 1).is_none());
        assert!(view.dir_ref(Path::new("/w/missing")).is_none());
    }

    #[test]
    fn mark_dir_deleted_tombstones_the_subtree() {
        let mut view = ViewDatabase::new(PathBuf::from("/w"));
        add_file(&mut view, "/w/sub/one", 1);
        add_file(&mut view, "/w/sub/deep/two", 1);

        view.mark_dir_deleted(Path::new("/w/sub"), 2, SystemTime::now(), true);

        let one = view.file_ref(Path::new("/w/sub/one")).unwrap();
        assert!(!one.exists);
        assert_eq!(one.otime, 2);
        let two = view.file_ref(Path::new("/w/sub/deep/two")).unwrap();
        assert!(!two.exists);
        assert!(!view.dir_ref(Path::new("/w/sub")).unwrap().exists);
    }

    #[test]
    fn age_out_erases_only_old_tombstones() {
        let mut view = ViewDatabase::new(PathBuf::from("/w"));
        add_file(&mut view, "/w/old", 1);
        add_file(&mut view, "/w/fresh", 1);
        add_file(&mut view, "/w/live", 1);

        let long_ago = SystemTime::now() - Duration::from_secs(1000);
        view.mark_file_deleted(Path::new("/w/old"), 2, long_ago);
        view.mark_file_deleted(Path::new("/w/fresh"), 2, SystemTime::now());

        let removed = view.age_out(Duration::from_secs(60), SystemTime::now());
        assert_eq!(removed, 1);
        assert!(view.file_ref(Path::new("/w/old")).is_none());
        assert!(view.file_ref(Path::new("/w/fresh")).is_some());
        assert!(view.file_ref(Path::new("/w/live")).unwrap().exists);
    }

    #[test]
    fn count_entries_skips_tombstones() {
        let mut view = ViewDatabase::new(PathBuf::from("/w"));
        add_file(&mut view, "/w/a", 1);
        add_file(&mut view, "/w/b/c", 1);

        assert_eq!(view.count_entries(), (1, 2));

        view.mark_file_deleted(Path::new("/w/a"), 2, SystemTime::now());
        assert_eq!(view.count_entries(), (1, 1));
    }
}
