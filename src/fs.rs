// src/fs.rs

//! Filesystem metadata access behind a small trait.
//!
//! The I/O thread only ever needs `lstat`-style metadata; directory
//! enumeration goes through the watcher abstraction because watchers differ
//! on the watch-before-open vs open-before-watch ordering. Keeping stat
//! behind a trait lets tests substitute failure modes without touching a
//! real kernel.

use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// Kind of filesystem object, as seen by `lstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    Other,
}

impl From<fs::FileType> for FileKind {
    fn from(ft: fs::FileType) -> Self {
        if ft.is_dir() {
            FileKind::Dir
        } else if ft.is_file() {
            FileKind::File
        } else if ft.is_symlink() {
            FileKind::Symlink
        } else {
            FileKind::Other
        }
    }
}

/// Stat metadata cached in the view for every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub kind: FileKind,
    pub ino: u64,
    pub size: u64,
    pub nlink: u64,
    pub mtime: SystemTime,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }

    /// Build from `std::fs::Metadata`. Inode and link count are zero on
    /// platforms that do not expose them.
    pub fn from_metadata(md: &fs::Metadata) -> Self {
        #[cfg(unix)]
        let (ino, nlink) = {
            use std::os::unix::fs::MetadataExt;
            (md.ino(), md.nlink())
        };
        #[cfg(not(unix))]
        let (ino, nlink) = (0u64, 0u64);

        Self {
            kind: FileKind::from(md.file_type()),
            ino,
            size: md.len(),
            nlink,
            mtime: md.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }
}

/// Abstract metadata interface used by the crawler and stat paths.
pub trait FileSystem: Send + Sync + Debug {
    /// `lstat` the path: symlinks are reported as themselves, not followed.
    fn file_info(&self, path: &Path) -> io::Result<FileInfo>;
}

/// Implementation backed by `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn file_info(&self, path: &Path) -> io::Result<FileInfo> {
        let md = fs::symlink_metadata(path)?;
        Ok(FileInfo::from_metadata(&md))
    }
}
