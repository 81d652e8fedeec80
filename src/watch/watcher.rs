// src/watch/watcher.rs

use std::ffi::OsString;
use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::Path;

use bitflags::bitflags;

use crate::fs::FileKind;

bitflags! {
    /// Capability flags reported by a watcher backend. They steer how the
    /// crawler treats directory contents.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WatcherCapabilities: u8 {
        /// The backend reports individual file changes, not just "something
        /// in this directory changed".
        const PER_FILE_NOTIFICATIONS = 1 << 0;
        /// The backend may collapse a rename into a single notification, so
        /// crawls must re-stat everything they enumerate.
        const COALESCED_RENAME = 1 << 1;
    }
}

/// One entry read from a watched directory.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: OsString,
    /// Entry kind as reported by the directory read, if the platform
    /// provides one without an extra stat.
    pub kind: Option<FileKind>,
}

/// An open directory being enumerated during a crawl. Dropping the handle
/// releases the underlying descriptor.
pub trait DirHandle: Send {
    /// Next entry, or `None` at end of directory.
    fn read_dir_entry(&mut self) -> io::Result<Option<DirEntry>>;

    /// Link count of the directory itself, if cheaply known. On POSIX this
    /// approximates subdirectory count plus two and is used to pre-size the
    /// view's child maps.
    fn nlink_hint(&self) -> Option<u64>;
}

/// A platform watcher as consumed by the I/O thread.
pub trait Watcher: Send + Sync + Debug {
    fn capabilities(&self) -> WatcherCapabilities;

    /// Begin watching `path` and open it for enumeration, in whichever
    /// order the backend requires.
    fn start_watch_dir(&self, path: &Path) -> io::Result<Box<dyn DirHandle>>;

    /// Stop delivering notifications for `root`. Called when the root is
    /// reaped or shut down.
    fn stop_watch(&self, root: &Path);
}

/// A watcher that never delivers notifications. Used for one-shot
/// client-mode crawls where nothing keeps watching afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullWatcher;

impl Watcher for NullWatcher {
    fn capabilities(&self) -> WatcherCapabilities {
        WatcherCapabilities::PER_FILE_NOTIFICATIONS
    }

    fn start_watch_dir(&self, path: &Path) -> io::Result<Box<dyn DirHandle>> {
        Ok(Box::new(OsDirHandle::open(path)?))
    }

    fn stop_watch(&self, _root: &Path) {}
}

/// Directory enumeration backed by `std::fs::read_dir`.
pub struct OsDirHandle {
    iter: fs::ReadDir,
    nlink: Option<u64>,
}

impl OsDirHandle {
    pub fn open(path: &Path) -> io::Result<Self> {
        #[cfg(unix)]
        let nlink = {
            use std::os::unix::fs::MetadataExt;
            fs::metadata(path).ok().map(|md| md.nlink())
        };
        #[cfg(not(unix))]
        let nlink = None;

        Ok(Self {
            iter: fs::read_dir(path)?,
            nlink,
        })
    }
}

impl DirHandle for OsDirHandle {
    fn read_dir_entry(&mut self) -> io::Result<Option<DirEntry>> {
        match self.iter.next() {
            None => Ok(None),
            Some(Err(err)) => Err(err),
            Some(Ok(entry)) => Ok(Some(DirEntry {
                name: entry.file_name(),
                kind: entry.file_type().ok().map(FileKind::from),
            })),
        }
    }

    fn nlink_hint(&self) -> Option<u64> {
        self.nlink
    }
}
