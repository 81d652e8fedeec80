// src/watch/mod.rs

//! The platform watcher abstraction.
//!
//! The I/O thread never talks to a kernel notification API directly; it
//! consumes a [`Watcher`] that:
//! - deposits raw change paths into the shared pending queue from its own
//!   thread, flagged `VIA_NOTIFY`;
//! - signals notification loss by depositing the root with
//!   `IS_DESYNCED | CRAWL_ONLY | RECURSIVE`;
//! - begins watching a directory and opens it for enumeration as a single
//!   operation, because backends differ on whether the watch or the open
//!   must come first.

pub mod notify;
pub mod watcher;

pub use notify::NotifyWatcher;
pub use watcher::{DirEntry, DirHandle, NullWatcher, OsDirHandle, Watcher, WatcherCapabilities};
