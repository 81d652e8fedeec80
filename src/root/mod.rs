// src/root/mod.rs

//! A watched root: the per-tree state shared between the I/O thread and
//! client threads.
//!
//! - [`recrawl`-related state][RecrawlInfo] is guarded by a reader-writer
//!   lock; when it must be held together with the view's crawl state, the
//!   two are always acquired through one helper in a fixed order.
//! - `done_initial` and `cancelled` are atomics read on hot paths by query
//!   threads; `done_initial` is published with release ordering at the end
//!   of a full crawl so readers also observe the crawl's writes.

pub mod sync;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::info;

use crate::config::RootOptions;
use crate::cookies::CookieSync;

/// Unilateral notification broadcast to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootEvent {
    /// No pending events for the settle period; the tree is quiet.
    Settled,
}

/// Recrawl bookkeeping.
#[derive(Debug, Default)]
pub struct RecrawlInfo {
    pub should_recrawl: bool,
    /// Why the recrawl was requested; logged when it starts.
    pub reason: Option<String>,
    pub recrawl_count: u64,
    pub crawl_start: Option<Instant>,
    pub crawl_finish: Option<Instant>,
}

pub struct Root {
    path: PathBuf,
    pub options: RootOptions,
    pub cookies: CookieSync,
    pub recrawl_info: RwLock<RecrawlInfo>,

    done_initial: AtomicBool,
    cancelled: AtomicBool,

    unilateral: broadcast::Sender<RootEvent>,
    /// When the I/O thread last took a non-empty batch; settles are only
    /// meaningful relative to this.
    last_unsettled_at: Mutex<Instant>,
    /// Last client interaction; drives idle reaping.
    last_client_activity: Mutex<Instant>,
}

impl std::fmt::Debug for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Root")
            .field("path", &self.path)
            .field("done_initial", &self.done_initial())
            .field("cancelled", &self.cancelled())
            .finish_non_exhaustive()
    }
}

impl Root {
    pub fn new(path: PathBuf, options: RootOptions) -> Arc<Self> {
        let (unilateral, _) = broadcast::channel(64);
        Arc::new(Self {
            cookies: CookieSync::new(&path),
            path,
            options,
            recrawl_info: RwLock::new(RecrawlInfo::default()),
            done_initial: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            unilateral,
            last_unsettled_at: Mutex::new(Instant::now()),
            last_client_activity: Mutex::new(Instant::now()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn done_initial(&self) -> bool {
        self.done_initial.load(Ordering::Acquire)
    }

    pub(crate) fn set_done_initial(&self, value: bool) {
        self.done_initial.store(value, Ordering::Release);
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Request a recrawl; the I/O thread notices at its next iteration.
    pub fn schedule_recrawl(&self, reason: &str) {
        let mut info = self.recrawl_info.write().unwrap();
        if !info.should_recrawl {
            info!(root = %self.path.display(), reason, "recrawl scheduled");
            info.reason = Some(reason.to_string());
        }
        info.should_recrawl = true;
    }

    pub fn recrawl_count(&self) -> u64 {
        self.recrawl_info.read().unwrap().recrawl_count
    }

    pub fn should_recrawl(&self) -> bool {
        self.recrawl_info.read().unwrap().should_recrawl
    }

    /// Subscribe to unilateral notifications (settles).
    pub fn subscribe(&self) -> broadcast::Receiver<RootEvent> {
        self.unilateral.subscribe()
    }

    pub(crate) fn broadcast_settled(&self) {
        // No subscribers is fine.
        let _ = self.unilateral.send(RootEvent::Settled);
    }

    pub(crate) fn mark_unsettled(&self) {
        *self.last_unsettled_at.lock().unwrap() = Instant::now();
    }

    /// How long the I/O thread has gone without taking a non-empty batch.
    pub fn quiet_duration(&self) -> Duration {
        self.last_unsettled_at.lock().unwrap().elapsed()
    }

    pub(crate) fn touch_client_activity(&self) {
        *self.last_client_activity.lock().unwrap() = Instant::now();
    }

    /// True when the root has had no client interaction within
    /// `idle_reap_age` and reaping is enabled.
    pub(crate) fn consider_reap(&self) -> bool {
        let idle_reap_age = self.options.idle_reap_age;
        if idle_reap_age.is_zero() {
            return false;
        }
        self.last_client_activity.lock().unwrap().elapsed() >= idle_reap_age
    }
}
