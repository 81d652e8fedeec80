// src/lib.rs

pub mod cli;
pub mod config;
pub mod cookies;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod pending;
pub mod perf;
pub mod root;
pub mod view;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::cli::CliArgs;
use crate::config::RootOptions;

pub use crate::errors::SyncError;
use crate::fs::{FileSystem, RealFileSystem};
use crate::pending::PendingCollection;
use crate::root::{Root, RootEvent};
use crate::view::InMemoryView;
use crate::watch::{NotifyWatcher, Watcher};

/// A running watch on one root: the root state, the view, and the I/O
/// thread that keeps them reconciled.
///
/// Dropping the service stops the I/O thread cooperatively and joins it.
pub struct WatchService {
    root: Arc<Root>,
    view: Arc<InMemoryView>,
    io_thread: Option<JoinHandle<()>>,
}

impl WatchService {
    /// Start watching `root_path`. The `watcher` must already be feeding
    /// `pending`; the initial crawl begins on the spawned I/O thread
    /// immediately.
    pub fn start(
        root_path: impl Into<PathBuf>,
        options: RootOptions,
        fs: Arc<dyn FileSystem>,
        watcher: Arc<dyn Watcher>,
        pending: Arc<PendingCollection>,
    ) -> Result<Self> {
        let root_path = canonical_root(root_path.into())?;

        let root = Root::new(root_path.clone(), options);
        let view = InMemoryView::new(root_path, fs, watcher, pending);
        let io_thread = view.spawn_io_thread(&root);

        Ok(Self {
            root,
            view,
            io_thread: Some(io_thread),
        })
    }

    /// Crawl the tree once without spawning the I/O thread, for one-shot
    /// non-daemon use.
    pub fn client_mode(
        root_path: impl Into<PathBuf>,
        options: RootOptions,
        fs: Arc<dyn FileSystem>,
        watcher: Arc<dyn Watcher>,
        pending: Arc<PendingCollection>,
    ) -> Result<Self> {
        let root_path = canonical_root(root_path.into())?;

        let root = Root::new(root_path.clone(), options);
        let view = InMemoryView::new(root_path, fs, watcher, pending);
        view.client_mode_crawl(&root);

        Ok(Self {
            root,
            view,
            io_thread: None,
        })
    }

    pub fn root(&self) -> &Arc<Root> {
        &self.root
    }

    pub fn view(&self) -> &Arc<InMemoryView> {
        &self.view
    }

    /// Subscribe to unilateral notifications (settles).
    pub fn subscribe(&self) -> broadcast::Receiver<RootEvent> {
        self.root.subscribe()
    }

    /// See [`Root::sync_to_now`].
    pub async fn sync_to_now(&self, timeout: Duration) -> Result<(), SyncError> {
        self.root.sync_to_now(timeout).await
    }

    /// See [`Root::wait_for_settle`].
    pub async fn wait_for_settle(&self, period: Duration) -> Result<(), SyncError> {
        self.root.wait_for_settle(period).await
    }

    /// Resolves once the initial crawl (and any pending recrawl) is done.
    pub async fn wait_until_ready_to_query(&self) -> Result<(), SyncError> {
        self.view.wait_until_ready_to_query(&self.root).await
    }

    /// Stop the I/O thread cooperatively and wait for it to exit.
    pub fn stop(&mut self) {
        self.view.request_stop();
        if let Some(handle) = self.io_thread.take() {
            if handle.join().is_err() {
                warn!(root = %self.root.path().display(), "I/O thread panicked");
            }
        }
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn canonical_root(path: PathBuf) -> Result<PathBuf> {
    let path = path
        .canonicalize()
        .with_context(|| format!("resolving watch root {:?}", path))?;
    if !path.is_dir() {
        return Err(anyhow!("watch root {:?} is not a directory", path));
    }
    Ok(path)
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the notify-backed watcher and the shared pending queue
/// - the watch service (view + I/O thread)
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let (config, options) = load_config(&args)?;

    let root_path = args
        .root
        .clone()
        .or(config.watch.root)
        .ok_or_else(|| anyhow!("no root to watch: pass --root or set watch.root in the config"))?;

    if args.once {
        return run_once(root_path, options);
    }

    let root_path = canonical_root(PathBuf::from(root_path))?;
    let pending = Arc::new(PendingCollection::new());
    let watcher = Arc::new(NotifyWatcher::spawn(&root_path, Arc::clone(&pending))?);

    let mut service = WatchService::start(
        root_path,
        options,
        Arc::new(RealFileSystem),
        watcher,
        pending,
    )?;

    service
        .wait_until_ready_to_query()
        .await
        .map_err(|err| anyhow!("initial crawl did not complete: {err}"))?;
    let (dirs, files) = service.view().read_view(|db| db.count_entries());
    info!(dirs, files, "ready to query");

    let mut events = service.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested, stopping watch");
                break;
            }
            event = events.recv() => match event {
                Ok(RootEvent::Settled) => {
                    info!(tick = service.view().most_recent_tick(), "settled");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed notifications");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    service.stop();
    Ok(())
}

fn run_once(root_path: String, options: RootOptions) -> Result<()> {
    let pending = Arc::new(PendingCollection::new());
    let service = WatchService::client_mode(
        root_path,
        options,
        Arc::new(RealFileSystem),
        Arc::new(watch::NullWatcher::default()),
        pending,
    )?;

    let (dirs, files) = service.view().read_view(|db| db.count_entries());
    println!(
        "{}: {} directories, {} files",
        service.root().path().display(),
        dirs,
        files
    );
    Ok(())
}

fn load_config(args: &CliArgs) -> Result<(config::ConfigFile, RootOptions)> {
    match &args.config {
        Some(path) => config::load_and_validate(path),
        None => {
            let default = config::default_config_path();
            if default.exists() {
                config::load_and_validate(default)
            } else {
                Ok((
                    config::ConfigFile::default(),
                    RootOptions::from_tuning(&config::TuningSection::default())?,
                ))
            }
        }
    }
}
