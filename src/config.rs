// src/config.rs

//! Configuration loading for `treewatch`.
//!
//! Options are enumerated explicitly; there is no dynamic key store. The
//! TOML shape:
//!
//! ```toml
//! [watch]
//! root = "/srv/tree"
//!
//! [tuning]
//! trigger_settle_ms = 20
//! notify_sleep_ms = 0
//! hint_num_files_per_dir = 64
//! gc_interval_seconds = 86400
//! gc_age_seconds = 259200
//! idle_reap_age_seconds = 432000
//! ```
//!
//! All sections are optional and have defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration as read from a TOML file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    /// `[watch]` section.
    #[serde(default)]
    pub watch: WatchSection,

    /// `[tuning]` section.
    #[serde(default)]
    pub tuning: TuningSection,
}

/// `[watch]` section: which tree to mirror.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WatchSection {
    /// Root directory to watch. The `--root` CLI flag overrides this.
    #[serde(default)]
    pub root: Option<String>,
}

/// `[tuning]` section: timers and sizing hints for the I/O thread.
#[derive(Debug, Clone, Deserialize)]
pub struct TuningSection {
    /// Quiet period after which the root is considered settled.
    #[serde(default = "default_trigger_settle_ms")]
    pub trigger_settle_ms: u64,

    /// Sleep before processing a batch. Mitigates kernels that report
    /// unlink events before the inode cache is evicted. Adds latency to
    /// every sync, so it defaults to off.
    #[serde(default)]
    pub notify_sleep_ms: u64,

    /// Initial capacity hint for a directory's file map.
    #[serde(default = "default_hint_num_files_per_dir")]
    pub hint_num_files_per_dir: usize,

    /// How often the age-out pass may run. Zero disables it.
    #[serde(default = "default_gc_interval_seconds")]
    pub gc_interval_seconds: u64,

    /// Tombstones older than this are dropped by the age-out pass.
    #[serde(default = "default_gc_age_seconds")]
    pub gc_age_seconds: u64,

    /// Stop watching a root nobody has queried for this long. Zero
    /// disables reaping.
    #[serde(default = "default_idle_reap_age_seconds")]
    pub idle_reap_age_seconds: u64,
}

fn default_trigger_settle_ms() -> u64 {
    20
}

fn default_hint_num_files_per_dir() -> usize {
    64
}

fn default_gc_interval_seconds() -> u64 {
    86_400
}

fn default_gc_age_seconds() -> u64 {
    259_200
}

fn default_idle_reap_age_seconds() -> u64 {
    432_000
}

impl Default for TuningSection {
    fn default() -> Self {
        Self {
            trigger_settle_ms: default_trigger_settle_ms(),
            notify_sleep_ms: 0,
            hint_num_files_per_dir: default_hint_num_files_per_dir(),
            gc_interval_seconds: default_gc_interval_seconds(),
            gc_age_seconds: default_gc_age_seconds(),
            idle_reap_age_seconds: default_idle_reap_age_seconds(),
        }
    }
}

/// Effective, validated options handed to a root watch.
#[derive(Debug, Clone)]
pub struct RootOptions {
    pub trigger_settle: Duration,
    pub notify_sleep: Duration,
    pub hint_num_files_per_dir: usize,
    pub gc_interval: Duration,
    pub gc_age: Duration,
    pub idle_reap_age: Duration,
}

impl RootOptions {
    pub fn from_tuning(tuning: &TuningSection) -> Result<Self> {
        if tuning.trigger_settle_ms == 0 {
            bail!("[tuning].trigger_settle_ms must be >= 1 (got 0)");
        }

        Ok(Self {
            trigger_settle: Duration::from_millis(tuning.trigger_settle_ms),
            notify_sleep: Duration::from_millis(tuning.notify_sleep_ms),
            hint_num_files_per_dir: tuning.hint_num_files_per_dir,
            gc_interval: Duration::from_secs(tuning.gc_interval_seconds),
            gc_age: Duration::from_secs(tuning.gc_age_seconds),
            idle_reap_age: Duration::from_secs(tuning.idle_reap_age_seconds),
        })
    }
}

impl Default for RootOptions {
    fn default() -> Self {
        Self::from_tuning(&TuningSection::default()).expect("defaults are valid")
    }
}

/// Read a configuration file. Only deserialization; use
/// [`load_and_validate`] to also resolve effective options.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading config file at {:?}", path))?;

    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("parsing TOML config from {:?}", path))?;

    Ok(config)
}

/// Read a configuration file and resolve the effective root options.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<(ConfigFile, RootOptions)> {
    let config = load_from_path(&path)?;
    let options = RootOptions::from_tuning(&config.tuning)?;
    Ok((config, options))
}

/// Default config path: `Treewatch.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Treewatch.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_gets_all_defaults() {
        let config: ConfigFile = toml::from_str("").unwrap();
        let options = RootOptions::from_tuning(&config.tuning).unwrap();

        assert_eq!(options.trigger_settle, Duration::from_millis(20));
        assert_eq!(options.notify_sleep, Duration::ZERO);
        assert_eq!(options.hint_num_files_per_dir, 64);
        assert_eq!(options.gc_interval, Duration::from_secs(86_400));
        assert!(config.watch.root.is_none());
    }

    #[test]
    fn partial_tuning_section_keeps_other_defaults() {
        let config: ConfigFile = toml::from_str(
            r#"
            [watch]
            root = "/srv/tree"

            [tuning]
            trigger_settle_ms = 5
            notify_sleep_ms = 2
            "#,
        )
        .unwrap();
        let options = RootOptions::from_tuning(&config.tuning).unwrap();

        assert_eq!(config.watch.root.as_deref(), Some("/srv/tree"));
        assert_eq!(options.trigger_settle, Duration::from_millis(5));
        assert_eq!(options.notify_sleep, Duration::from_millis(2));
        assert_eq!(options.hint_num_files_per_dir, 64);
    }

    #[test]
    fn zero_trigger_settle_is_rejected() {
        let config: ConfigFile = toml::from_str("[tuning]\ntrigger_settle_ms = 0\n").unwrap();
        assert!(RootOptions::from_tuning(&config.tuning).is_err());
    }
}
