// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `treewatch`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "treewatch",
    version,
    about = "Watch a directory tree, mirror it in memory, and report when it settles.",
    long_about = None
)]
pub struct CliArgs {
    /// Directory tree to watch. Overrides `watch.root` from the config.
    #[arg(long, value_name = "PATH")]
    pub root: Option<String>,

    /// Path to the config file (TOML).
    ///
    /// Default: `Treewatch.toml` in the current working directory, if it
    /// exists.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Crawl the tree once, print a summary, and exit without watching.
    #[arg(long)]
    pub once: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TREEWATCH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
