//! Common library for the tsync tool
//!
//! tsync mirrors a directory tree between the local machine and a device reachable through a
//! remote shell command (`adb shell` by default). A run takes a snapshot of both sides,
//! reconciles them and applies the resulting deletions and copies.
//!
//! # Modules
//!
//! - `tree`: in-memory snapshots (`Tree`, `Directory`, `Entry`)
//! - `diff`: reconciliation of a source snapshot against a destination snapshot
//! - `prune`: placeholder removal and protection of excluded entries from deletion
//! - `path`: backend path syntax and trailing-slash handling of the destination
//! - `exclude`: glob exclude patterns
//! - `fs`: filesystem backends, local and shell-driven
//! - `sync`: the orchestrator tying the above together
//!
//! # Error Handling
//!
//! Library functions return `error::Result`; binaries hand an async entry point to `run`,
//! which sets up logging and the tokio runtime and logs the error chain on failure.

use anyhow::Context;

pub mod config;
pub mod diff;
pub mod error;
pub mod exclude;
pub mod fs;
pub mod path;
pub mod prune;
pub mod summary;
pub mod sync;
pub mod tree;

pub use config::{OutputConfig, RuntimeConfig};
pub use diff::{Conflict, Diff, DiffSettings, diff_trees};
pub use error::{Error, Result};
pub use exclude::ExcludePatterns;
pub use fs::{FileSystem, LocalFileSystem, ShellFileSystem};
pub use path::fix_destination_paths;
pub use prune::{prune, remove_excluded_from_unaccounted};
pub use summary::Summary;
pub use sync::{Settings, sync};
pub use tree::{Directory, Entry, EntryKind, Tree};

/// Install the global tracing subscriber, logging to stderr.
///
/// `RUST_LOG` directives are honored on top of the level picked by `-v`/`-q`.
pub fn setup_logging(output: &OutputConfig) {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::from_level(output.level()).into())
        .from_env_lossy();
    // a subscriber may already be installed, e.g. by a test harness
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(!output.no_color)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_runtime(runtime: &RuntimeConfig) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    builder.build().context("failed to create tokio runtime")
}

/// Run an async entry point, returning `None` when it failed (the error is already logged).
pub fn run<Fut, T, E>(output: OutputConfig, runtime: RuntimeConfig, func: impl FnOnce() -> Fut) -> Option<T>
where
    T: std::fmt::Display,
    E: std::fmt::Display,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
{
    setup_logging(&output);
    let runtime = match build_runtime(&runtime) {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("{:#}", &error);
            return None;
        }
    };
    match runtime.block_on(func()) {
        Ok(summary) => {
            if output.print_summary {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            tracing::error!("{:#}", &error);
            None
        }
    }
}
