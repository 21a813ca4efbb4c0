//! Filesystem capability: snapshot capture and plan execution
//!
//! A backend implements the primitive operations (stat, list, unlink, ...) and gets tree
//! capture, tree removal and tree copying on top of them. Backends are used through
//! `&dyn FileSystem` since source and destination are picked at runtime.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::path::PathSyntax;
use crate::summary::Summary;
use crate::tree::{Directory, Entry, EntryKind, Tree};

pub mod local;
pub mod shell;

pub use local::LocalFileSystem;
pub use shell::ShellFileSystem;

/// Writer half handed to `FileSystem::read_file_into`
pub type Writer<'a> = &'a mut (dyn tokio::io::AsyncWrite + Send + Unpin);

#[derive(Copy, Clone, Debug)]
pub struct CaptureSettings {
    pub follow_symlinks: bool,
    /// timestamps are truncated to a multiple of this many seconds
    pub time_granularity: i64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            time_granularity: 1,
        }
    }
}

#[derive(Clone, Default)]
pub struct PushSettings {
    pub dry_run: bool,
    pub progress: Option<indicatif::ProgressBar>,
}

#[async_trait]
pub trait FileSystem: PathSyntax + Send + Sync {
    /// Short backend name used in log messages.
    fn name(&self) -> &str;

    /// Path rules of this backend, handed to the reconciliation engine.
    fn path_syntax(&self) -> &dyn PathSyntax;

    /// Stat without following a final symlink.
    async fn lstat(&self, path: &str) -> Result<Entry>;

    /// Names and lstat results of every entry in a directory.
    async fn read_dir(&self, path: &str) -> Result<Vec<(String, Entry)>>;

    async fn realpath(&self, path: &str) -> Result<String>;

    async fn unlink(&self, path: &str) -> Result<()>;

    async fn rmdir(&self, path: &str) -> Result<()>;

    async fn make_dirs(&self, path: &str) -> Result<()>;

    async fn set_times(&self, path: &str, entry: &Entry) -> Result<()>;

    /// Stream the contents of a file on this backend into `writer`, returning the byte count.
    async fn read_file_into(&self, path: &str, writer: Writer<'_>) -> Result<u64>;

    /// Copy `source` living on `source_fs` to `destination` on this backend.
    async fn push_file_here(
        &self,
        source_fs: &dyn FileSystem,
        source: &str,
        destination: &str,
    ) -> Result<u64>;

    async fn get_tree(&self, root: &str, settings: &CaptureSettings) -> Result<Tree> {
        let entry = self.lstat(root).await?;
        self.capture(root, entry, settings).await
    }

    async fn capture(&self, path: &str, entry: Entry, settings: &CaptureSettings) -> Result<Tree> {
        match entry.kind {
            EntryKind::Symlink => {
                if !settings.follow_symlinks {
                    tracing::warn!("Ignoring symlink {path}");
                    return Ok(Tree::Absent);
                }
                tracing::debug!("Following symlink {path}");
                let resolved = match self.realpath(path).await {
                    Ok(resolved) => resolved,
                    Err(error) if is_skippable(&error) => {
                        tracing::error!("Skipping symlink {path}: {error}");
                        return Ok(Tree::Absent);
                    }
                    Err(error) => return Err(error),
                };
                let resolved_entry = match self.lstat(&resolved).await {
                    Ok(entry) => entry,
                    Err(error) if is_skippable(&error) => {
                        tracing::error!("Skipping symlink {path}: {error}");
                        return Ok(Tree::Absent);
                    }
                    Err(error) => return Err(error),
                };
                self.capture(&resolved, resolved_entry, settings).await
            }
            EntryKind::Directory => {
                let mut dir = Directory::new(Some(entry.truncated(settings.time_granularity)));
                for (name, child_entry) in self.read_dir(path).await? {
                    if name == "." || name == ".." {
                        continue;
                    }
                    let child_path = self.join_paths(path, &name);
                    let child = self.capture(&child_path, child_entry, settings).await?;
                    if !child.is_absent() {
                        dir.children.insert(name, child);
                    }
                }
                Ok(Tree::Directory(dir))
            }
            EntryKind::File => Ok(Tree::Leaf(entry.truncated(settings.time_granularity))),
            EntryKind::Other => {
                tracing::warn!("Ignoring special file {path}");
                Ok(Tree::Absent)
            }
        }
    }

    /// Delete every path represented in `tree`, rooted at `path`. Children go first; a
    /// directory itself is removed only when its own entry is flagged.
    async fn remove_tree(&self, path: &str, tree: &Tree, dry_run: bool) -> Result<Summary> {
        let mut summary = Summary::default();
        match tree {
            Tree::Absent => {}
            Tree::Leaf(_) => {
                tracing::info!("Removing {path}");
                if !dry_run {
                    self.unlink(path).await?;
                }
                summary.files_removed += 1;
            }
            Tree::Directory(dir) => {
                for (name, child) in &dir.children {
                    let child_path = self.normalize_path(&self.join_paths(path, name));
                    summary += self.remove_tree(&child_path, child, dry_run).await?;
                }
                if dir.entry.is_some() {
                    tracing::info!("Removing folder {path}");
                    if !dry_run {
                        self.rmdir(path).await?;
                    }
                    summary.directories_removed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Copy every path represented in `tree` from `source_fs` onto this backend.
    ///
    /// `relative` is only used for logging, so copied entries are reported relative to the
    /// roots instead of repeating them on every line.
    async fn push_tree_here(
        &self,
        source_path: &str,
        relative: &str,
        tree: &Tree,
        destination_path: &str,
        source_fs: &dyn FileSystem,
        settings: &PushSettings,
    ) -> Result<Summary> {
        let mut summary = Summary::default();
        match tree {
            Tree::Absent => {}
            Tree::Leaf(entry) => {
                match &settings.progress {
                    Some(bar) => bar.set_message(relative.to_string()),
                    None => tracing::info!("{relative}"),
                }
                if !settings.dry_run {
                    summary.bytes_copied += self
                        .push_file_here(source_fs, source_path, destination_path)
                        .await?;
                    self.set_times(destination_path, entry).await?;
                }
                if let Some(bar) = &settings.progress {
                    bar.inc(1);
                }
                summary.files_copied += 1;
            }
            Tree::Directory(dir) => {
                if dir.entry.is_some() {
                    tracing::info!("{relative}{}", self.separator());
                    if !settings.dry_run {
                        self.make_dirs(destination_path).await?;
                    }
                    summary.directories_created += 1;
                }
                for (name, child) in &dir.children {
                    summary += self
                        .push_tree_here(
                            &source_fs.normalize_path(&source_fs.join_paths(source_path, name)),
                            &source_fs.join_paths(relative, name),
                            child,
                            &self.normalize_path(&self.join_paths(destination_path, name)),
                            source_fs,
                            settings,
                        )
                        .await?;
                }
            }
        }
        Ok(summary)
    }
}

fn is_skippable(error: &Error) -> bool {
    matches!(
        error,
        Error::NotFound { .. } | Error::NotADirectory { .. } | Error::PermissionDenied { .. }
    )
}
