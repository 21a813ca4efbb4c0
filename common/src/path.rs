//! Backend-specific path syntax and trailing-slash handling of the destination path
//!
//! Paths are plain strings: a remote tree is never a path on the local machine, so the
//! reconciliation engine composes paths only through the `PathSyntax` capability of the
//! backend that owns them.

use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::tree::EntryKind;

/// Path composition rules of a filesystem backend
pub trait PathSyntax {
    fn separator(&self) -> &'static str {
        "/"
    }

    /// Join `leaf` onto `base`; an absolute `leaf` replaces `base` entirely.
    fn join_paths(&self, base: &str, leaf: &str) -> String {
        posix_join(base, leaf)
    }

    /// Split into (head, tail) where tail is everything after the last separator.
    fn split_path(&self, path: &str) -> (String, String) {
        posix_split(path)
    }

    /// Lexically normalize, collapsing repeated separators, `.` and `..` components.
    fn normalize_path(&self, path: &str) -> String {
        posix_normalize(path)
    }

    fn ends_with_separator(&self, path: &str) -> bool {
        path.ends_with(self.separator())
    }
}

/// Plain POSIX path rules
#[derive(Copy, Clone, Debug, Default)]
pub struct PosixPaths;

impl PathSyntax for PosixPaths {}

pub fn posix_join(base: &str, leaf: &str) -> String {
    if leaf.starts_with('/') || base.is_empty() {
        leaf.to_string()
    } else if base.ends_with('/') {
        format!("{base}{leaf}")
    } else {
        format!("{base}/{leaf}")
    }
}

pub fn posix_split(path: &str) -> (String, String) {
    let cut = path.rfind('/').map(|pos| pos + 1).unwrap_or(0);
    let (head, tail) = path.split_at(cut);
    let trimmed = head.trim_end_matches('/');
    // a head made only of slashes stays as is
    let head = if trimmed.is_empty() { head } else { trimmed };
    (head.to_string(), tail.to_string())
}

pub fn posix_normalize(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    // POSIX allows implementation-defined meaning for exactly two leading slashes
    let prefix = if path.starts_with("//") && !path.starts_with("///") {
        "//"
    } else if path.starts_with('/') {
        "/"
    } else {
        ""
    };
    let mut components: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                if components.last().is_some_and(|last| *last != "..") {
                    components.pop();
                } else if prefix.is_empty() {
                    components.push("..");
                }
            }
            other => components.push(other),
        }
    }
    let joined = format!("{prefix}{}", components.join("/"));
    if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Apply the trailing-slash convention of directory sync tools to the destination path.
///
/// When the destination is an existing directory, a source file or a source directory given
/// without a trailing separator is nested inside it (`/a/b` -> `/x/` becomes `/x/b`), while a
/// source directory given with a trailing separator has its contents synced directly into it.
pub async fn fix_destination_paths(
    source_path: &str,
    source_fs: &dyn FileSystem,
    destination_path: &str,
    destination_fs: &dyn FileSystem,
) -> Result<(String, String)> {
    let unchanged = || Ok((source_path.to_string(), destination_path.to_string()));
    let destination = match destination_fs.lstat(destination_path).await {
        Ok(entry) => entry,
        Err(error) if error.is_not_found() => return unchanged(),
        Err(error) => return Err(error),
    };
    match destination.kind {
        EntryKind::Symlink => {
            return Err(Error::UnsupportedSymlinkDestination {
                path: destination_path.to_string(),
            });
        }
        EntryKind::Directory => {}
        _ => return unchanged(),
    }
    let source = match source_fs.lstat(source_path).await {
        Ok(entry) => entry,
        Err(error) if error.is_not_found() => return unchanged(),
        Err(error) => return Err(error),
    };
    let nest = match source.kind {
        EntryKind::File => true,
        EntryKind::Directory => {
            !(source_fs.ends_with_separator(source_path) || source_path.ends_with('\\'))
        }
        _ => false,
    };
    if !nest {
        return unchanged();
    }
    let (_, basename) = source_fs.split_path(source_path);
    let destination_path = destination_fs.join_paths(destination_path, &basename);
    tracing::debug!("destination path resolved to {destination_path}");
    Ok((source_path.to_string(), destination_path))
}
