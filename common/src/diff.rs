//! Tree reconciliation: partition two snapshots into what to delete, copy and leave alone
//!
//! `diff_trees` walks a source and a destination snapshot side by side and routes every node
//! into one of five result trees:
//!
//! - `delete`: destination entries that have to go before the copy
//! - `copy`: source entries to transfer
//! - `excluded_source`: source entries matching an exclude pattern
//! - `unaccounted_destination`: destination entries with no source counterpart
//! - `excluded_destination`: destination entries matching an exclude pattern
//!
//! Directories in the results may be placeholders (`Directory { entry: None, .. }`) holding
//! flagged descendants. Run the results through `prune` before acting on them.
//!
//! Exclude patterns are tested against the destination-side path of every visited node. An
//! excluded directory is routed as a whole and not descended into.

use crate::error::{Error, Result};
use crate::exclude::ExcludePatterns;
use crate::path::PathSyntax;
use crate::prune::prune;
use crate::tree::{Directory, Entry, EntryKind, Tree};

/// A file and a directory meeting at the same non-excluded path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conflict {
    pub source_path: String,
    pub source_kind: EntryKind,
    pub destination_path: String,
    pub destination_kind: EntryKind,
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Overwriting {} {} with {} {}",
            self.destination_kind, self.destination_path, self.source_kind, self.source_path
        )
    }
}

impl From<Conflict> for Error {
    fn from(conflict: Conflict) -> Self {
        Error::TypeConflict {
            source_path: conflict.source_path,
            source_kind: conflict.source_kind,
            destination_path: conflict.destination_path,
            destination_kind: conflict.destination_kind,
        }
    }
}

/// The five partitions of a reconciliation, plus the conflicts resolved along the way
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Diff {
    pub delete: Tree,
    pub copy: Tree,
    pub excluded_source: Tree,
    pub unaccounted_destination: Tree,
    pub excluded_destination: Tree,
    /// type conflicts that were resolved destructively, only when they are not fatal
    pub conflicts: Vec<Conflict>,
}

impl Diff {
    /// Drop placeholders from every partition.
    pub fn pruned(self) -> Self {
        Self {
            delete: prune(self.delete),
            copy: prune(self.copy),
            excluded_source: prune(self.excluded_source),
            unaccounted_destination: prune(self.unaccounted_destination),
            excluded_destination: prune(self.excluded_destination),
            conflicts: self.conflicts,
        }
    }
}

#[derive(Copy, Clone)]
pub struct DiffSettings<'a> {
    pub excludes: &'a ExcludePatterns,
    pub source_paths: &'a dyn PathSyntax,
    pub destination_paths: &'a dyn PathSyntax,
    /// abort with `Error::TypeConflict` instead of replacing a file with a directory (or back)
    pub overwrite_conflict_is_fatal: bool,
}

/// Reconcile `source` (found at `source_path`) against `destination` (at `destination_path`).
///
/// Neither input is modified. Recursion depth equals the depth of the deeper tree.
pub fn diff_trees(
    source: &Tree,
    destination: &Tree,
    source_path: &str,
    destination_path: &str,
    settings: &DiffSettings,
) -> Result<Diff> {
    Differ { settings }.diff(source, destination, source_path, destination_path)
}

fn adopt(parent: &mut Directory, name: &str, child: Tree) {
    if !child.is_absent() {
        parent.children.insert(name.to_string(), child);
    }
}

struct Differ<'s, 'a> {
    settings: &'s DiffSettings<'a>,
}

impl Differ<'_, '_> {
    fn child_paths(&self, source_path: &str, destination_path: &str, name: &str) -> (String, String) {
        (
            self.settings.source_paths.join_paths(source_path, name),
            self.settings.destination_paths.join_paths(destination_path, name),
        )
    }

    fn is_excluded(&self, destination_path: &str) -> bool {
        match self.settings.excludes.matching(destination_path) {
            Some(pattern) => {
                tracing::trace!("{destination_path} is excluded by {pattern:?}");
                true
            }
            None => false,
        }
    }

    fn conflict(
        &self,
        source_path: &str,
        source_kind: EntryKind,
        destination_path: &str,
        destination_kind: EntryKind,
    ) -> Result<Conflict> {
        let conflict = Conflict {
            source_path: source_path.to_string(),
            source_kind,
            destination_path: destination_path.to_string(),
            destination_kind,
        };
        if self.settings.overwrite_conflict_is_fatal {
            return Err(conflict.into());
        }
        Ok(conflict)
    }

    fn diff(
        &self,
        source: &Tree,
        destination: &Tree,
        source_path: &str,
        destination_path: &str,
    ) -> Result<Diff> {
        let excluded = self.is_excluded(destination_path);
        match (source, destination) {
            (Tree::Absent, Tree::Absent) => Ok(Diff::default()),
            (Tree::Absent, Tree::Leaf(_)) => Ok(if excluded {
                Diff {
                    excluded_destination: destination.clone(),
                    ..Diff::default()
                }
            } else {
                Diff {
                    unaccounted_destination: destination.clone(),
                    ..Diff::default()
                }
            }),
            (Tree::Absent, Tree::Directory(dst)) => {
                if excluded {
                    return Ok(Diff {
                        delete: Tree::marker(),
                        unaccounted_destination: Tree::marker(),
                        excluded_destination: destination.clone(),
                        ..Diff::default()
                    });
                }
                self.destination_only(dst, source_path, destination_path)
            }
            (Tree::Leaf(_), Tree::Absent) => Ok(if excluded {
                Diff {
                    excluded_source: source.clone(),
                    ..Diff::default()
                }
            } else {
                Diff {
                    copy: source.clone(),
                    ..Diff::default()
                }
            }),
            (Tree::Leaf(src), Tree::Leaf(dst)) => Ok(if excluded {
                Diff {
                    excluded_source: source.clone(),
                    excluded_destination: destination.clone(),
                    ..Diff::default()
                }
            } else if src.mtime > dst.mtime {
                Diff {
                    delete: destination.clone(),
                    copy: source.clone(),
                    ..Diff::default()
                }
            } else {
                Diff::default()
            }),
            (Tree::Leaf(src), Tree::Directory(_)) => {
                if excluded {
                    return Ok(Diff {
                        delete: Tree::marker(),
                        excluded_source: source.clone(),
                        unaccounted_destination: Tree::marker(),
                        excluded_destination: destination.clone(),
                        ..Diff::default()
                    });
                }
                let conflict = self.conflict(
                    source_path,
                    src.kind,
                    destination_path,
                    EntryKind::Directory,
                )?;
                Ok(Diff {
                    delete: destination.clone(),
                    copy: source.clone(),
                    unaccounted_destination: Tree::marker(),
                    excluded_destination: Tree::marker(),
                    conflicts: vec![conflict],
                    ..Diff::default()
                })
            }
            (Tree::Directory(src), Tree::Absent) => {
                if excluded {
                    return Ok(Diff {
                        copy: Tree::marker(),
                        excluded_source: source.clone(),
                        ..Diff::default()
                    });
                }
                self.source_only(src, source_path, destination_path)
            }
            (Tree::Directory(src), Tree::Leaf(dst)) => {
                if excluded {
                    return Ok(Diff {
                        copy: Tree::marker(),
                        excluded_source: source.clone(),
                        excluded_destination: destination.clone(),
                        ..Diff::default()
                    });
                }
                let conflict = self.conflict(
                    source_path,
                    EntryKind::Directory,
                    destination_path,
                    dst.kind,
                )?;
                let mut diff = self.source_only(src, source_path, destination_path)?;
                diff.delete = destination.clone();
                diff.conflicts.insert(0, conflict);
                Ok(diff)
            }
            (Tree::Directory(src), Tree::Directory(dst)) => {
                if excluded {
                    return Ok(Diff {
                        delete: Tree::marker(),
                        copy: Tree::marker(),
                        excluded_source: source.clone(),
                        unaccounted_destination: Tree::marker(),
                        excluded_destination: destination.clone(),
                        ..Diff::default()
                    });
                }
                self.both(src, dst, source_path, destination_path)
            }
        }
    }

    /// A source directory with nothing on the destination side, or a file that is replaced.
    fn source_only(
        &self,
        src: &Directory,
        source_path: &str,
        destination_path: &str,
    ) -> Result<Diff> {
        let mut copy = Directory::new(src.entry);
        let mut excluded_source = Directory::new(None);
        let mut conflicts = Vec::new();
        for (name, child) in &src.children {
            let (child_source, child_destination) =
                self.child_paths(source_path, destination_path, name);
            let diff = self.diff(child, &Tree::Absent, &child_source, &child_destination)?;
            adopt(&mut copy, name, diff.copy);
            adopt(&mut excluded_source, name, diff.excluded_source);
            conflicts.extend(diff.conflicts);
        }
        Ok(Diff {
            copy: Tree::Directory(copy),
            excluded_source: Tree::Directory(excluded_source),
            conflicts,
            ..Diff::default()
        })
    }

    /// A destination directory with no source counterpart.
    fn destination_only(
        &self,
        dst: &Directory,
        source_path: &str,
        destination_path: &str,
    ) -> Result<Diff> {
        let mut delete = Directory::new(None);
        let mut unaccounted_destination = Directory::new(dst.entry);
        let mut excluded_destination = Directory::new(None);
        for (name, child) in &dst.children {
            let (child_source, child_destination) =
                self.child_paths(source_path, destination_path, name);
            let diff = self.diff(&Tree::Absent, child, &child_source, &child_destination)?;
            adopt(&mut delete, name, diff.delete);
            adopt(&mut unaccounted_destination, name, diff.unaccounted_destination);
            adopt(&mut excluded_destination, name, diff.excluded_destination);
        }
        Ok(Diff {
            delete: Tree::Directory(delete),
            unaccounted_destination: Tree::Directory(unaccounted_destination),
            excluded_destination: Tree::Directory(excluded_destination),
            ..Diff::default()
        })
    }

    /// Two directories: every source child against its counterpart, then destination-only
    /// children against nothing.
    fn both(
        &self,
        src: &Directory,
        dst: &Directory,
        source_path: &str,
        destination_path: &str,
    ) -> Result<Diff> {
        let mut delete = Directory::new(None);
        let mut copy = Directory::new(None);
        let mut excluded_source = Directory::new(None);
        let mut unaccounted_destination = Directory::new(None);
        let mut excluded_destination = Directory::new(None);
        let mut conflicts = Vec::new();
        for (name, child) in &src.children {
            let (child_source, child_destination) =
                self.child_paths(source_path, destination_path, name);
            let counterpart = dst.children.get(name).unwrap_or(&Tree::Absent);
            let diff = self.diff(child, counterpart, &child_source, &child_destination)?;
            adopt(&mut delete, name, diff.delete);
            adopt(&mut copy, name, diff.copy);
            adopt(&mut excluded_source, name, diff.excluded_source);
            adopt(&mut unaccounted_destination, name, diff.unaccounted_destination);
            adopt(&mut excluded_destination, name, diff.excluded_destination);
            conflicts.extend(diff.conflicts);
        }
        for (name, child) in &dst.children {
            if src.children.contains_key(name) {
                continue;
            }
            let (child_source, child_destination) =
                self.child_paths(source_path, destination_path, name);
            let diff = self.diff(&Tree::Absent, child, &child_source, &child_destination)?;
            adopt(&mut delete, name, diff.delete);
            adopt(&mut unaccounted_destination, name, diff.unaccounted_destination);
            adopt(&mut excluded_destination, name, diff.excluded_destination);
        }
        Ok(Diff {
            delete: Tree::Directory(delete),
            copy: Tree::Directory(copy),
            excluded_source: Tree::Directory(excluded_source),
            unaccounted_destination: Tree::Directory(unaccounted_destination),
            excluded_destination: Tree::Directory(excluded_destination),
            conflicts,
        })
    }
}

/// Paths of the leaves of `tree`, relative to its root and joined with `/`.
pub fn leaf_paths(tree: &Tree) -> Vec<(String, Entry)> {
    fn walk(tree: &Tree, prefix: &str, out: &mut Vec<(String, Entry)>) {
        match tree {
            Tree::Absent => {}
            Tree::Leaf(entry) => out.push((prefix.to_string(), *entry)),
            Tree::Directory(dir) => {
                for (name, child) in &dir.children {
                    let path = if prefix.is_empty() {
                        name.clone()
                    } else {
                        format!("{prefix}/{name}")
                    };
                    walk(child, &path, out);
                }
            }
        }
    }
    let mut out = Vec::new();
    walk(tree, "", &mut out);
    out
}
