//! In-memory snapshot of a filesystem subtree
//!
//! A `Tree` is either `Absent`, a `Leaf` (anything that cannot be traversed) or a `Directory`
//! holding its own metadata next to its children. The directory's own entry is optional: trees
//! captured from a filesystem always carry it, while trees produced by the reconciliation engine
//! use `None` as a placeholder meaning "nothing is flagged for this directory itself".

use std::collections::BTreeMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

impl EntryKind {
    /// Decode the file type bits of a raw `st_mode` value.
    pub fn from_mode(mode: u32) -> Self {
        match mode & 0o170000 {
            0o100000 => EntryKind::File,
            0o040000 => EntryKind::Directory,
            0o120000 => EntryKind::Symlink,
            _ => EntryKind::Other,
        }
    }

    pub fn from_file_type(file_type: std::fs::FileType) -> Self {
        if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
            EntryKind::Symlink => "symlink",
            EntryKind::Other => "special file",
        };
        write!(f, "{name}")
    }
}

/// Metadata of a single filesystem entry, timestamps in seconds since the epoch
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    pub atime: i64,
    pub mtime: i64,
}

impl Entry {
    pub fn new(kind: EntryKind, atime: i64, mtime: i64) -> Self {
        Self { kind, atime, mtime }
    }

    pub fn file(mtime: i64) -> Self {
        Self::new(EntryKind::File, mtime, mtime)
    }

    pub fn dir(mtime: i64) -> Self {
        Self::new(EntryKind::Directory, mtime, mtime)
    }

    /// Truncate both timestamps down to a multiple of `granularity` seconds.
    pub fn truncated(self, granularity: i64) -> Self {
        if granularity <= 1 {
            return self;
        }
        Self {
            atime: self.atime.div_euclid(granularity) * granularity,
            mtime: self.mtime.div_euclid(granularity) * granularity,
            ..self
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Directory {
    /// metadata of the directory itself, `None` for a placeholder
    pub entry: Option<Entry>,
    pub children: BTreeMap<String, Tree>,
}

impl Directory {
    pub fn new(entry: Option<Entry>) -> Self {
        Self {
            entry,
            children: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Tree {
    #[default]
    Absent,
    Leaf(Entry),
    Directory(Directory),
}

impl Tree {
    /// A directory with no own entry and no children, pruned away unless something is added.
    pub fn marker() -> Self {
        Tree::Directory(Directory::new(None))
    }

    /// A directory carrying its own entry and no children.
    pub fn dir_entry(entry: Entry) -> Self {
        Tree::Directory(Directory::new(Some(entry)))
    }

    /// Builder used mostly by tests: a directory with the given children.
    pub fn dir<I, K>(entry: Entry, children: I) -> Self
    where
        I: IntoIterator<Item = (K, Tree)>,
        K: Into<String>,
    {
        Tree::Directory(Directory {
            entry: Some(entry),
            children: children.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        })
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Tree::Absent)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Tree::Directory(_))
    }

    pub fn as_dir(&self) -> Option<&Directory> {
        match self {
            Tree::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    /// Look up a child by name; anything that is not a directory has no children.
    pub fn child(&self, name: &str) -> Option<&Tree> {
        self.as_dir().and_then(|dir| dir.children.get(name))
    }

    /// Number of leaves in the tree.
    pub fn leaf_count(&self) -> u64 {
        match self {
            Tree::Absent => 0,
            Tree::Leaf(_) => 1,
            Tree::Directory(dir) => dir.children.values().map(Tree::leaf_count).sum(),
        }
    }

    /// Render the tree as a list of indented lines, rooted at `root`.
    pub fn display<'a>(&'a self, root: &'a str, show_types: bool) -> TreeDisplay<'a> {
        TreeDisplay {
            root,
            tree: self,
            show_types,
        }
    }
}

/// Human-readable rendering of a tree, one entry per line
pub struct TreeDisplay<'a> {
    root: &'a str,
    tree: &'a Tree,
    show_types: bool,
}

impl TreeDisplay<'_> {
    fn annotate(&self, entry: Option<&Entry>) -> String {
        match (self.show_types, entry) {
            (true, Some(entry)) => format!(" [{} {}]", entry.kind, entry.mtime),
            _ => String::new(),
        }
    }

    fn write_node(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        name: &str,
        tree: &Tree,
        depth: usize,
    ) -> std::fmt::Result {
        let indent = "  ".repeat(depth);
        match tree {
            Tree::Absent => Ok(()),
            Tree::Leaf(entry) => writeln!(f, "{indent}{name}{}", self.annotate(Some(entry))),
            Tree::Directory(dir) => {
                writeln!(f, "{indent}{name}/{}", self.annotate(dir.entry.as_ref()))?;
                for (child_name, child) in &dir.children {
                    self.write_node(f, child_name, child, depth + 1)?;
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Display for TreeDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.write_node(f, self.root, self.tree, 0)
    }
}
