//! Post-processing of reconciliation results

use crate::tree::{Directory, Tree};

/// Drop placeholders from a tree.
///
/// A directory is kept when it carries its own entry or when any child survives; a
/// placeholder directory with nothing left underneath collapses to `Tree::Absent`.
pub fn prune(tree: Tree) -> Tree {
    match tree {
        Tree::Directory(dir) => {
            let children: std::collections::BTreeMap<String, Tree> = dir
                .children
                .into_iter()
                .filter_map(|(name, child)| {
                    let child = prune(child);
                    (!child.is_absent()).then_some((name, child))
                })
                .collect();
            if dir.entry.is_none() && children.is_empty() {
                Tree::Absent
            } else {
                Tree::Directory(Directory {
                    entry: dir.entry,
                    children,
                })
            }
        }
        other => other,
    }
}

/// Keep the part of `unaccounted` that does not lead to anything in `excluded`.
///
/// Used when unaccounted destination entries are deleted but excluded ones are not: a
/// directory that is an ancestor of an excluded entry loses its own entry, so removing the
/// result never tries to remove that directory. Both inputs are expected to be pruned.
pub fn remove_excluded_from_unaccounted(unaccounted: &Tree, excluded: &Tree) -> Tree {
    match (unaccounted, excluded) {
        (_, Tree::Absent) => unaccounted.clone(),
        (Tree::Directory(dir), _) => {
            let mut kept = Directory::new(None);
            for (name, child) in &dir.children {
                let protected = excluded.child(name).unwrap_or(&Tree::Absent);
                let child = remove_excluded_from_unaccounted(child, protected);
                if !child.is_absent() {
                    kept.children.insert(name.clone(), child);
                }
            }
            Tree::Directory(kept)
        }
        _ => unaccounted.clone(),
    }
}
