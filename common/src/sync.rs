//! Sync orchestration: capture, reconcile, delete, copy

use crate::diff::{Conflict, DiffSettings, diff_trees};
use crate::error::{Error, Result};
use crate::exclude::ExcludePatterns;
use crate::fs::{CaptureSettings, FileSystem, PushSettings};
use crate::path::fix_destination_paths;
use crate::prune::{prune, remove_excluded_from_unaccounted};
use crate::summary::Summary;
use crate::tree::Tree;

/// Timestamp granularity used unless configured otherwise, in seconds
pub const DEFAULT_TIME_GRANULARITY: i64 = 60;

#[derive(Debug, Clone)]
pub struct Settings {
    /// remove unaccounted destination entries, keeping ancestors of excluded ones
    pub delete: bool,
    /// remove excluded destination entries
    pub delete_excluded: bool,
    pub dry_run: bool,
    /// replace a file with a directory (or back) instead of failing
    pub force: bool,
    pub follow_symlinks: bool,
    pub show_progress: bool,
    pub time_granularity: i64,
    /// patterns relative to the destination root
    pub excludes: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            delete: false,
            delete_excluded: false,
            dry_run: false,
            force: false,
            follow_symlinks: false,
            show_progress: false,
            time_granularity: DEFAULT_TIME_GRANULARITY,
            excludes: Vec::new(),
        }
    }
}

/// Pruned reconciliation results of one run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub delete: Tree,
    pub copy: Tree,
    pub excluded_source: Tree,
    pub unaccounted_destination: Tree,
    pub excluded_destination: Tree,
    /// unaccounted entries minus the ancestors of excluded ones
    pub unaccounted_non_excluded: Tree,
    pub conflicts: Vec<Conflict>,
}

impl Plan {
    /// Trees to remove from the destination, in order, each with its log label.
    pub fn deletions(&self, settings: &Settings) -> Vec<(&'static str, &Tree)> {
        let mut deletions = vec![("delete tree", &self.delete)];
        if settings.delete_excluded {
            deletions.push(("destination excluded tree", &self.excluded_destination));
        }
        match (settings.delete, settings.delete_excluded) {
            (true, true) => {
                deletions.push(("destination unaccounted tree", &self.unaccounted_destination));
            }
            (true, false) => {
                deletions.push((
                    "non-excluded-supporting destination unaccounted tree",
                    &self.unaccounted_non_excluded,
                ));
            }
            _ => {}
        }
        deletions
    }
}

/// Reconcile two captured trees into a pruned `Plan`.
pub fn plan(
    source: &Tree,
    destination: &Tree,
    source_path: &str,
    destination_path: &str,
    diff_settings: &DiffSettings,
) -> Result<Plan> {
    let diff = diff_trees(
        source,
        destination,
        source_path,
        destination_path,
        diff_settings,
    )?
    .pruned();
    let unaccounted_non_excluded = prune(remove_excluded_from_unaccounted(
        &diff.unaccounted_destination,
        &diff.excluded_destination,
    ));
    Ok(Plan {
        delete: diff.delete,
        copy: diff.copy,
        excluded_source: diff.excluded_source,
        unaccounted_destination: diff.unaccounted_destination,
        excluded_destination: diff.excluded_destination,
        unaccounted_non_excluded,
        conflicts: diff.conflicts,
    })
}

fn log_tree(label: &str, root: &str, tree: &Tree, show_types: bool) {
    if tree.is_absent() {
        tracing::debug!("{label}: empty");
    } else {
        tracing::debug!("{label}:\n{}", tree.display(root, show_types));
    }
}

fn progress_bar(files: u64) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new(files);
    let style = indicatif::ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {wide_bar} {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// Make the tree at `destination_path` on `destination_fs` reflect the one at `source_path`.
pub async fn sync(
    source_path: &str,
    source_fs: &dyn FileSystem,
    destination_path: &str,
    destination_fs: &dyn FileSystem,
    settings: &Settings,
) -> Result<Summary> {
    let (source_path, destination_path) =
        fix_destination_paths(source_path, source_fs, destination_path, destination_fs).await?;
    let source_path = source_fs.normalize_path(&source_path);
    let destination_path = destination_fs.normalize_path(&destination_path);
    tracing::debug!(
        "syncing {}:{source_path} -> {}:{destination_path}",
        source_fs.name(),
        destination_fs.name()
    );

    let capture = CaptureSettings {
        follow_symlinks: settings.follow_symlinks,
        time_granularity: settings.time_granularity,
    };
    let source = source_fs.get_tree(&source_path, &capture).await?;
    let destination = match destination_fs.get_tree(&destination_path, &capture).await {
        Ok(tree) => tree,
        Err(error) if error.is_not_found() => Tree::Absent,
        Err(error) => return Err(error),
    };
    log_tree("Source tree", &source_path, &source, true);
    log_tree("Destination tree", &destination_path, &destination, true);

    let excludes = ExcludePatterns::anchored(
        &settings.excludes,
        &destination_path,
        source.is_dir(),
        destination_fs.path_syntax(),
    )?;
    tracing::debug!("Exclude patterns: {:?}", excludes.patterns().collect::<Vec<_>>());

    let diff_settings = DiffSettings {
        excludes: &excludes,
        source_paths: source_fs.path_syntax(),
        destination_paths: destination_fs.path_syntax(),
        overwrite_conflict_is_fatal: !settings.dry_run && !settings.force,
    };
    let plan = plan(
        &source,
        &destination,
        &source_path,
        &destination_path,
        &diff_settings,
    )?;
    for conflict in &plan.conflicts {
        tracing::warn!("{conflict}");
    }
    log_tree("Delete tree", &destination_path, &plan.delete, false);
    log_tree(
        "Copy tree",
        &format!("{source_path} --> {destination_path}"),
        &plan.copy,
        false,
    );
    log_tree("Source excluded tree", &source_path, &plan.excluded_source, false);
    log_tree(
        "Destination unaccounted tree",
        &destination_path,
        &plan.unaccounted_destination,
        false,
    );
    log_tree(
        "Destination excluded tree",
        &destination_path,
        &plan.excluded_destination,
        false,
    );
    log_tree(
        "Non-excluded-supporting destination unaccounted tree",
        &destination_path,
        &plan.unaccounted_non_excluded,
        false,
    );

    tracing::info!("SYNCING");
    let mut summary = Summary::default();
    for (label, tree) in plan.deletions(settings) {
        if tree.is_absent() {
            tracing::info!("Empty {label}");
            continue;
        }
        tracing::info!("Deleting {label}");
        summary += destination_fs
            .remove_tree(&destination_path, tree, settings.dry_run)
            .await?;
    }

    if plan.copy.is_absent() {
        tracing::info!("Empty copy tree");
        return Ok(summary);
    }
    tracing::info!("Copying copy tree");
    let push = PushSettings {
        dry_run: settings.dry_run,
        progress: settings
            .show_progress
            .then(|| progress_bar(plan.copy.leaf_count())),
    };
    let copied = destination_fs
        .push_tree_here(
            &source_path,
            ".",
            &plan.copy,
            &destination_path,
            source_fs,
            &push,
        )
        .await;
    if let Some(bar) = &push.progress {
        bar.finish_and_clear();
    }
    summary += copied?;
    Ok(summary)
}

/// Expand a leading `~` to the home directory, the way a shell would for a local path.
pub fn expand_home(path: &str) -> Result<String> {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return Ok(path.to_string()),
    };
    let home = std::env::var("HOME").map_err(|error| {
        Error::Other(anyhow::Error::new(error).context("cannot expand ~ without $HOME"))
    })?;
    Ok(format!("{home}{rest}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileSystem;
    use crate::path::PosixPaths;
    use crate::tree::{Directory, Entry};
    use tracing_test::traced_test;

    fn file(mtime: i64) -> Tree {
        Tree::Leaf(Entry::file(mtime))
    }

    fn plan_for(source: &Tree, destination: &Tree, excludes: &[&str], fatal: bool) -> Result<Plan> {
        let excludes = ExcludePatterns::new(excludes).unwrap();
        let settings = DiffSettings {
            excludes: &excludes,
            source_paths: &PosixPaths,
            destination_paths: &PosixPaths,
            overwrite_conflict_is_fatal: fatal,
        };
        plan(source, destination, "/src", "/dst", &settings)
    }

    fn labels(plan: &Plan, delete: bool, delete_excluded: bool) -> Vec<&'static str> {
        let settings = Settings {
            delete,
            delete_excluded,
            ..Settings::default()
        };
        plan.deletions(&settings)
            .into_iter()
            .map(|(label, _)| label)
            .collect()
    }

    #[test]
    fn deletion_policy() {
        let plan = Plan::default();
        assert_eq!(labels(&plan, false, false), vec!["delete tree"]);
        assert_eq!(
            labels(&plan, false, true),
            vec!["delete tree", "destination excluded tree"]
        );
        assert_eq!(
            labels(&plan, true, false),
            vec![
                "delete tree",
                "non-excluded-supporting destination unaccounted tree"
            ]
        );
        assert_eq!(
            labels(&plan, true, true),
            vec![
                "delete tree",
                "destination excluded tree",
                "destination unaccounted tree"
            ]
        );
    }

    #[test]
    fn plan_protects_parents_of_excluded_entries() {
        let source = Tree::dir(Entry::dir(1), [("keep", file(1))]);
        let destination = Tree::dir(
            Entry::dir(1),
            [
                ("keep", file(1)),
                (
                    "photos",
                    Tree::dir(Entry::dir(1), [("a.jpg", file(1)), ("b.tmp", file(1))]),
                ),
            ],
        );
        let plan = plan_for(&source, &destination, &["/dst/*.tmp"], true).unwrap();
        assert!(plan.copy.is_absent());
        assert!(plan.delete.is_absent());
        // photos/ itself stays when only unaccounted entries are deleted
        let photos = plan
            .unaccounted_non_excluded
            .child("photos")
            .and_then(Tree::as_dir)
            .unwrap();
        assert_eq!(photos.entry, None);
        assert_eq!(photos.children.keys().collect::<Vec<_>>(), vec!["a.jpg"]);
        // the full unaccounted tree does include it
        let photos = plan
            .unaccounted_destination
            .child("photos")
            .and_then(Tree::as_dir)
            .unwrap();
        assert!(photos.entry.is_some());
    }

    #[test]
    fn plan_reports_conflicts_unless_fatal() {
        let source = Tree::dir(Entry::dir(1), [("x", file(1))]);
        let destination = Tree::dir(Entry::dir(1), [("x", Tree::dir_entry(Entry::dir(1)))]);
        assert!(matches!(
            plan_for(&source, &destination, &[], true),
            Err(Error::TypeConflict { .. })
        ));
        let plan = plan_for(&source, &destination, &[], false).unwrap();
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(
            plan.delete,
            Tree::Directory(Directory {
                entry: None,
                children: [("x".to_string(), Tree::dir_entry(Entry::dir(1)))].into(),
            })
        );
    }

    #[test]
    fn expand_home_only_touches_leading_tilde() {
        let Ok(home) = std::env::var("HOME") else {
            return;
        };
        assert_eq!(expand_home("~").unwrap(), home);
        assert_eq!(expand_home("~/music").unwrap(), format!("{home}/music"));
        assert_eq!(expand_home("~user/music").unwrap(), "~user/music");
        assert_eq!(expand_home("/a/~/b").unwrap(), "/a/~/b");
    }

    fn set_mtime(path: &std::path::Path, mtime: i64) {
        let time = filetime::FileTime::from_unix_time(mtime, 0);
        filetime::set_file_times(path, time, time).unwrap();
    }

    fn path_str(path: &std::path::Path) -> String {
        path.to_string_lossy().to_string()
    }

    // src/
    //   a.txt     newer than on the destination
    //   b.txt     only on the source
    //   sub/c.txt same on both sides
    // dst/
    //   a.txt
    //   old.txt   only on the destination
    //   sub/c.txt
    //   cache/x.tmp  excluded
    fn setup() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        for dir in [src.join("sub"), dst.join("sub"), dst.join("cache")] {
            std::fs::create_dir_all(dir).unwrap();
        }
        std::fs::write(src.join("a.txt"), "new a").unwrap();
        std::fs::write(src.join("b.txt"), "b").unwrap();
        std::fs::write(src.join("sub/c.txt"), "c").unwrap();
        std::fs::write(dst.join("a.txt"), "old a").unwrap();
        std::fs::write(dst.join("old.txt"), "old").unwrap();
        std::fs::write(dst.join("sub/c.txt"), "c").unwrap();
        std::fs::write(dst.join("cache/x.tmp"), "x").unwrap();
        set_mtime(&src.join("a.txt"), 2_000);
        set_mtime(&dst.join("a.txt"), 1_000);
        for path in [src.join("b.txt"), src.join("sub/c.txt"), dst.join("sub/c.txt")] {
            set_mtime(&path, 1_500);
        }
        for path in [dst.join("old.txt"), dst.join("cache/x.tmp")] {
            set_mtime(&path, 500);
        }
        tmp
    }

    async fn sync_dirs(tmp: &tempfile::TempDir, settings: &Settings) -> Result<Summary> {
        let fs = LocalFileSystem::new();
        let src = format!("{}/", path_str(&tmp.path().join("src")));
        let dst = path_str(&tmp.path().join("dst"));
        sync(&src, &fs, &dst, &fs, settings).await
    }

    #[tokio::test]
    #[traced_test]
    async fn sync_copies_newer_and_missing_files() {
        let tmp = setup();
        let settings = Settings {
            excludes: vec!["cache".to_string()],
            time_granularity: 1,
            ..Settings::default()
        };
        let summary = sync_dirs(&tmp, &settings).await.unwrap();
        assert_eq!(summary.files_copied, 2);
        assert_eq!(summary.files_removed, 1);
        let dst = tmp.path().join("dst");
        assert_eq!(std::fs::read_to_string(dst.join("a.txt")).unwrap(), "new a");
        assert_eq!(std::fs::read_to_string(dst.join("b.txt")).unwrap(), "b");
        // nothing was asked to be deleted
        assert!(dst.join("old.txt").exists());
        assert!(dst.join("cache/x.tmp").exists());
        assert!(logs_contain("SYNCING"));
        assert!(logs_contain("Deleting delete tree"));

        // a second run has nothing left to do
        let summary = sync_dirs(&tmp, &settings).await.unwrap();
        assert_eq!(summary, Summary::default());
    }

    #[tokio::test]
    async fn sync_delete_keeps_excluded() {
        let tmp = setup();
        let settings = Settings {
            delete: true,
            excludes: vec!["cache/*".to_string()],
            time_granularity: 1,
            ..Settings::default()
        };
        sync_dirs(&tmp, &settings).await.unwrap();
        let dst = tmp.path().join("dst");
        assert!(!dst.join("old.txt").exists());
        assert!(dst.join("cache/x.tmp").exists());
        assert!(dst.join("sub/c.txt").exists());
    }

    #[tokio::test]
    async fn sync_delete_excluded_removes_everything_unaccounted() {
        let tmp = setup();
        let settings = Settings {
            delete: true,
            delete_excluded: true,
            excludes: vec!["cache/*".to_string()],
            time_granularity: 1,
            ..Settings::default()
        };
        let summary = sync_dirs(&tmp, &settings).await.unwrap();
        let dst = tmp.path().join("dst");
        assert!(!dst.join("old.txt").exists());
        assert!(!dst.join("cache").exists());
        // a.txt is replaced, old.txt and cache/x.tmp are gone
        assert_eq!(summary.files_removed, 3);
        assert_eq!(summary.directories_removed, 1);
    }

    #[tokio::test]
    async fn dry_run_changes_nothing() {
        let tmp = setup();
        let settings = Settings {
            delete: true,
            delete_excluded: true,
            dry_run: true,
            time_granularity: 1,
            ..Settings::default()
        };
        let summary = sync_dirs(&tmp, &settings).await.unwrap();
        assert_eq!(summary.files_copied, 2);
        assert_eq!(summary.bytes_copied, 0);
        let dst = tmp.path().join("dst");
        assert_eq!(std::fs::read_to_string(dst.join("a.txt")).unwrap(), "old a");
        assert!(dst.join("old.txt").exists());
        assert!(!dst.join("b.txt").exists());
    }

    #[tokio::test]
    async fn missing_destination_is_created() {
        let tmp = setup();
        let fs = LocalFileSystem::new();
        let src = path_str(&tmp.path().join("src"));
        let dst = path_str(&tmp.path().join("fresh"));
        let summary = sync(&src, &fs, &dst, &fs, &Settings::default()).await.unwrap();
        assert_eq!(summary.files_copied, 3);
        assert_eq!(summary.directories_created, 2);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("fresh/sub/c.txt")).unwrap(),
            "c"
        );
    }

    #[tokio::test]
    async fn missing_source_is_fatal() {
        let tmp = setup();
        let fs = LocalFileSystem::new();
        let src = path_str(&tmp.path().join("nope"));
        let dst = path_str(&tmp.path().join("dst"));
        let result = sync(&src, &fs, &dst, &fs, &Settings::default()).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn type_conflict_needs_force() {
        let tmp = setup();
        std::fs::create_dir(tmp.path().join("src/old.txt")).unwrap();
        std::fs::write(tmp.path().join("src/old.txt/inner"), "i").unwrap();
        let settings = Settings {
            time_granularity: 1,
            ..Settings::default()
        };
        let result = sync_dirs(&tmp, &settings).await;
        assert!(matches!(result, Err(Error::TypeConflict { .. })));
        // nothing happened before the conflict was detected
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("dst/a.txt")).unwrap(),
            "old a"
        );

        let settings = Settings {
            force: true,
            ..settings
        };
        sync_dirs(&tmp, &settings).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("dst/old.txt/inner")).unwrap(),
            "i"
        );
    }
}
