//! Backend driven through a remote shell command such as `adb shell` or `ssh host`
//!
//! Every operation is a single POSIX shell command string handed as the last argument to the
//! configured command prefix. Only tools available on a stock Android (toybox) or any Linux
//! userland are used: `sh`, `printf`, `stat`, `find`, `realpath`, `rm`, `rmdir`, `mkdir`,
//! `touch` and `cat`.

use std::process::Stdio;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::fs::{FileSystem, Writer};
use crate::path::PathSyntax;
use crate::tree::{Entry, EntryKind};

const STAT_FORMAT: &str = "%f %X %Y";

#[derive(Clone, Debug)]
pub struct ShellFileSystem {
    command: Vec<String>,
}

/// Quote `value` so the remote shell passes it through as a single word.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn parse_stat_fields(line: &str) -> anyhow::Result<(Entry, Option<&str>)> {
    let mut fields = line.splitn(4, ' ');
    let mut next = |what: &str| {
        fields
            .next()
            .ok_or_else(|| anyhow!("missing {what} in stat output {line:?}"))
    };
    let mode = u32::from_str_radix(next("mode")?, 16)
        .with_context(|| format!("invalid mode in stat output {line:?}"))?;
    let atime = next("atime")?
        .parse::<i64>()
        .with_context(|| format!("invalid atime in stat output {line:?}"))?;
    let mtime = next("mtime")?
        .parse::<i64>()
        .with_context(|| format!("invalid mtime in stat output {line:?}"))?;
    let entry = Entry::new(EntryKind::from_mode(mode), atime, mtime);
    Ok((entry, fields.next()))
}

/// Parse `read_dir` output: one record per entry, the stat line, a newline, then the full
/// path terminated by NUL. Paths may contain newlines themselves.
fn parse_listing(output: &str) -> anyhow::Result<Vec<(Entry, &str)>> {
    output
        .split('\0')
        .filter(|record| !record.is_empty())
        .map(|record| {
            let (stat_line, full_path) = record
                .split_once('\n')
                .ok_or_else(|| anyhow!("missing name in listing record {record:?}"))?;
            let (entry, _) = parse_stat_fields(stat_line)?;
            Ok((entry, full_path))
        })
        .collect()
}

impl ShellFileSystem {
    pub fn new(command: Vec<String>) -> anyhow::Result<Self> {
        if command.is_empty() {
            return Err(anyhow!("remote shell command must not be empty"));
        }
        Ok(Self { command })
    }

    /// Build from a whitespace separated command line, e.g. "adb -s SERIAL shell".
    pub fn from_command_line(command_line: &str) -> anyhow::Result<Self> {
        Self::new(command_line.split_whitespace().map(str::to_string).collect())
    }

    fn command(&self, script: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("LC_ALL", "C")
            .kill_on_drop(true);
        cmd
    }

    fn check(&self, script: &str, path: &str, output: &std::process::Output) -> Result<()> {
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let path = path.to_string();
        if stderr.contains("No such file or directory") {
            Err(Error::NotFound { path })
        } else if stderr.contains("Not a directory") {
            Err(Error::NotADirectory { path })
        } else if stderr.contains("Permission denied") {
            Err(Error::PermissionDenied { path })
        } else {
            Err(Error::CommandFailed {
                command: script.to_string(),
                status: output.status.to_string(),
                stderr,
            })
        }
    }

    /// Run `script` remotely and return its standard output.
    async fn run(&self, script: &str, path: &str) -> Result<String> {
        tracing::trace!("running {:?} {:?}", &self.command, script);
        let output = self
            .command(script)
            .output()
            .await
            .with_context(|| format!("failed to spawn {:?}", &self.command))?;
        self.check(script, path, &output)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Check that the remote shell answers at all.
    pub async fn test_connection(&self) -> bool {
        match self.run("true", "").await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!("connection test failed: {error}");
                false
            }
        }
    }
}

impl PathSyntax for ShellFileSystem {}

#[async_trait]
impl FileSystem for ShellFileSystem {
    fn name(&self) -> &str {
        "remote"
    }

    fn path_syntax(&self) -> &dyn PathSyntax {
        self
    }

    async fn lstat(&self, path: &str) -> Result<Entry> {
        let script = format!("stat -c '{STAT_FORMAT}' {}", quote(path));
        let stdout = self.run(&script, path).await?;
        let (entry, _) = parse_stat_fields(stdout.trim_end())?;
        Ok(entry)
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<(String, Entry)>> {
        // the name follows its stat line and ends with NUL, so names may hold newlines
        let script = format!(
            "find {} -mindepth 1 -maxdepth 1 -exec sh -c \
             'for f; do stat -c \"{STAT_FORMAT}\" \"$f\" && printf \"%s\\0\" \"$f\"; done' sh {{}} +",
            quote(path)
        );
        let stdout = self.run(&script, path).await?;
        let listing = parse_listing(&stdout)?
            .into_iter()
            .map(|(entry, full_path)| {
                let (_, name) = self.split_path(full_path);
                (name, entry)
            })
            .collect();
        Ok(listing)
    }

    async fn realpath(&self, path: &str) -> Result<String> {
        let stdout = self.run(&format!("realpath {}", quote(path)), path).await?;
        Ok(stdout.trim_end_matches('\n').to_string())
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        self.run(&format!("rm {}", quote(path)), path).await?;
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        self.run(&format!("rmdir {}", quote(path)), path).await?;
        Ok(())
    }

    async fn make_dirs(&self, path: &str) -> Result<()> {
        self.run(&format!("mkdir -p {}", quote(path)), path).await?;
        Ok(())
    }

    async fn set_times(&self, path: &str, entry: &Entry) -> Result<()> {
        let quoted = quote(path);
        let script = format!(
            "touch -c -a -d @{} {quoted} && touch -c -m -d @{} {quoted}",
            entry.atime, entry.mtime
        );
        self.run(&script, path).await?;
        Ok(())
    }

    async fn read_file_into(&self, path: &str, writer: Writer<'_>) -> Result<u64> {
        let script = format!("cat {}", quote(path));
        let mut child = self
            .command(&script)
            .spawn()
            .with_context(|| format!("failed to spawn {:?}", &self.command))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout of {script:?} was not captured"))?;
        let bytes = tokio::io::copy(&mut stdout, writer)
            .await
            .with_context(|| format!("failed streaming {path:?}"))?;
        drop(stdout);
        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("failed waiting for {script:?}"))?;
        self.check(&script, path, &output)?;
        Ok(bytes)
    }

    async fn push_file_here(
        &self,
        source_fs: &dyn FileSystem,
        source: &str,
        destination: &str,
    ) -> Result<u64> {
        let script = format!("cat > {}", quote(destination));
        let mut child = self
            .command(&script)
            .stdin(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {:?}", &self.command))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin of {script:?} was not captured"))?;
        let copied = source_fs.read_file_into(source, &mut stdin).await;
        let flushed = stdin.shutdown().await;
        // close the pipe so the remote cat sees end of input
        drop(stdin);
        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("failed waiting for {script:?}"))?;
        self.check(&script, destination, &output)?;
        let bytes = copied?;
        flushed.with_context(|| format!("failed streaming into {destination:?}"))?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{CaptureSettings, LocalFileSystem, PushSettings};
    use crate::tree::Tree;

    // runs every "remote" command on this machine
    fn local_shell() -> ShellFileSystem {
        ShellFileSystem::from_command_line("sh -c").expect("valid command line")
    }

    fn path_str(path: &std::path::Path) -> String {
        path.to_string_lossy().to_string()
    }

    fn without_atime(tree: Tree) -> Tree {
        match tree {
            Tree::Leaf(entry) => Tree::Leaf(Entry { atime: 0, ..entry }),
            Tree::Directory(dir) => Tree::Directory(crate::tree::Directory {
                entry: dir.entry.map(|entry| Entry { atime: 0, ..entry }),
                children: dir
                    .children
                    .into_iter()
                    .map(|(name, child)| (name, without_atime(child)))
                    .collect(),
            }),
            Tree::Absent => Tree::Absent,
        }
    }

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(quote("/a b"), "'/a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn parse_stat_line() {
        let (entry, name) = parse_stat_fields("81a4 1700000000 1700000060 /sdcard/a b.txt")
            .expect("valid stat line");
        assert_eq!(entry, Entry::new(EntryKind::File, 1_700_000_000, 1_700_000_060));
        assert_eq!(name, Some("/sdcard/a b.txt"));
        assert!(parse_stat_fields("41ed 12").is_err());
        assert!(parse_stat_fields("zz 1 2").is_err());
    }

    #[test]
    fn parse_listing_records() {
        let output = concat!("81a4 10 20\n/d/a b\0", "41ed 30 40\n/d/two\nlines\0");
        let listing = parse_listing(output).expect("valid listing");
        assert_eq!(
            listing,
            vec![
                (Entry::new(EntryKind::File, 10, 20), "/d/a b"),
                (Entry::new(EntryKind::Directory, 30, 40), "/d/two\nlines"),
            ]
        );
        assert!(parse_listing("").expect("empty listing").is_empty());
        assert!(parse_listing("81a4 10 20\0").is_err());
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(ShellFileSystem::from_command_line("   ").is_err());
    }

    #[tokio::test]
    async fn connection_test() {
        assert!(local_shell().test_connection().await);
        let broken = ShellFileSystem::from_command_line("/nonexistent/tsync-shell")
            .expect("valid command line");
        assert!(!broken.test_connection().await);
    }

    #[tokio::test]
    async fn lstat_maps_errors() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let fs = local_shell();
        let missing = path_str(&tmp_dir.path().join("missing"));
        assert!(matches!(fs.lstat(&missing).await, Err(Error::NotFound { .. })));
        let file = tmp_dir.path().join("file");
        tokio::fs::write(&file, "x").await?;
        filetime::set_file_times(
            &file,
            filetime::FileTime::from_unix_time(100, 0),
            filetime::FileTime::from_unix_time(200, 0),
        )?;
        assert_eq!(
            fs.lstat(&path_str(&file)).await?,
            Entry::new(EntryKind::File, 100, 200)
        );
        assert!(matches!(
            fs.lstat(&path_str(&file.join("below"))).await,
            Err(Error::NotADirectory { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn shell_and_local_capture_agree() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let root = tmp_dir.path().join("root");
        tokio::fs::create_dir_all(root.join("sub dir")).await?;
        tokio::fs::write(root.join("a.txt"), "a").await?;
        tokio::fs::write(root.join("sub dir").join("it's.txt"), "b").await?;
        let settings = CaptureSettings {
            follow_symlinks: false,
            time_granularity: 60,
        };
        let root = path_str(&root);
        let remote = local_shell().get_tree(&root, &settings).await?;
        let local = LocalFileSystem::new().get_tree(&root, &settings).await?;
        // listing a directory may bump its atime, compare everything else
        assert_eq!(without_atime(remote.clone()), without_atime(local));
        assert_eq!(remote.leaf_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn read_dir_keeps_names_with_newlines() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        tokio::fs::write(tmp_dir.path().join("two\nlines.txt"), "x").await?;
        tokio::fs::write(tmp_dir.path().join("plain.txt"), "y").await?;
        let mut names: Vec<String> = local_shell()
            .read_dir(&path_str(tmp_dir.path()))
            .await?
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["plain.txt".to_string(), "two\nlines.txt".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn push_between_backends() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let src = tmp_dir.path().join("src");
        tokio::fs::create_dir_all(src.join("nested")).await?;
        tokio::fs::write(src.join("nested").join("data.bin"), vec![0u8, 1, 2, 255]).await?;
        filetime::set_file_times(
            src.join("nested").join("data.bin"),
            filetime::FileTime::from_unix_time(1_000, 0),
            filetime::FileTime::from_unix_time(5_000, 0),
        )?;
        let local = LocalFileSystem::new();
        let remote = local_shell();
        let tree = local
            .get_tree(&path_str(&src), &CaptureSettings::default())
            .await?;
        // local -> remote
        let pushed = path_str(&tmp_dir.path().join("pushed"));
        remote
            .push_tree_here(&path_str(&src), ".", &tree, &pushed, &local, &PushSettings::default())
            .await?;
        // capture before reading the content, a read may bump the atime
        let pushed_tree = remote.get_tree(&pushed, &CaptureSettings::default()).await?;
        assert_eq!(
            pushed_tree.child("nested").and_then(|n| n.child("data.bin")),
            Some(&Tree::Leaf(Entry::new(EntryKind::File, 1_000, 5_000)))
        );
        assert_eq!(
            tokio::fs::read(tmp_dir.path().join("pushed/nested/data.bin")).await?,
            vec![0u8, 1, 2, 255]
        );
        // remote -> local
        let pulled = path_str(&tmp_dir.path().join("pulled"));
        local
            .push_tree_here(&pushed, ".", &pushed_tree, &pulled, &remote, &PushSettings::default())
            .await?;
        assert_eq!(
            tokio::fs::read(tmp_dir.path().join("pulled/nested/data.bin")).await?,
            vec![0u8, 1, 2, 255]
        );
        // and remove it through the shell again
        let summary = remote.remove_tree(&pushed, &pushed_tree, false).await?;
        assert_eq!(summary.files_removed, 1);
        assert_eq!(summary.directories_removed, 2);
        assert!(!tmp_dir.path().join("pushed").exists());
        Ok(())
    }
}
