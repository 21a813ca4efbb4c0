use std::os::unix::fs::MetadataExt;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::fs::{FileSystem, Writer};
use crate::path::PathSyntax;
use crate::tree::{Entry, EntryKind};

/// Backend for the machine tsync runs on
#[derive(Copy, Clone, Debug, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

fn entry_from_metadata(metadata: &std::fs::Metadata) -> Entry {
    Entry::new(
        EntryKind::from_file_type(metadata.file_type()),
        metadata.atime(),
        metadata.mtime(),
    )
}

impl PathSyntax for LocalFileSystem {
    fn separator(&self) -> &'static str {
        std::path::MAIN_SEPARATOR_STR
    }

    fn join_paths(&self, base: &str, leaf: &str) -> String {
        if base.is_empty() {
            return leaf.to_string();
        }
        std::path::Path::new(base)
            .join(leaf)
            .to_string_lossy()
            .to_string()
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    fn name(&self) -> &str {
        "local"
    }

    fn path_syntax(&self) -> &dyn PathSyntax {
        self
    }

    async fn lstat(&self, path: &str) -> Result<Entry> {
        let metadata = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|error| Error::from_io(error, path))?;
        Ok(entry_from_metadata(&metadata))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<(String, Entry)>> {
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|error| Error::from_io(error, path))?;
        let mut listing = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|error| Error::from_io(error, path))?
        {
            // DirEntry::metadata does not traverse symlinks
            let metadata = entry
                .metadata()
                .await
                .map_err(|error| Error::from_io(error, &entry.path().to_string_lossy()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            listing.push((name, entry_from_metadata(&metadata)));
        }
        Ok(listing)
    }

    async fn realpath(&self, path: &str) -> Result<String> {
        let resolved = tokio::fs::canonicalize(path)
            .await
            .map_err(|error| Error::from_io(error, path))?;
        Ok(resolved.to_string_lossy().to_string())
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|error| Error::from_io(error, path))
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        tokio::fs::remove_dir(path)
            .await
            .map_err(|error| Error::from_io(error, path))
    }

    async fn make_dirs(&self, path: &str) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|error| Error::from_io(error, path))
    }

    async fn set_times(&self, path: &str, entry: &Entry) -> Result<()> {
        let dst = path.to_string();
        let atime = filetime::FileTime::from_unix_time(entry.atime, 0);
        let mtime = filetime::FileTime::from_unix_time(entry.mtime, 0);
        tokio::task::spawn_blocking(move || filetime::set_symlink_file_times(&dst, atime, mtime))
            .await
            .context("timestamp update task failed")?
            .map_err(|error| Error::from_io(error, path))
    }

    async fn read_file_into(&self, path: &str, writer: Writer<'_>) -> Result<u64> {
        let mut reader = tokio::fs::File::open(path)
            .await
            .map_err(|error| Error::from_io(error, path))?;
        let bytes = tokio::io::copy(&mut reader, writer)
            .await
            .with_context(|| format!("failed reading {path:?}"))?;
        Ok(bytes)
    }

    async fn push_file_here(
        &self,
        source_fs: &dyn FileSystem,
        source: &str,
        destination: &str,
    ) -> Result<u64> {
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|error| Error::from_io(error, destination))?;
        let bytes = source_fs.read_file_into(source, &mut file).await?;
        file.flush()
            .await
            .with_context(|| format!("failed writing {destination:?}"))?;
        Ok(bytes)
    }
}
