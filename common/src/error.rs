use crate::tree::EntryKind;

/// Errors surfaced by the reconciliation engine, the path normalizer and the filesystem backends.
///
/// # Logging Convention
/// `Other` displays the full anyhow chain, so any format specifier shows the root cause:
/// ```ignore
/// tracing::error!("sync failed: {}", &error);
/// ```
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{path}: No such file or directory")]
    NotFound { path: String },
    #[error("{path}: Not a directory")]
    NotADirectory { path: String },
    #[error("{path}: Permission denied")]
    PermissionDenied { path: String },
    #[error(
        "Refusing to overwrite {destination_kind} {destination_path} with {source_kind} {source_path}, use --force if you are sure!"
    )]
    TypeConflict {
        source_path: String,
        source_kind: EntryKind,
        destination_path: String,
        destination_kind: EntryKind,
    },
    #[error("Destination {path} is a symlink, not sure whether to follow it or replace it")]
    UnsupportedSymlinkDestination { path: String },
    #[error("No device detected")]
    NoDevice,
    #[error("command {command:?} failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Map an I/O error on `path` to one of the structured kinds where possible.
    pub fn from_io(error: std::io::Error, path: &str) -> Self {
        let path = path.to_string();
        match error.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound { path },
            std::io::ErrorKind::NotADirectory => Error::NotADirectory { path },
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied { path },
            _ => Error::Other(anyhow::Error::new(error).context(format!("{path}: I/O error"))),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
