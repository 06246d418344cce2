use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for all operations in the `fstree` crate.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", .path.display())]
    Io { source: io::Error, path: PathBuf },

    /// A walked path did not live under the capture base.
    #[error("Could not strip prefix '{}' from path '{}'", .prefix.display(), .path.display())]
    StripPrefix { prefix: PathBuf, path: PathBuf },

    /// The directory walk could not list a directory.
    #[error("cannot read directory '{}': {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// A walk event arrived whose parent is not the directory currently open.
    #[error("walk event for '{}' is not in pre-order", .path.display())]
    OutOfOrder { path: PathBuf },

    /// The snapshot declares a format version this build does not understand.
    #[error("unsupported snapshot version {}, expected {expected}", .found.map_or_else(|| "<missing>".to_string(), |v| v.to_string()))]
    FormatVersion { found: Option<u64>, expected: u32 },

    /// An error during serialization or deserialization of the snapshot document.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid run configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The run was cancelled by the user.
    #[error("Operation interrupted by signal")]
    Interrupted,
}

impl SnapshotError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SnapshotError::Io { source, path: path.into() }
    }
}

/// Failure of the fetch collaborator for a single URL.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The fetch program could not be started at all.
    #[error("failed to start '{program}': {source}")]
    Spawn { program: String, source: io::Error },

    /// The fetch program ran but reported failure.
    #[error("fetch of '{url}' exited with {}", .code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}")))]
    Status { url: String, code: Option<i32> },

    /// The transfer was abandoned because shutdown was requested.
    #[error("fetch of '{url}' cancelled")]
    Cancelled { url: String },
}

/// Per-item reconstruction failure. Never escapes a worker.
#[derive(Error, Debug)]
pub enum ItemError {
    #[error("cannot create directory '{}': {source}", .path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("failed to set permissions on '{}': {source}", .path.display())]
    Permission { path: PathBuf, source: io::Error },

    #[error("failed to create link '{}': {source}", .path.display())]
    Link { path: PathBuf, source: io::Error },
}

pub type Result<T, E = SnapshotError> = std::result::Result<T, E>;
