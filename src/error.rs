// src/error.rs

//! Error types for the synchronization engine
//!
//! Every fallible operation in the library returns [`Result`]. The variants
//! follow the run's propagation policy: lock and index failures abort the
//! whole run, per-package failures are isolated by the driver.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Process exit status for a run where some package failed
pub const EXIT_ITEM_FAILURES: u8 = 1;
/// Process exit status for an unusable index or output directory
pub const EXIT_INDEX: u8 = 3;
/// Process exit status for lock contention
pub const EXIT_LOCKED: u8 = 4;

#[derive(Debug, Error)]
pub enum Error {
    #[error("output directory is locked by {}", describe_owner(.pid))]
    LockContention { path: PathBuf, pid: Option<u32> },

    #[error("cannot update level index: {0}")]
    IndexUnavailable(String),

    #[error("level index is corrupt: {0}")]
    IndexCorrupt(String),

    #[error("level index lists '{0}' more than once")]
    DuplicatePackage(String),

    #[error("cannot read existing levels: {0}")]
    ScanFailed(String),

    #[error("cannot create output directory {path}: {source}")]
    OutputUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to remove {count} levels")]
    RemovalRefused { count: usize },

    #[error("cannot remove {id}: {source}")]
    RemovalFailed {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("archive has {count} entries, more than the limit of {limit}")]
    TooManyEntries { count: usize, limit: usize },

    #[error("archive expands to {size} bytes, more than the limit of {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("archive entry has an unsafe name: '{0}'")]
    UnsafeEntryName(String),

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("download failed: {0}")]
    DownloadError(String),

    #[error("cannot install {id}: {message}")]
    InstallFailed { id: String, message: String },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("interrupted")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

fn describe_owner(pid: &Option<u32>) -> String {
    match pid {
        Some(pid) => format!("another instance (pid {pid})"),
        None => "another instance".to_string(),
    }
}

impl Error {
    /// Whether retrying the same operation could produce a different result.
    ///
    /// Quota and unsafe-name failures are properties of the archive itself,
    /// so another attempt would only repeat them.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::TooManyEntries { .. }
                | Error::TooLarge { .. }
                | Error::UnsafeEntryName(_)
                | Error::Cancelled
        )
    }

    /// Whether this is a per-package quota violation
    pub fn is_quota(&self) -> bool {
        matches!(self, Error::TooManyEntries { .. } | Error::TooLarge { .. })
    }

    /// Whether the archive itself was refused: over a quota or carrying an
    /// unsafe entry name
    pub fn is_rejected_archive(&self) -> bool {
        self.is_quota() || matches!(self, Error::UnsafeEntryName(_))
    }

    /// Whether the remote reported the resource as gone (403 or 404)
    pub fn is_gone(&self) -> bool {
        matches!(self, Error::Http { status: 403 | 404, .. })
    }

    /// Exit status for an error that aborted the whole run
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::LockContention { .. } => EXIT_LOCKED,
            Error::IndexUnavailable(_)
            | Error::IndexCorrupt(_)
            | Error::DuplicatePackage(_)
            | Error::ScanFailed(_)
            | Error::OutputUnavailable { .. }
            | Error::RemovalRefused { .. }
            | Error::Database(_) => EXIT_INDEX,
            _ => EXIT_ITEM_FAILURES,
        }
    }
}
