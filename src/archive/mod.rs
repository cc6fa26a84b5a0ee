// src/archive/mod.rs

//! Safe installation of untrusted archives
//!
//! Installing a package is two-phase:
//!
//! 1. **Validate** the whole entry listing without extracting anything:
//!    entry count and declared uncompressed size against [`Quotas`], and
//!    every entry name through [`sanitize_entry_path`].
//! 2. **Extract and promote**: write the marker and every entry into a fresh
//!    staging directory under the output root, then rename the staging
//!    directory onto `<output>/<id>` in one step.
//!
//! A failure at any point drops the staging directory, which deletes it, so
//! a partially written package never appears at its final path.

mod sink;
mod source;

pub use sink::{DirectorySink, EntrySink};
pub use source::{ByteRangeSource, RangeReader};

use crate::error::{Error, Result};
use crate::path::sanitize_entry_path;
use chrono::{Local, NaiveDate, TimeZone};
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::PathBuf;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zip::ZipArchive;

/// Zero-byte file marking a directory as fully installed by this tool
pub const MARKER_FILE: &str = ".levelsync";

/// Directory under the output root that holds in-progress extractions
pub const STAGING_DIR: &str = ".levelsync.tmp";

/// Default maximum number of entries per archive
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default maximum total uncompressed size per archive
pub const DEFAULT_MAX_BYTES: u64 = 500_000_000;

/// Header and framing bytes allowed per entry on top of its data
const ENTRY_OVERHEAD: u64 = 1024;

/// End-of-archive records and comment
const TRAILER_OVERHEAD: u64 = 64 * 1024;

/// Per-package resource ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quotas {
    pub max_entries: usize,
    pub max_uncompressed_bytes: u64,
}

impl Default for Quotas {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_uncompressed_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl Quotas {
    /// Largest archive file that could still pass validation
    ///
    /// Downloads are cut off past this size. Stored data never grows and
    /// deflate adds well under 1/256 to incompressible data.
    pub fn max_archive_bytes(&self) -> u64 {
        let entries = (self.max_entries as u64).saturating_mul(ENTRY_OVERHEAD);
        self.max_uncompressed_bytes
            .saturating_add(self.max_uncompressed_bytes / 256)
            .saturating_add(entries)
            .saturating_add(TRAILER_OVERHEAD)
    }
}

/// An entry that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedEntry {
    /// Position in the archive's central directory
    pub index: usize,
    /// Normalized relative path
    pub path: PathBuf,
    pub is_dir: bool,
    /// Declared uncompressed size
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Check an archive's listing against quotas and path rules
///
/// Reads only the central directory. The whole listing is checked before
/// anything is returned, so no caller can start extracting an archive that
/// would later be rejected.
pub fn validate<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    quotas: &Quotas,
) -> Result<Vec<ValidatedEntry>> {
    let count = archive.len();
    if count > quotas.max_entries {
        return Err(Error::TooManyEntries {
            count,
            limit: quotas.max_entries,
        });
    }

    let mut entries = Vec::with_capacity(count);
    let mut total: u64 = 0;
    for index in 0..count {
        let file = archive.by_index_raw(index)?;
        let path = sanitize_entry_path(file.name())?;
        // The marker is written by the installer, never by the archive
        if path.to_str().is_some_and(|p| p.eq_ignore_ascii_case(MARKER_FILE)) {
            return Err(Error::UnsafeEntryName(file.name().to_string()));
        }
        total = total.saturating_add(file.size());
        entries.push(ValidatedEntry {
            index,
            path,
            is_dir: file.is_dir(),
            size: file.size(),
            modified: file.last_modified().and_then(entry_time),
        });
    }

    if total > quotas.max_uncompressed_bytes {
        return Err(Error::TooLarge {
            size: total,
            limit: quotas.max_uncompressed_bytes,
        });
    }

    Ok(entries)
}

/// Convert a ZIP timestamp (local time, no zone) to a system time
fn entry_time(time: zip::DateTime) -> Option<SystemTime> {
    let naive = NaiveDate::from_ymd_opt(
        i32::from(time.year()),
        u32::from(time.month()),
        u32::from(time.day()),
    )?
    .and_hms_opt(
        u32::from(time.hour()),
        u32::from(time.minute()),
        u32::from(time.second()),
    )?;
    let local = Local.from_local_datetime(&naive).earliest()?;
    Some(local.into())
}

/// Reader that enforces the remaining byte budget and observes cancellation
struct Budgeted<'a, R> {
    inner: R,
    remaining: u64,
    consumed: u64,
    over_budget: bool,
    cancelled: bool,
    token: &'a CancellationToken,
}

impl<R: Read> Read for Budgeted<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.token.is_cancelled() {
            self.cancelled = true;
            return Err(io::Error::other("cancelled"));
        }
        let n = self.inner.read(buf)?;
        self.consumed += n as u64;
        if self.consumed > self.remaining {
            self.over_budget = true;
            return Err(io::Error::other("archive exceeds its declared size"));
        }
        Ok(n)
    }
}

/// Installs validated archives into an output directory
#[derive(Debug, Clone)]
pub struct ArchiveInstaller {
    destination_parent: PathBuf,
    staging_root: PathBuf,
    quotas: Quotas,
}

impl ArchiveInstaller {
    /// Create an installer for packages under `destination_parent`
    ///
    /// Staging directories are created in [`STAGING_DIR`] inside the same
    /// parent so the final rename never crosses filesystems.
    pub fn new(destination_parent: impl Into<PathBuf>, quotas: Quotas) -> Self {
        let destination_parent = destination_parent.into();
        Self {
            staging_root: destination_parent.join(STAGING_DIR),
            destination_parent,
            quotas,
        }
    }

    pub fn quotas(&self) -> &Quotas {
        &self.quotas
    }

    /// Final installation path of a package
    pub fn destination(&self, id: &str) -> PathBuf {
        self.destination_parent.join(id)
    }

    /// Validate `source` and install it as package `id`
    ///
    /// Quota, unsafe-name and cancellation errors are returned as-is; any
    /// other failure after validation becomes [`Error::InstallFailed`].
    pub fn install<S: ByteRangeSource + ?Sized>(
        &self,
        source: &S,
        id: &str,
        token: &CancellationToken,
    ) -> Result<PathBuf> {
        self.install_inner(source, id, token).map_err(|e| match e {
            Error::TooManyEntries { .. }
            | Error::TooLarge { .. }
            | Error::UnsafeEntryName(_)
            | Error::Cancelled => e,
            other => Error::InstallFailed {
                id: id.to_string(),
                message: other.to_string(),
            },
        })
    }

    fn install_inner<S: ByteRangeSource + ?Sized>(
        &self,
        source: &S,
        id: &str,
        token: &CancellationToken,
    ) -> Result<PathBuf> {
        let mut archive = ZipArchive::new(RangeReader::new(source)?)?;
        let entries = validate(&mut archive, &self.quotas)?;

        fs::create_dir_all(&self.staging_root)?;
        let staging = tempfile::Builder::new()
            .prefix(&format!("{id}."))
            .tempdir_in(&self.staging_root)?;
        debug!("Extracting {} entries for {} into {:?}", entries.len(), id, staging.path());

        // Marker goes in first; the package only becomes visible via the rename
        File::create(staging.path().join(MARKER_FILE))?;

        let mut sink = DirectorySink::new(staging.path());
        self.extract(&mut archive, &entries, &mut sink, token)?;

        let destination = self.destination(id);
        fs::rename(staging.path(), &destination)?;
        // Renamed away; nothing left for the guard to clean up
        let _ = staging.keep();

        Ok(destination)
    }

    /// Stream every validated entry into `sink`
    pub fn extract<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        entries: &[ValidatedEntry],
        sink: &mut dyn EntrySink,
        token: &CancellationToken,
    ) -> Result<()> {
        let limit = self.quotas.max_uncompressed_bytes;
        let mut written: u64 = 0;

        for entry in entries {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if entry.is_dir {
                sink.create_dir(&entry.path)?;
            } else {
                let file = archive.by_index(entry.index)?;
                let mut reader = Budgeted {
                    inner: file,
                    remaining: limit - written,
                    consumed: 0,
                    over_budget: false,
                    cancelled: false,
                    token,
                };
                let result = sink.write_file(&entry.path, &mut reader);
                if reader.cancelled {
                    return Err(Error::Cancelled);
                }
                if reader.over_budget {
                    return Err(Error::TooLarge {
                        size: written + reader.consumed,
                        limit,
                    });
                }
                written += result?;
            }

            if let Some(modified) = entry.modified {
                sink.set_modified(&entry.path, modified)?;
            }
        }

        Ok(())
    }
}
