// src/archive/sink.rs

//! Destinations for extracted archive entries
//!
//! [`EntrySink`] is the write side of extraction: directories, streamed file
//! contents, and timestamps, all addressed by already-sanitized relative
//! paths. [`DirectorySink`] writes under a root directory on disk.

use filetime::FileTime;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Write capability for extracted entries
pub trait EntrySink {
    /// Create a directory and any missing parents
    fn create_dir(&mut self, path: &Path) -> io::Result<()>;

    /// Create or truncate a file and stream `contents` into it
    ///
    /// Returns the number of bytes written.
    fn write_file(&mut self, path: &Path, contents: &mut dyn Read) -> io::Result<u64>;

    /// Set access and modification time of an existing entry
    fn set_modified(&mut self, path: &Path, time: SystemTime) -> io::Result<()>;
}

/// Sink rooted at a directory on the local filesystem
#[derive(Debug)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl EntrySink for DirectorySink {
    fn create_dir(&mut self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(self.root.join(path))
    }

    fn write_file(&mut self, path: &Path, contents: &mut dyn Read) -> io::Result<u64> {
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&target)?;
        io::copy(contents, &mut file)
    }

    fn set_modified(&mut self, path: &Path, time: SystemTime) -> io::Result<()> {
        let time = FileTime::from_system_time(time);
        filetime::set_file_times(self.root.join(path), time, time)
    }
}
