// src/lock.rs

//! Single-writer lock for an output directory
//!
//! A run holds this lock from start to finish so two instances never
//! reconcile the same directory at once. The lock is a plain file created
//! with `O_EXCL` semantics that holds the owner's pid as decimal text. Unlike
//! an advisory `flock`, it survives a crash; a leftover file has to be
//! removed by hand once its owner is confirmed dead.
//!
//! # Example
//!
//! ```ignore
//! use levelsync::lock::InstanceLock;
//!
//! let lock = InstanceLock::acquire("/srv/levels")?;
//!
//! // ... run ...
//!
//! // Lock file removed on drop
//! ```

use crate::error::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Exclusive ownership of an output directory for one run
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Name of the lock file inside the output root
    pub const FILE_NAME: &'static str = ".levelsync.lock";

    /// Path of the lock file for a given output root
    pub fn path_for(root: impl AsRef<Path>) -> PathBuf {
        root.as_ref().join(Self::FILE_NAME)
    }

    /// Acquire the lock for `root`, failing if another run holds it
    ///
    /// Returns [`Error::LockContention`] when the lock file already exists,
    /// carrying the owner's pid if the file content is a readable pid.
    pub fn acquire(root: impl AsRef<Path>) -> Result<Self> {
        let path = Self::path_for(root);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let pid = Self::holder_pid(&path);
                debug!("Lock already held at {:?} (pid {:?})", path, pid);
                return Err(Error::LockContention { path, pid });
            }
            Err(e) => return Err(e.into()),
        };

        let lock = Self { path };
        // Dropping `lock` on a failed write removes the half-written file
        write!(file, "{}", std::process::id())?;
        file.sync_all()?;

        debug!("Acquired instance lock at {:?}", lock.path);
        Ok(lock)
    }

    /// Read the pid recorded in a lock file, if it holds one
    pub fn holder_pid(path: impl AsRef<Path>) -> Option<u32> {
        let text = fs::read_to_string(path).ok()?;
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        text.parse().ok()
    }

    /// Whether the process that wrote a lock is still running
    ///
    /// `None` when this cannot be determined on the current platform.
    pub fn holder_alive(pid: u32) -> Option<bool> {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::kill;
            use nix::unistd::Pid;

            let pid = i32::try_from(pid).ok()?;
            match kill(Pid::from_raw(pid), None) {
                Ok(()) | Err(Errno::EPERM) => Some(true),
                Err(Errno::ESRCH) => Some(false),
                Err(_) => None,
            }
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
            None
        }
    }

    /// Get the path to the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Released instance lock at {:?}", self.path),
            Err(e) => warn!("Cannot remove lock file {:?}: {}", self.path, e),
        }
    }
}
