// src/local.rs

//! The output directory as seen by the synchronizer
//!
//! Only directories that carry the marker file belong to us. Anything else
//! under the output root (hand-made levels, the lock file, the staging area)
//! is left alone.

use crate::archive::{MARKER_FILE, STAGING_DIR};
use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Installed packages under one output root
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ids of every directory holding a marker file
    ///
    /// Fails with [`Error::ScanFailed`] if the root cannot be listed. Entries
    /// whose names are not valid UTF-8 cannot be package ids and are skipped.
    pub fn markers(&self) -> Result<BTreeSet<String>> {
        let scan_failed = |e: io::Error| Error::ScanFailed(format!("{}: {}", self.root.display(), e));

        let mut ids = BTreeSet::new();
        for entry in fs::read_dir(&self.root).map_err(scan_failed)? {
            let entry = entry.map_err(scan_failed)?;
            let Ok(id) = entry.file_name().into_string() else {
                continue;
            };
            if entry.path().join(MARKER_FILE).is_file() {
                ids.insert(id);
            }
        }

        debug!("Found {} installed packages in {}", ids.len(), self.root.display());
        Ok(ids)
    }

    /// Remove an installed package
    ///
    /// With `yeeted` set the package is moved into that directory instead of
    /// deleted. Its marker is removed first, so an interrupted move never
    /// leaves a managed package in either place.
    pub fn remove(&self, id: &str, yeeted: Option<&Path>) -> Result<()> {
        let failed = |source: io::Error| Error::RemovalFailed {
            id: id.to_string(),
            source,
        };
        let package = self.root.join(id);

        match yeeted {
            Some(yeeted) => {
                fs::create_dir_all(yeeted).map_err(failed)?;
                fs::remove_file(package.join(MARKER_FILE)).map_err(failed)?;
                fs::rename(&package, yeeted.join(id)).map_err(failed)?;
            }
            None => fs::remove_dir_all(&package).map_err(failed)?,
        }
        Ok(())
    }

    /// Path of the staging area
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Delete leftovers from an interrupted run
    pub fn purge_staging(&self) -> Result<()> {
        let staging = self.staging_dir();
        match fs::remove_dir_all(&staging) {
            Ok(()) => {
                debug!("Purged stale staging area {}", staging.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
