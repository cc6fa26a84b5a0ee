// src/index.rs

//! The remote level index
//!
//! The index is a SQLite file published by the level site. Each row of its
//! `level` table is one upload; several uploads of the same song by the same
//! authors collapse into one package, keeping the most recently updated.

use crate::error::{Error, Result};
use rusqlite::{Connection, OpenFlags, Row};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

const INDEX_QUERY: &str = "SELECT id, url, url2 FROM level \
     GROUP BY song, authors, artist \
     ORDER BY max(last_updated) DESC";

/// One downloadable package listed by the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePackage {
    pub id: String,
    /// Original upload location; often dead, may be absent
    pub primary_url: Option<String>,
    /// Mirror that stays reachable after the original disappears
    pub fallback_url: String,
}

impl RemotePackage {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let primary_url: Option<String> = row.get(1)?;
        Ok(Self {
            id: row.get(0)?,
            primary_url: primary_url.filter(|url| !url.is_empty()),
            fallback_url: row.get(2)?,
        })
    }

    /// URL the first download attempt should use
    pub fn initial_url(&self, prefer_fallback: bool) -> &str {
        match &self.primary_url {
            Some(primary) if !prefer_fallback => primary,
            _ => &self.fallback_url,
        }
    }
}

/// Read every package from the index at `path`, newest first
///
/// Fails with [`Error::DuplicatePackage`] when two groups resolve to the same
/// id, and with [`Error::IndexCorrupt`] when the file is not a readable index.
pub fn load_index(path: &Path) -> Result<Vec<RemotePackage>> {
    if !path.exists() {
        return Err(Error::IndexUnavailable(format!(
            "{} does not exist",
            path.display()
        )));
    }

    let corrupt = |e: rusqlite::Error| Error::IndexCorrupt(format!("{}: {}", path.display(), e));

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(corrupt)?;

    let mut stmt = conn.prepare(INDEX_QUERY).map_err(corrupt)?;
    let rows = stmt.query_map([], RemotePackage::from_row).map_err(corrupt)?;

    let mut seen = HashSet::new();
    let mut packages = Vec::new();
    for row in rows {
        let package = row.map_err(corrupt)?;
        if !seen.insert(package.id.clone()) {
            return Err(Error::DuplicatePackage(package.id));
        }
        packages.push(package);
    }

    debug!("Loaded {} packages from {}", packages.len(), path.display());
    Ok(packages)
}
