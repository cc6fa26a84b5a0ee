// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use levelsync::archive::MARKER_FILE;
use levelsync::prompt::Confirm;
use levelsync::retry::Backoff;
use levelsync::{Error, Remote, Result, SyncOptions};
use rusqlite::Connection;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// What the fake server answers for one URL
#[derive(Debug, Clone)]
pub enum Reply {
    Archive(Vec<u8>),
    Status(u16),
}

/// In-memory stand-in for the level host
pub struct FakeRemote {
    published_index: PathBuf,
    replies: HashMap<String, Reply>,
    refresh_failures: AtomicUsize,
    fetched: Mutex<Vec<String>>,
    limits: Mutex<Vec<u64>>,
}

impl FakeRemote {
    /// Serve the SQLite file at `published_index` as the index
    pub fn new(published_index: impl Into<PathBuf>) -> Self {
        Self {
            published_index: published_index.into(),
            replies: HashMap::new(),
            refresh_failures: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
            limits: Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(mut self, url: &str, reply: Reply) -> Self {
        self.replies.insert(url.to_string(), reply);
        self
    }

    /// Make the next `count` index refreshes fail
    pub fn with_refresh_failures(self, count: usize) -> Self {
        self.refresh_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Every archive URL requested, in order
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    /// Download size limit passed with every archive request, in order
    pub fn limits(&self) -> Vec<u64> {
        self.limits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Remote for FakeRemote {
    async fn refresh_index(
        &self,
        url: &str,
        dest: &Path,
        token: &CancellationToken,
    ) -> Result<bool> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let failing = self
            .refresh_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Http { url: url.to_string(), status: 503 });
        }

        let published = fs::read(&self.published_index)?;
        if fs::read(dest).ok().as_deref() == Some(published.as_slice()) {
            return Ok(false);
        }
        fs::write(dest, published)?;
        Ok(true)
    }

    async fn fetch_archive(
        &self,
        url: &str,
        spool_dir: &Path,
        max_bytes: u64,
        token: &CancellationToken,
    ) -> Result<File> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.fetched.lock().unwrap().push(url.to_string());
        self.limits.lock().unwrap().push(max_bytes);

        match self.replies.get(url) {
            Some(Reply::Archive(bytes)) if bytes.len() as u64 > max_bytes => Err(Error::TooLarge {
                size: bytes.len() as u64,
                limit: max_bytes,
            }),
            Some(Reply::Archive(bytes)) => {
                let mut file = tempfile::tempfile_in(spool_dir)?;
                file.write_all(bytes)?;
                Ok(file)
            }
            Some(Reply::Status(status)) => Err(Error::Http { url: url.to_string(), status: *status }),
            None => Err(Error::Http { url: url.to_string(), status: 404 }),
        }
    }
}

/// Confirmation gate with a fixed answer that counts questions
pub struct Answer {
    pub yes: bool,
    pub asked: AtomicUsize,
}

impl Answer {
    pub fn yes() -> Self {
        Self { yes: true, asked: AtomicUsize::new(0) }
    }

    pub fn no() -> Self {
        Self { yes: false, asked: AtomicUsize::new(0) }
    }
}

impl Confirm for Answer {
    fn confirm(&self, _message: &str) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.yes
    }
}

/// Primary URL used for a package in fixtures
pub fn primary(id: &str) -> String {
    format!("https://original.example/{id}.rdzip")
}

/// Fallback URL used for a package in fixtures
pub fn fallback(id: &str) -> String {
    format!("https://codex.example/{id}.rdzip")
}

/// Write an index listing `packages` as (id, has_primary_url)
pub fn write_index(path: &Path, packages: &[(&str, bool)]) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE level (
            id TEXT, url TEXT, url2 TEXT,
            song TEXT, authors TEXT, artist TEXT,
            last_updated INTEGER
        );",
    )
    .unwrap();
    for (n, (id, has_primary)) in packages.iter().enumerate() {
        let url = has_primary.then(|| primary(id));
        conn.execute(
            "INSERT INTO level VALUES (?1, ?2, ?3, ?1, 'author', 'artist', ?4)",
            rusqlite::params![id, url, fallback(id), n as i64],
        )
        .unwrap();
    }
}

/// Build an in-memory archive from (name, contents) pairs
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A small, valid level archive
pub fn level_zip(id: &str) -> Vec<u8> {
    zip_bytes(&[
        ("main.rdlevel", format!("{{\"id\":\"{id}\"}}").as_bytes()),
        ("assets/song.ogg", b"OggS"),
    ])
}

/// Pretend `id` was installed by an earlier run
pub fn install_marker(output: &Path, id: &str) {
    let dir = output.join(id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(MARKER_FILE), b"").unwrap();
}

/// Sorted ids of directories in `output` carrying a marker
pub fn marked(output: &Path) -> Vec<String> {
    let mut ids: Vec<String> = fs::read_dir(output)
        .unwrap()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.path().join(MARKER_FILE).is_file())
        .map(|entry| entry.file_name().into_string().unwrap())
        .collect();
    ids.sort();
    ids
}

/// Temp workspace with an output dir, a published index path and options
/// that never sleep between retries.
///
/// Returns (TempDir, published_index, options) - keep the TempDir alive.
pub fn workspace() -> (TempDir, PathBuf, SyncOptions) {
    let temp_dir = tempfile::tempdir().unwrap();
    let output = temp_dir.path().join("levels");
    fs::create_dir_all(&output).unwrap();
    let published = temp_dir.path().join("published.db");
    let options = SyncOptions::new(&output)
        .with_database(temp_dir.path().join("orchard.db"))
        .with_backoff(Backoff::default().with_retries(3).with_base(Duration::ZERO));
    (temp_dir, published, options)
}
