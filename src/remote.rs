// src/remote.rs

//! Network collaborators: index refresh and archive download
//!
//! The driver talks to the network only through the [`Remote`] trait, so
//! tests can substitute an in-memory implementation. [`HttpRemote`] is the
//! real one, built on an async `reqwest` client.

use crate::error::{Error, Result};
use async_trait::async_trait;
use filetime::FileTime;
use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Connect timeout for every request
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Headers carrying the object's modification time, in preference order
const MODIFIED_HEADERS: &[&str] = &[
    "x-bz-info-src_last_modified_millis",
    "x-bz-upload-timestamp",
];

/// Source of the level index and of package archives
#[async_trait]
pub trait Remote: Send + Sync {
    /// Replace the local index at `dest` if the remote copy is newer
    ///
    /// Returns whether the local copy changed. The replacement is atomic:
    /// the file is written next to `dest` and renamed over it.
    async fn refresh_index(
        &self,
        url: &str,
        dest: &Path,
        token: &CancellationToken,
    ) -> Result<bool>;

    /// Download an archive into an anonymous file under `spool_dir`
    ///
    /// Fails with [`Error::TooLarge`] once the archive is known to exceed
    /// `max_bytes`, without spooling more than `max_bytes` of it.
    async fn fetch_archive(
        &self,
        url: &str,
        spool_dir: &Path,
        max_bytes: u64,
        token: &CancellationToken,
    ) -> Result<File>;
}

/// Remote backed by plain HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
}

impl HttpRemote {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("levelsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::DownloadError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str, token: &CancellationToken) -> Result<Response> {
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            response = self.client.get(url).send() => {
                response.map_err(|e| Error::DownloadError(format!("{url}: {e}")))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

/// Stream a response body into `out`, stopping early on cancellation
///
/// A chunk that would take the total past `limit` is not written.
async fn stream_body(
    mut response: Response,
    out: &mut impl Write,
    url: &str,
    limit: u64,
    token: &CancellationToken,
) -> Result<u64> {
    let mut written: u64 = 0;
    loop {
        let chunk = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            chunk = response.chunk() => {
                chunk.map_err(|e| Error::DownloadError(format!("{url}: {e}")))?
            }
        };
        let Some(chunk) = chunk else { break };
        let size = written.saturating_add(chunk.len() as u64);
        if size > limit {
            return Err(Error::TooLarge { size, limit });
        }
        out.write_all(&chunk)?;
        written = size;
    }
    out.flush()?;
    Ok(written)
}

/// Modification time advertised by the storage backend, if any
pub fn remote_modified(headers: &HeaderMap) -> Option<SystemTime> {
    MODIFIED_HEADERS.iter().find_map(|name| {
        let millis: u64 = headers.get(*name)?.to_str().ok()?.trim().parse().ok()?;
        Some(UNIX_EPOCH + Duration::from_millis(millis))
    })
}

/// Whether a remote object should replace the local copy
///
/// An unknown remote time counts as newer than anything; a missing local
/// copy as older than anything.
pub fn is_newer(remote: Option<SystemTime>, local: Option<SystemTime>) -> bool {
    match (remote, local) {
        (Some(remote), Some(local)) => remote > local,
        _ => true,
    }
}

#[async_trait]
impl Remote for HttpRemote {
    async fn refresh_index(
        &self,
        url: &str,
        dest: &Path,
        token: &CancellationToken,
    ) -> Result<bool> {
        let response = self.get(url, token).await?;

        let remote_time = remote_modified(response.headers());
        let local_time = fs::metadata(dest).and_then(|m| m.modified()).ok();
        if !is_newer(remote_time, local_time) {
            debug!("Index at {} is up to date", dest.display());
            return Ok(false);
        }

        info!("Updating index from {}", url);
        let parent = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".index.")
            .tempfile_in(parent)?;
        let size = stream_body(response, temp.as_file_mut(), url, u64::MAX, token).await?;
        temp.as_file().sync_all()?;

        if let Some(time) = remote_time {
            filetime::set_file_mtime(temp.path(), FileTime::from_system_time(time))?;
        }
        temp.persist(dest).map_err(|e| Error::Io(e.error))?;

        debug!("Wrote {} bytes to {}", size, dest.display());
        Ok(true)
    }

    async fn fetch_archive(
        &self,
        url: &str,
        spool_dir: &Path,
        max_bytes: u64,
        token: &CancellationToken,
    ) -> Result<File> {
        let response = self.get(url, token).await?;
        if let Some(size) = response.content_length().filter(|&size| size > max_bytes) {
            return Err(Error::TooLarge { size, limit: max_bytes });
        }

        let mut file = tempfile::tempfile_in(spool_dir)?;
        let size = stream_body(response, &mut file, url, max_bytes, token).await?;
        debug!("Downloaded {} bytes from {}", size, url);
        Ok(file)
    }
}
