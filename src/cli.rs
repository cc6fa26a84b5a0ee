// src/cli.rs
//! CLI definitions for levelsync
//!
//! Argument parsing only; [`Cli::into_options`] hands the result to the
//! library as [`SyncOptions`].

use clap::Parser;
use levelsync::archive::{DEFAULT_MAX_BYTES, DEFAULT_MAX_ENTRIES, Quotas};
use levelsync::retry::{Backoff, DEFAULT_RETRIES};
use levelsync::sync::{DEFAULT_DATABASE, DEFAULT_INDEX_URL, SyncOptions};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "levelsync")]
#[command(author = "Levelsync Contributors")]
#[command(version)]
#[command(about = "Automatically download Rhythm Doctor levels", long_about = None)]
pub struct Cli {
    /// Directory to keep levels in
    pub output: PathBuf,

    /// Where to move removed levels instead of deleting them
    #[arg(short, long, value_name = "PATH")]
    pub yeeted: Option<PathBuf>,

    /// Where to cache the level database
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_DATABASE)]
    pub database: PathBuf,

    /// Number of levels to download concurrently
    #[arg(short, long, value_name = "N", default_value = "1")]
    pub concurrency: NonZeroUsize,

    /// Maximum number of files in one level archive
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_ENTRIES)]
    pub max_files: usize,

    /// Maximum unpacked size of one level, in bytes
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_BYTES)]
    pub max_size: u64,

    /// Do not actually add or remove levels
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// URL of the level database
    #[arg(long, value_name = "URL", default_value = DEFAULT_INDEX_URL)]
    pub orchard: Url,

    /// Download levels from codex.rhythm.cafe
    #[arg(long)]
    pub codex: bool,

    /// Retries per download before giving up
    #[arg(long, value_name = "N", default_value_t = DEFAULT_RETRIES)]
    pub retries: usize,

    /// Longest wait between retries, in seconds
    #[arg(long, value_name = "SECS", default_value = "60")]
    pub backoff_max: u64,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn into_options(self) -> SyncOptions {
        let backoff = Backoff::default()
            .with_retries(self.retries)
            .with_max(Duration::from_secs(self.backoff_max));

        SyncOptions::new(self.output)
            .with_database(self.database)
            .with_index_url(self.orchard)
            .with_concurrency(self.concurrency)
            .with_quotas(Quotas {
                max_entries: self.max_files,
                max_uncompressed_bytes: self.max_size,
            })
            .with_dry_run(self.dry_run)
            .with_yeeted(self.yeeted)
            .with_prefer_fallback(self.codex)
            .with_backoff(backoff)
    }
}
