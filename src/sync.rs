// src/sync.rs

//! The synchronization driver
//!
//! One run walks these phases in order:
//!
//! ```text
//! Locking -> Refreshing -> Reconciling -> Removing -> Installing -> Done
//! ```
//!
//! Any phase may end in `Failed`. Lock, index and scan failures abort the
//! run. Failures of single packages during `Removing` and `Installing` are
//! logged, collected in the [`SyncReport`], and never stop their siblings.

use crate::archive::{ArchiveInstaller, Quotas};
use crate::error::{Error, Result};
use crate::index::{RemotePackage, load_index};
use crate::local::LocalStore;
use crate::lock::InstanceLock;
use crate::pool::run_bounded;
use crate::prompt::Confirm;
use crate::reconcile::{ReconciliationPlan, plan};
use crate::remote::Remote;
use crate::retry::{Backoff, retry};
use futures::stream;
use std::fmt;
use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where the level index is published
pub const DEFAULT_INDEX_URL: &str =
    "https://f000.backblazeb2.com/file/rdsqlite/backups/orchard-main.db";

/// Default local cache path for the index
pub const DEFAULT_DATABASE: &str = "./orchard.db";

/// Removing this many packages or more needs confirmation
pub const DEFAULT_REMOVAL_CONFIRM_THRESHOLD: usize = 20;

const QUOTA_HINT: &str = "Some levels exceed the per-level limits and were skipped. \
     Raise --max-files or --max-size to download them.";

/// Settings for one synchronization run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Directory that holds installed packages
    pub output: PathBuf,
    /// Local cache of the index file
    pub database: PathBuf,
    pub index_url: String,
    /// Maximum downloads in flight
    pub concurrency: NonZeroUsize,
    pub quotas: Quotas,
    /// Log the plan without touching the output directory
    pub dry_run: bool,
    /// Move removed packages here instead of deleting them
    pub yeeted: Option<PathBuf>,
    /// Start every download at the fallback URL
    pub prefer_fallback: bool,
    pub backoff: Backoff,
    pub removal_confirm_threshold: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            output: PathBuf::from("."),
            database: PathBuf::from(DEFAULT_DATABASE),
            index_url: DEFAULT_INDEX_URL.to_string(),
            concurrency: NonZeroUsize::MIN,
            quotas: Quotas::default(),
            dry_run: false,
            yeeted: None,
            prefer_fallback: false,
            backoff: Backoff::default(),
            removal_confirm_threshold: DEFAULT_REMOVAL_CONFIRM_THRESHOLD,
        }
    }
}

impl SyncOptions {
    /// Options for syncing into `output` with every other setting default
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn with_database<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database = path.into();
        self
    }

    pub fn with_index_url(mut self, url: impl Into<String>) -> Self {
        self.index_url = url.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: NonZeroUsize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_quotas(mut self, quotas: Quotas) -> Self {
        self.quotas = quotas;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_yeeted<P: Into<PathBuf>>(mut self, path: Option<P>) -> Self {
        self.yeeted = path.map(Into::into);
        self
    }

    pub fn with_prefer_fallback(mut self, prefer: bool) -> Self {
        self.prefer_fallback = prefer;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_removal_confirm_threshold(mut self, threshold: usize) -> Self {
        self.removal_confirm_threshold = threshold;
        self
    }
}

/// Driver state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Locking,
    Refreshing,
    Reconciling,
    Removing,
    Installing,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Locking => "locking",
            Phase::Refreshing => "refreshing",
            Phase::Reconciling => "reconciling",
            Phase::Removing => "removing",
            Phase::Installing => "installing",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a run that got past reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Whether the local index was replaced
    pub index_updated: bool,
    pub planned_install: usize,
    pub planned_remove: usize,
    pub installed: usize,
    pub removed: usize,
    /// Ids that failed to install or remove
    pub failed: Vec<String>,
    /// Ids the index lists but that are unusable as directory names
    pub skipped: Vec<String>,
    pub interrupted: bool,
    pub dry_run: bool,
}

impl SyncReport {
    /// True when every planned change went through
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.interrupted
    }
}

/// Runs synchronizations against one remote and one output directory
pub struct Synchronizer<R, C> {
    options: SyncOptions,
    remote: R,
    prompt: C,
    phase: Mutex<Phase>,
    quota_noted: AtomicBool,
}

impl<R: Remote, C: Confirm> Synchronizer<R, C> {
    pub fn new(options: SyncOptions, remote: R, prompt: C) -> Self {
        Self {
            options,
            remote,
            prompt,
            phase: Mutex::new(Phase::Idle),
            quota_noted: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn prompt(&self) -> &C {
        &self.prompt
    }

    /// Current phase of the most recent run
    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, phase: Phase) {
        let mut current = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("Sync phase: {} -> {}", *current, phase);
        *current = phase;
    }

    /// Perform one full run
    ///
    /// The output directory is created if missing. The instance lock is held
    /// for the whole run and released on every exit path, including errors
    /// and cancellation.
    pub async fn run(&self, token: &CancellationToken) -> Result<SyncReport> {
        self.quota_noted.store(false, Ordering::Relaxed);
        self.enter(Phase::Locking);

        let result = match self.lock_output() {
            Ok(_lock) => self.run_locked(token).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => self.enter(Phase::Done),
            Err(_) => self.enter(Phase::Failed),
        }
        result
    }

    fn lock_output(&self) -> Result<InstanceLock> {
        let output = &self.options.output;
        std::fs::create_dir_all(output).map_err(|source| Error::OutputUnavailable {
            path: output.clone(),
            source,
        })?;
        InstanceLock::acquire(output)
    }

    async fn run_locked(&self, token: &CancellationToken) -> Result<SyncReport> {
        let mut report = SyncReport {
            dry_run: self.options.dry_run,
            ..SyncReport::default()
        };

        self.enter(Phase::Refreshing);
        report.index_updated = self.refresh(token).await?;

        self.enter(Phase::Reconciling);
        let store = LocalStore::new(&self.options.output);
        let remote = load_index(&self.options.database)?;
        let local = store.markers()?;
        let plan = plan(remote, &local);
        info!(
            "{} levels installed, {} to download, {} to remove",
            local.len(),
            plan.to_install.len(),
            plan.to_remove.len()
        );
        report.planned_install = plan.to_install.len();
        report.planned_remove = plan.to_remove.len();
        report.skipped = plan.skipped.clone();

        self.enter(Phase::Removing);
        self.remove_stale(&store, &plan, &mut report, token)?;

        self.enter(Phase::Installing);
        self.install_missing(&store, &plan.to_install, &mut report, token)
            .await?;

        info!(
            "Installed {}, removed {}, failed {}{}",
            report.installed,
            report.removed,
            report.failed.len(),
            if report.interrupted { " (interrupted)" } else { "" }
        );
        Ok(report)
    }

    /// Refresh the local index, retrying transient failures
    async fn refresh(&self, token: &CancellationToken) -> Result<bool> {
        let delays = self.options.backoff.delays();
        let outcome = retry(
            |_| {
                self.remote
                    .refresh_index(&self.options.index_url, &self.options.database, token)
            },
            &delays,
            |e: &Error, remaining| {
                if remaining == 0 || matches!(e, Error::Cancelled) {
                    return ControlFlow::Break(());
                }
                warn!("Cannot update level index ({} retries left): {}", remaining, e);
                ControlFlow::Continue(())
            },
            token,
        )
        .await;

        outcome.map_err(|e| {
            let reason = match e.into_last() {
                Some(Error::Cancelled) | None => "interrupted".to_string(),
                Some(last) => last.to_string(),
            };
            error!("Cannot update level index: {}", reason);
            Error::IndexUnavailable(reason)
        })
    }

    fn remove_stale(
        &self,
        store: &LocalStore,
        plan: &ReconciliationPlan,
        report: &mut SyncReport,
        token: &CancellationToken,
    ) -> Result<()> {
        let count = plan.to_remove.len();
        if !self.options.dry_run
            && count >= self.options.removal_confirm_threshold
            && !self
                .prompt
                .confirm(&format!("About to remove {count} levels. Continue?"))
        {
            warn!("Refusing to remove {} levels", count);
            return Err(Error::RemovalRefused { count });
        }

        for id in &plan.to_remove {
            if token.is_cancelled() {
                report.interrupted = true;
                break;
            }
            info!("Remove {}", id);
            if self.options.dry_run {
                continue;
            }
            match store.remove(id, self.options.yeeted.as_deref()) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    error!("{}", e);
                    report.failed.push(id.clone());
                }
            }
        }
        Ok(())
    }

    async fn install_missing(
        &self,
        store: &LocalStore,
        packages: &[RemotePackage],
        report: &mut SyncReport,
        token: &CancellationToken,
    ) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        if !self.options.dry_run {
            store.purge_staging()?;
            std::fs::create_dir_all(store.staging_dir())?;
        }

        let installer = ArchiveInstaller::new(store.root(), self.options.quotas);
        let spool = store.staging_dir();
        let delays = self.options.backoff.delays();
        let installed = AtomicUsize::new(0);

        let tasks = stream::iter(packages.iter().map(|package| {
            let installer = &installer;
            let spool = spool.as_path();
            let delays = delays.as_slice();
            let installed = &installed;
            move |token: CancellationToken| async move {
                match self
                    .install_one(package, installer, spool, delays, &token)
                    .await
                {
                    Ok(()) => {
                        installed.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                    Err(_) => Err(package.id.clone()),
                }
            }
        }));

        if let Err(e) = run_bounded(self.options.concurrency, tasks, token).await {
            report.interrupted |= e.cancelled;
            report.failed.extend(e.failures);
        }
        if !self.options.dry_run {
            report.installed = installed.into_inner();
        }
        Ok(())
    }

    /// Download and install one package with retries and URL fallback
    async fn install_one(
        &self,
        package: &RemotePackage,
        installer: &ArchiveInstaller,
        spool: &Path,
        delays: &[Duration],
        token: &CancellationToken,
    ) -> Result<()> {
        let use_fallback = AtomicBool::new(self.options.prefer_fallback);

        let outcome = retry(
            |attempt| {
                let url = package.initial_url(use_fallback.load(Ordering::Relaxed));
                async move {
                    if attempt == 0 {
                        info!("Download {} ({})", package.id, url);
                    }
                    if self.options.dry_run {
                        return Ok(());
                    }
                    self.download_and_install(&package.id, url, installer, spool, token)
                        .await
                }
            },
            delays,
            |e: &Error, remaining| {
                if remaining == 0 || !e.is_retryable() {
                    return ControlFlow::Break(());
                }
                if e.is_gone()
                    && package.primary_url.is_some()
                    && !use_fallback.swap(true, Ordering::Relaxed)
                {
                    warn!(
                        "Cannot download {} ({} retries left): the original file has been deleted. \
                         Will retry with '{}'.",
                        package.id, remaining, package.fallback_url
                    );
                } else {
                    warn!("Cannot download {} ({} retries left): {}", package.id, remaining, e);
                }
                ControlFlow::Continue(())
            },
            token,
        )
        .await;

        let Err(failure) = outcome else {
            return Ok(());
        };

        let last = failure.into_last().unwrap_or(Error::Cancelled);
        match &last {
            Error::Cancelled => debug!("Download of {} interrupted", package.id),
            e if e.is_rejected_archive() => {
                warn!("Skipping {}: {}", package.id, e);
                if e.is_quota() && !self.quota_noted.swap(true, Ordering::Relaxed) {
                    warn!("{}", QUOTA_HINT);
                }
            }
            e => error!("Cannot download {}: {}", package.id, e),
        }
        Err(last)
    }

    async fn download_and_install(
        &self,
        id: &str,
        url: &str,
        installer: &ArchiveInstaller,
        spool: &Path,
        token: &CancellationToken,
    ) -> Result<()> {
        let max_bytes = installer.quotas().max_archive_bytes();
        let archive = self.remote.fetch_archive(url, spool, max_bytes, token).await?;

        let installer = installer.clone();
        let task_id = id.to_string();
        let task_token = token.clone();
        let destination = tokio::task::spawn_blocking(move || {
            installer.install(&archive, &task_id, &task_token)
        })
        .await
        .map_err(|e| Error::InstallFailed {
            id: id.to_string(),
            message: e.to_string(),
        })??;

        debug!("Installed {} at {}", id, destination.display());
        Ok(())
    }
}
