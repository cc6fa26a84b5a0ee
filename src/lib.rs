// src/lib.rs

//! Levelsync
//!
//! Keeps a directory of downloadable level packages in step with a remote
//! index: new levels are downloaded and unpacked, levels that left the index
//! are removed.
//!
//! # Architecture
//!
//! - Marker files: a package directory is ours only if it holds `.levelsync`
//! - Staged installs: archives are unpacked privately, then renamed into place
//! - Untrusted archives: entry counts, sizes and names are checked before any write
//! - One writer: a lock file keeps concurrent runs off the same directory
//! - Cooperative cancellation: one token reaches every download, delay and extraction

pub mod archive;
mod error;
pub mod index;
pub mod local;
pub mod lock;
pub mod path;
pub mod pool;
pub mod prompt;
pub mod reconcile;
pub mod remote;
pub mod retry;
pub mod shutdown;
pub mod sync;

pub use archive::{ArchiveInstaller, Quotas};
pub use error::{EXIT_INDEX, EXIT_ITEM_FAILURES, EXIT_LOCKED, Error, Result};
pub use index::{RemotePackage, load_index};
pub use lock::InstanceLock;
pub use reconcile::{ReconciliationPlan, plan};
pub use remote::{HttpRemote, Remote};
pub use sync::{Phase, SyncOptions, SyncReport, Synchronizer};
