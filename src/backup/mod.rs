//! Backup engine for dotbackup
//!
//! Captures dotfiles into compressed archives, keeps them under a tiered
//! retention policy, verifies and restores them, and moves whole backup roots
//! between machines.
//!
//! # Architecture
//!
//! - `BackupManager`: creates backups and maintains the registry
//! - `RestoreManager`: reconstructs files from a backup and its baseline chain
//! - `Transport`: exports, imports and migrates backup roots
//! - `Doctor`: clears stale locks and partial directories, rebuilds the store
//!
//! # Backup layout
//!
//! Each backup is a directory under `<root>/backups/<name>/` holding a
//! `manifest.json` and one archive (`data.tar.gz`, `data.zip`, ...). The
//! manifest lists every captured file with its size, modification time and
//! checksum. Incremental and differential backups store only what changed
//! against their baseline and list the files removed since.
//!
//! # Example
//!
//! ```rust,ignore
//! use dotbackup::backup::{BackupManager, CreateOptions, RestoreManager, RestoreRequest};
//! use dotbackup::config::paths::BackupPaths;
//! use dotbackup::models::BackupType;
//!
//! let paths = BackupPaths::new()?;
//! let manager = BackupManager::new(paths.clone());
//! let full = manager.create(BackupType::Full, CreateOptions::default())?;
//! manager.apply_retention()?;
//!
//! let restore = RestoreManager::new(paths);
//! let result = restore.restore(&RestoreRequest::new(&full.name, "/tmp/restore"))?;
//! println!("{}", result.summary());
//! ```

mod archive;
mod chain;
mod doctor;
mod manager;
mod restore;
mod retention;
mod scan;
mod transport;
mod verify;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::resolve_chain;
pub use doctor::{Doctor, DoctorOptions, DoctorReport, LockStatus};
pub use manager::{BackupDetails, BackupManager, CreateOptions};
pub use restore::{RestoreManager, RestoreMode, RestoreRequest, RestoreResult};
pub use retention::{plan_retention, Promotion, RetentionPlan};
pub use scan::disk_usage;
pub use transport::{ExportSummary, TransferSummary, Transport};
pub use verify::{verify_all, verify_record, VerificationReport, VerificationResult, VerifyFailure};
