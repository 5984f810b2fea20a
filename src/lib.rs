//! dotbackup - backup and restore engine for the dot bundle
//!
//! Captures dotfiles and tool configuration into versioned, compressed
//! archives, keeps them under a tiered retention policy, verifies their
//! integrity, restores them fully or selectively, and moves backup roots
//! between machines.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Backup root paths and engine settings
//! - `error`: Custom error types
//! - `models`: Backup records and manifests
//! - `storage`: Metadata store, atomic JSON I/O and the store lock
//! - `backup`: Capture, retention, verification, restore and transport
//! - `schedule`: Automatic backups through an external scheduler
//! - `audit`: Operation journal
//! - `display`: Terminal formatting
//! - `cli`: Command handlers
//!
//! # Example
//!
//! ```rust,ignore
//! use dotbackup::backup::{BackupManager, CreateOptions};
//! use dotbackup::config::paths::BackupPaths;
//! use dotbackup::models::BackupType;
//!
//! let manager = BackupManager::new(BackupPaths::new()?);
//! manager.init(false)?;
//! let record = manager.create(BackupType::Full, CreateOptions::default())?;
//! ```

pub mod audit;
pub mod backup;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod models;
pub mod schedule;
pub mod storage;

pub use error::{BackupError, BackupResult};
