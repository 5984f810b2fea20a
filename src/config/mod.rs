//! Configuration module for dotbackup
//!
//! This module provides configuration management including:
//! - Backup root resolution
//! - Engine settings persisted in the metadata store

pub mod paths;
pub mod settings;

pub use paths::BackupPaths;
pub use settings::{AutoBackup, EngineConfig, Frequency, RetentionConfig};
