//! Custom error types for dotbackup
//!
//! This module defines the error hierarchy for the backup engine using thiserror
//! for ergonomic error definitions. Every failure surfaces with its kind and a
//! human-readable reason; nothing is downgraded to a warning.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for backup engine operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Invalid input from the caller
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Duplicate entity errors
    #[error("{entity_type} already exists: {identifier}")]
    Duplicate {
        entity_type: &'static str,
        identifier: String,
    },

    /// The metadata store cannot be read or is internally inconsistent
    #[error("Metadata store is corrupt: {0} (repair with --force)")]
    StoreCorrupt(String),

    /// A differential or incremental backup has nothing to diff against
    #[error("No baseline backup: {0}")]
    NoBaseline(String),

    /// An ancestor needed to reconstruct a backup is missing or damaged
    #[error("Broken baseline chain for '{name}': {reason}")]
    BrokenChain { name: String, reason: String },

    /// Restore would overwrite an existing file
    #[error("Destination already exists: {} (use --overwrite)", .0.display())]
    DestinationExists(PathBuf),

    /// Verification found a mismatch
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Archive encoding/decoding errors
    #[error("Archive error: {0}")]
    Archive(String),

    /// The store lock could not be acquired in time
    #[error("Timed out waiting for store lock: {0}")]
    LockTimeout(String),

    /// Scheduler collaborator errors
    #[error("Schedule error: {0}")]
    Schedule(String),
}

impl BackupError {
    /// Create a "not found" error for backups
    pub fn backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Create a "duplicate" error for backups
    pub fn backup_exists(identifier: impl Into<String>) -> Self {
        Self::Duplicate {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Create a broken chain error
    pub fn broken_chain(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BrokenChain {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Process exit code for this error kind
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Validation(_) => 2,
            Self::NotFound { .. } => 3,
            Self::Duplicate { .. } => 4,
            Self::StoreCorrupt(_) => 5,
            Self::NoBaseline(_) => 6,
            Self::BrokenChain { .. } => 7,
            Self::DestinationExists(_) => 8,
            Self::Integrity(_) => 9,
            Self::LockTimeout(_) => 10,
            Self::Io(_) | Self::Json(_) | Self::Archive(_) | Self::Schedule(_) => 1,
        }
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<walkdir::Error> for BackupError {
    fn from(err: walkdir::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type alias for backup engine operations
pub type BackupResult<T> = Result<T, BackupError>;
