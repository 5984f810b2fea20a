//! Path management for dotbackup
//!
//! Resolves the backup root and every fixed location inside it.
//!
//! ## Path Resolution Order
//!
//! 1. `--root` flag on the command line
//! 2. `DOT_BACKUP_ROOT` environment variable (if set)
//! 3. `<data_local_dir>/dot/backups` (`~/.local/share/dot/backups` on Linux)

use std::path::{Path, PathBuf};

use directories::BaseDirs;

use crate::error::BackupError;

/// Environment variable overriding the backup root
pub const ROOT_ENV_VAR: &str = "DOT_BACKUP_ROOT";

/// Prefix of in-flight capture directories
pub const STAGING_PREFIX: &str = ".staging-";

/// Prefix of scratch directories used while importing
pub const IMPORT_PREFIX: &str = ".import-";

/// Manages all paths inside a backup root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPaths {
    root: PathBuf,
}

impl BackupPaths {
    /// Resolve the backup root from the environment or platform defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, BackupError> {
        let root = if let Ok(custom) = std::env::var(ROOT_ENV_VAR) {
            PathBuf::from(custom)
        } else {
            resolve_default_root()?
        };

        Ok(Self { root })
    }

    /// Create BackupPaths with an explicit root (flags, tests)
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// The backup root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The metadata store document
    pub fn store_file(&self) -> PathBuf {
        self.root.join("store.json")
    }

    /// The exclusive lock guarding store mutations
    pub fn lock_file(&self) -> PathBuf {
        self.root.join("store.lock")
    }

    /// The append-only operation journal
    pub fn journal_file(&self) -> PathBuf {
        self.root.join("journal.log")
    }

    /// Directory holding one subdirectory per backup
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Directory of a named backup
    pub fn backup_dir(&self, name: &str) -> PathBuf {
        self.backups_dir().join(name)
    }

    /// Staging directory for an in-flight capture
    pub fn staging_dir(&self, name: &str) -> PathBuf {
        self.backups_dir().join(format!("{}{}", STAGING_PREFIX, name))
    }

    /// Ensure the root and backups directories exist
    pub fn ensure_directories(&self) -> Result<(), BackupError> {
        std::fs::create_dir_all(self.backups_dir())
            .map_err(|e| BackupError::Io(format!("Failed to create backup root: {}", e)))?;
        Ok(())
    }

    /// Check if the root has been initialized (store exists)
    pub fn is_initialized(&self) -> bool {
        self.store_file().exists()
    }
}

/// Resolve the default backup root based on platform
fn resolve_default_root() -> Result<PathBuf, BackupError> {
    let dirs = BaseDirs::new()
        .ok_or_else(|| BackupError::Config("Could not determine home directory".into()))?;
    Ok(dirs.data_local_dir().join("dot").join("backups"))
}

/// The user's home directory, used as the default capture base
pub fn home_dir() -> Result<PathBuf, BackupError> {
    BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or_else(|| BackupError::Config("Could not determine home directory".into()))
}
