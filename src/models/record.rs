//! Backup record model
//!
//! A `BackupRecord` is the registry entry for one backup: its identity, type,
//! lineage, location and the settings it was captured with.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::manifest::ChecksumAlgorithm;
use crate::error::{BackupError, BackupResult};

const MAX_NAME_LEN: usize = 128;

/// Check that `name` can serve as a backup directory name
///
/// Names become a single path component under `backups/`, so separators,
/// leading dots and anything outside `[A-Za-z0-9._-]` are rejected.
pub fn validate_name(name: &str) -> BackupResult<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.starts_with('.') || !valid_chars {
        return Err(BackupError::Validation(format!(
            "invalid backup name '{}': use letters, digits, '-', '_' or '.', not starting with '.'",
            name
        )));
    }
    Ok(())
}

/// Kind of capture a backup represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupType {
    /// Every file under the source paths
    Full,
    /// Files changed since the most recent backup of any type
    Incremental,
    /// Files changed since the most recent full backup
    Differential,
    /// The fixed configuration path set only
    ConfigOnly,
}

impl BackupType {
    /// Parse backup type from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "full" => Some(Self::Full),
            "incremental" | "incr" | "inc" => Some(Self::Incremental),
            "differential" | "diff" => Some(Self::Differential),
            "config-only" | "config_only" | "config" => Some(Self::ConfigOnly),
            _ => None,
        }
    }

    /// Whether records of this type must reference a parent
    pub fn requires_parent(&self) -> bool {
        matches!(self, Self::Incremental | Self::Differential)
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Incremental => write!(f, "incremental"),
            Self::Differential => write!(f, "differential"),
            Self::ConfigOnly => write!(f, "config-only"),
        }
    }
}

/// Archive compression, fixed when the backup is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Gzip,
    Bzip2,
    Xz,
    Zip,
    None,
}

impl Compression {
    /// Parse compression from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gzip" | "gz" => Some(Self::Gzip),
            "bzip2" | "bz2" => Some(Self::Bzip2),
            "xz" => Some(Self::Xz),
            "zip" => Some(Self::Zip),
            "none" | "tar" => Some(Self::None),
            _ => None,
        }
    }

    /// File extension of the archive written with this compression
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Gzip => "tar.gz",
            Self::Bzip2 => "tar.bz2",
            Self::Xz => "tar.xz",
            Self::Zip => "zip",
            Self::None => "tar",
        }
    }

    /// Archive file name inside a backup directory
    pub fn archive_file_name(&self) -> String {
        format!("data.{}", self.extension())
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gzip => write!(f, "gzip"),
            Self::Bzip2 => write!(f, "bzip2"),
            Self::Xz => write!(f, "xz"),
            Self::Zip => write!(f, "zip"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Retention tier, ordered from shortest to longest lived
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
            Self::Monthly => write!(f, "monthly"),
            Self::Yearly => write!(f, "yearly"),
        }
    }
}

/// Registry entry for one backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Unique name
    pub name: String,

    /// Capture type
    #[serde(rename = "type")]
    pub backup_type: BackupType,

    /// Record this backup is relative to (incremental/differential only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Creation time (UTC)
    pub created: DateTime<Utc>,

    /// Backup directory holding the archive and manifest
    pub path: PathBuf,

    /// Archive compression
    pub compression: Compression,

    /// Checksum algorithm used for the manifest
    #[serde(default)]
    pub checksum: ChecksumAlgorithm,

    /// Size of the archive in bytes
    pub size_bytes: u64,

    /// Number of files captured
    pub file_count: u64,

    /// Retention tier assigned by the retention policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,

    /// Free-form description supplied at creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl BackupRecord {
    /// Path of the archive file
    pub fn archive_path(&self) -> PathBuf {
        self.path.join(self.compression.archive_file_name())
    }

    /// Path of the manifest file
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(super::manifest::MANIFEST_FILE)
    }

    /// Whether this record matches a list filter (type name or name substring)
    pub fn matches_filter(&self, filter: &str) -> bool {
        if let Some(kind) = BackupType::parse(filter) {
            return self.backup_type == kind;
        }
        let needle = filter.to_lowercase();
        self.name.to_lowercase().contains(&needle)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle))
            || self.tier.is_some_and(|t| t.to_string() == needle)
    }
}
