//! Per-backup manifest
//!
//! The manifest is stored next to the archive and lists every captured file
//! with its size, modification time and (optionally) checksum. The verifier
//! cross-checks it against the archive; incremental captures diff against it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{BackupRecord, BackupType, Compression};
use crate::error::{BackupError, BackupResult};
use crate::storage::file_io::{read_json_required, write_json_atomic};

/// Manifest file name inside a backup directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Checksum algorithm for manifest entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// No per-file checksums; change detection uses size and mtime
    None,
    #[default]
    Sha256,
}

impl ChecksumAlgorithm {
    /// Parse checksum algorithm from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Some(Self::None),
            "sha256" | "sha-256" => Some(Self::Sha256),
            _ => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

/// One captured file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path inside the archive, relative to the capture base directory
    pub relative_path: String,
    /// Size in bytes
    pub size: u64,
    /// Modification time at capture
    pub modified: DateTime<Utc>,
    /// Hex digest, when checksums are enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Whether the path belongs to the configuration set
    #[serde(default)]
    pub config: bool,
    /// Unix permission bits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
}

impl ManifestEntry {
    /// Whether `current` differs from this (baseline) entry
    ///
    /// A file counts as changed when size or mtime differ, or when both sides
    /// carry a checksum and the checksums differ.
    pub fn differs_from(&self, current: &ManifestEntry) -> bool {
        if self.size != current.size || self.modified != current.modified {
            return true;
        }
        match (&self.checksum, &current.checksum) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        }
    }
}

/// Fields mirrored from the backup record for cross-validation and repair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
    pub created: DateTime<Utc>,
    pub source_type: BackupType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub compression: Compression,
    pub checksum: ChecksumAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ManifestMetadata {
    /// Build the mirrored metadata for a record
    pub fn for_record(record: &BackupRecord) -> Self {
        Self {
            name: record.name.clone(),
            created: record.created,
            source_type: record.backup_type,
            parent: record.parent.clone(),
            compression: record.compression,
            checksum: record.checksum,
            description: record.description.clone(),
        }
    }
}

/// Per-backup manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Number of files in the archive
    pub total_files: u64,
    /// Captured files, ordered by relative path
    pub entries: Vec<ManifestEntry>,
    /// Paths present in the baseline state but deleted since
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
    pub metadata: ManifestMetadata,
}

impl Manifest {
    /// Build a manifest, sorting entries by path
    pub fn new(
        metadata: ManifestMetadata,
        mut entries: Vec<ManifestEntry>,
        mut removed: Vec<String>,
    ) -> Self {
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        removed.sort();
        Self {
            total_files: entries.len() as u64,
            entries,
            removed,
            metadata,
        }
    }

    /// Load a manifest from disk
    pub fn load(path: &Path) -> BackupResult<Self> {
        read_json_required(path)
    }

    /// Write the manifest atomically
    pub fn save(&self, path: &Path) -> BackupResult<()> {
        write_json_atomic(path, self)
    }

    /// Sum of captured file sizes
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Entries tagged as configuration
    pub fn config_entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| e.config)
    }

    /// Look up an entry by relative path
    pub fn entry(&self, relative_path: &str) -> Option<&ManifestEntry> {
        self.entries
            .binary_search_by(|e| e.relative_path.as_str().cmp(relative_path))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Check that the mirrored metadata agrees with the registry record
    pub fn check_mirrors(&self, record: &BackupRecord) -> BackupResult<()> {
        let meta = &self.metadata;
        if meta.name != record.name {
            return Err(BackupError::Integrity(format!(
                "manifest belongs to '{}', not '{}'",
                meta.name, record.name
            )));
        }
        if meta.source_type != record.backup_type {
            return Err(BackupError::Integrity(format!(
                "manifest type {} does not match record type {}",
                meta.source_type, record.backup_type
            )));
        }
        if meta.created != record.created {
            return Err(BackupError::Integrity(format!(
                "manifest created {} does not match record created {}",
                meta.created, record.created
            )));
        }
        Ok(())
    }
}

/// Folded view of a baseline chain: relative path to the newest entry
pub type FileState = BTreeMap<String, ManifestEntry>;

/// Apply one manifest on top of a folded state
pub fn fold_manifest(state: &mut FileState, manifest: &Manifest) {
    for removed in &manifest.removed {
        state.remove(removed);
    }
    for entry in &manifest.entries {
        state.insert(entry.relative_path.clone(), entry.clone());
    }
}
