//! Core data models for dotbackup
//!
//! Backup records as kept in the metadata store, and the per-backup manifest.

pub mod manifest;
pub mod record;

pub use manifest::{
    fold_manifest, ChecksumAlgorithm, FileState, Manifest, ManifestEntry, ManifestMetadata,
    MANIFEST_FILE,
};
pub use record::{validate_name, BackupRecord, BackupType, Compression, Tier};
