//! Backup verification
//!
//! Cross-checks each backup's manifest against the archive on disk: the
//! manifest must load and agree with the registry record, the archive must
//! hold exactly `total_files` files, per-file checksums must match when they
//! were recorded, and the parent chain must resolve.

use std::fmt;
use std::io::Read;

use serde::Serialize;
use tracing::debug;

use super::archive::ArchiveReader;
use super::chain::resolve_chain;
use super::scan::checksum_reader;
use crate::error::{BackupError, BackupResult};
use crate::models::{BackupRecord, Manifest};
use crate::storage::Document;

/// Why a backup failed verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum VerifyFailure {
    /// Manifest file is absent
    ManifestNotFound,
    /// Archive file is absent
    ArchiveNotFound,
    /// Manifest does not parse or disagrees with the record
    CorruptManifest { reason: String },
    /// Archive cannot be decoded
    CorruptArchive { reason: String },
    /// Archive holds a different number of files than the manifest lists
    CountMismatch { expected: u64, actual: u64 },
    /// A file's contents do not match its recorded checksum
    ChecksumMismatch { path: String },
    /// Archive holds a file the manifest does not list
    UnexpectedFile { path: String },
    /// Parent chain does not resolve
    BrokenChain { reason: String },
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManifestNotFound => write!(f, "manifest not found"),
            Self::ArchiveNotFound => write!(f, "archive not found"),
            Self::CorruptManifest { reason } => write!(f, "corrupt manifest: {}", reason),
            Self::CorruptArchive { reason } => write!(f, "corrupt archive: {}", reason),
            Self::CountMismatch { expected, actual } => write!(
                f,
                "file count mismatch: manifest lists {}, archive holds {}",
                expected, actual
            ),
            Self::ChecksumMismatch { path } => write!(f, "checksum mismatch: {}", path),
            Self::UnexpectedFile { path } => write!(f, "file not in manifest: {}", path),
            Self::BrokenChain { reason } => write!(f, "broken chain: {}", reason),
        }
    }
}

/// Verification outcome for one backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub name: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<VerifyFailure>,
}

impl VerificationResult {
    fn passed(name: &str) -> Self {
        Self {
            name: name.to_string(),
            valid: true,
            reason: None,
        }
    }

    fn failed(name: &str, reason: VerifyFailure) -> Self {
        Self {
            name: name.to_string(),
            valid: false,
            reason: Some(reason),
        }
    }

    /// Convert a failed result into an `Integrity` error
    pub fn into_result(self) -> BackupResult<()> {
        match self.reason {
            Some(reason) if !self.valid => Err(BackupError::Integrity(format!(
                "backup '{}' failed verification: {}",
                self.name, reason
            ))),
            _ => Ok(()),
        }
    }
}

/// Aggregated outcome of verifying every backup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub results: Vec<VerificationResult>,
}

impl VerificationReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.valid).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn all_valid(&self) -> bool {
        self.results.iter().all(|r| r.valid)
    }

    pub fn failures(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results.iter().filter(|r| !r.valid)
    }

    /// `Integrity` error listing every failure, or `Ok` when all passed
    pub fn into_result(self) -> BackupResult<()> {
        if self.all_valid() {
            return Ok(());
        }
        let names: Vec<&str> = self.failures().map(|r| r.name.as_str()).collect();
        Err(BackupError::Integrity(format!(
            "{} of {} backups failed verification: {}",
            names.len(),
            self.results.len(),
            names.join(", ")
        )))
    }
}

/// Verify one backup
pub fn verify_record(doc: &Document, record: &BackupRecord) -> VerificationResult {
    let name = record.name.as_str();

    let manifest_path = record.manifest_path();
    if !manifest_path.is_file() {
        return VerificationResult::failed(name, VerifyFailure::ManifestNotFound);
    }
    let manifest = match Manifest::load(&manifest_path) {
        Ok(manifest) => manifest,
        Err(e) => {
            return VerificationResult::failed(
                name,
                VerifyFailure::CorruptManifest {
                    reason: e.to_string(),
                },
            )
        }
    };
    if let Err(e) = manifest.check_mirrors(record) {
        return VerificationResult::failed(
            name,
            VerifyFailure::CorruptManifest {
                reason: e.to_string(),
            },
        );
    }
    if manifest.total_files != manifest.entries.len() as u64 {
        return VerificationResult::failed(
            name,
            VerifyFailure::CorruptManifest {
                reason: format!(
                    "total_files is {} but {} entries are listed",
                    manifest.total_files,
                    manifest.entries.len()
                ),
            },
        );
    }

    let reader = match ArchiveReader::open(&record.archive_path(), record.compression) {
        Ok(reader) => reader,
        Err(_) => return VerificationResult::failed(name, VerifyFailure::ArchiveNotFound),
    };

    if let Some(failure) = check_archive(&reader, &manifest, record) {
        return VerificationResult::failed(name, failure);
    }

    if let Err(e) = resolve_chain(doc, name) {
        return VerificationResult::failed(
            name,
            VerifyFailure::BrokenChain {
                reason: e.to_string(),
            },
        );
    }

    debug!(name = %name, files = manifest.total_files, "verified");
    VerificationResult::passed(name)
}

/// Read the whole archive, returning the first problem found
fn check_archive(
    reader: &ArchiveReader,
    manifest: &Manifest,
    record: &BackupRecord,
) -> Option<VerifyFailure> {
    let mut actual = 0u64;
    let mut failure = None;

    let walk = reader.for_each_file(|path, content: &mut dyn Read| {
        actual += 1;
        let digest = checksum_reader(content, record.checksum)
            .map_err(|e| BackupError::Archive(format!("{}: {}", path, e)))?;
        if failure.is_some() {
            return Ok(());
        }
        match manifest.entry(path) {
            None => {
                failure = Some(VerifyFailure::UnexpectedFile {
                    path: path.to_string(),
                })
            }
            Some(entry) => {
                if let (Some(expected), Some(found)) = (&entry.checksum, &digest) {
                    if expected != found {
                        failure = Some(VerifyFailure::ChecksumMismatch {
                            path: path.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    });

    if let Err(e) = walk {
        return Some(VerifyFailure::CorruptArchive {
            reason: e.to_string(),
        });
    }
    if failure.is_some() {
        return failure;
    }
    if actual != manifest.total_files {
        return Some(VerifyFailure::CountMismatch {
            expected: manifest.total_files,
            actual,
        });
    }
    None
}

/// Verify every backup in the store without stopping at the first failure
pub fn verify_all(doc: &Document) -> VerificationReport {
    VerificationReport {
        results: doc
            .backups
            .iter()
            .map(|record| verify_record(doc, record))
            .collect(),
    }
}
