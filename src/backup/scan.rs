//! Source enumeration for captures
//!
//! Walks the configured source paths, drops excluded files, and builds a
//! manifest entry (size, mtime, checksum, config tag) for every regular file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{BackupError, BackupResult};
use crate::models::{ChecksumAlgorithm, ManifestEntry};

/// What to scan
#[derive(Debug, Clone)]
pub struct ScanRequest<'a> {
    /// Directory archive paths are relative to
    pub base_dir: &'a Path,
    /// Source paths, relative to `base_dir` or absolute
    pub sources: &'a [String],
    /// Glob patterns matched against relative paths
    pub excludes: &'a [String],
    /// Paths tagged as configuration
    pub config_paths: &'a [String],
    pub checksum: ChecksumAlgorithm,
}

/// A file found on disk
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub absolute: PathBuf,
    pub entry: ManifestEntry,
}

/// Enumerate every capturable file, keyed by relative path
pub fn scan_sources(request: &ScanRequest<'_>) -> BackupResult<BTreeMap<String, ScannedFile>> {
    let excludes = build_globset(request.excludes)?;
    let config_paths: Vec<String> = request
        .config_paths
        .iter()
        .map(|p| normalize_relative(p))
        .collect();

    let mut files = BTreeMap::new();

    for source in request.sources {
        let root = resolve_source(request.base_dir, source);
        if !root.exists() {
            warn!(path = %root.display(), "source path does not exist, skipping");
            continue;
        }

        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let absolute = entry.path().to_path_buf();
            let relative = match relative_archive_path(request.base_dir, &absolute) {
                Ok(relative) => relative,
                Err(e) => {
                    warn!(path = %absolute.display(), error = %e, "skipping file");
                    continue;
                }
            };

            if excludes.is_match(&relative) {
                debug!(path = %relative, "excluded");
                continue;
            }
            if files.contains_key(&relative) {
                continue;
            }

            let metadata = entry.metadata()?;
            let modified: DateTime<Utc> = metadata.modified()?.into();
            let checksum = checksum_file(&absolute, request.checksum)?;
            let config = is_config_path(&relative, &config_paths);

            files.insert(
                relative.clone(),
                ScannedFile {
                    absolute,
                    entry: ManifestEntry {
                        relative_path: relative,
                        size: metadata.len(),
                        modified,
                        checksum,
                        config,
                        mode: file_mode(&metadata),
                    },
                },
            );
        }
    }

    debug!(files = files.len(), "scan complete");
    Ok(files)
}

/// Build a glob set from exclude patterns
pub fn build_globset(patterns: &[String]) -> BackupResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            BackupError::Validation(format!("Invalid pattern '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| BackupError::Validation(format!("Invalid patterns: {}", e)))
}

/// Resolve a configured source against the base directory
pub fn resolve_source(base_dir: &Path, source: &str) -> PathBuf {
    let path = Path::new(source);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(normalize_relative(source))
    }
}

/// Archive path of a file: relative to the base, or its absolute path with
/// the root stripped when it lies outside the base
///
/// Names that are not valid UTF-8 are rejected; a lossy conversion could
/// map two files to the same archive path.
pub fn relative_archive_path(base_dir: &Path, absolute: &Path) -> BackupResult<String> {
    let rest = absolute.strip_prefix(base_dir).unwrap_or(absolute);
    let mut parts: Vec<&str> = Vec::new();
    for component in rest.components() {
        if let Component::Normal(part) = component {
            let part = part.to_str().ok_or_else(|| {
                BackupError::Validation(format!(
                    "{} is not valid UTF-8 and cannot be archived",
                    absolute.display()
                ))
            })?;
            parts.push(part);
        }
    }

    if parts.is_empty() {
        return Err(BackupError::Validation(format!(
            "Cannot derive an archive path for {}",
            absolute.display()
        )));
    }
    Ok(parts.join("/"))
}

/// Check that an archive path is safe to join onto a restore target
pub fn validate_archive_path(relative: &str) -> BackupResult<()> {
    let path = Path::new(relative);
    let safe = !relative.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe {
        Ok(())
    } else {
        Err(BackupError::Archive(format!(
            "unsafe path in archive: {}",
            relative
        )))
    }
}

fn normalize_relative(path: &str) -> String {
    path.trim_start_matches("./").trim_end_matches('/').to_string()
}

fn is_config_path(relative: &str, config_paths: &[String]) -> bool {
    config_paths.iter().any(|c| {
        relative == c
            || relative
                .strip_prefix(c.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

/// Checksum of a file on disk
pub fn checksum_file(path: &Path, algorithm: ChecksumAlgorithm) -> BackupResult<Option<String>> {
    if !algorithm.is_enabled() {
        return Ok(None);
    }
    let file = File::open(path)
        .map_err(|e| BackupError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
    checksum_reader(BufReader::new(file), algorithm)
        .map_err(|e| BackupError::Io(format!("Failed to read {}: {}", path.display(), e)))
}

/// Checksum of a stream
pub fn checksum_reader<R: Read>(
    mut reader: R,
    algorithm: ChecksumAlgorithm,
) -> io::Result<Option<String>> {
    match algorithm {
        ChecksumAlgorithm::None => {
            io::copy(&mut reader, &mut io::sink())?;
            Ok(None)
        }
        ChecksumAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            let mut buffer = [0u8; 64 * 1024];
            loop {
                let read = reader.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
            }
            Ok(Some(hex::encode(hasher.finalize())))
        }
    }
}

/// Size of a file or directory tree in bytes
pub fn disk_usage(path: &Path) -> BackupResult<u64> {
    if path.is_file() {
        return Ok(fs::metadata(path)?.len());
    }
    let mut total = 0;
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}
