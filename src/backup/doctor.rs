//! Backup root health checks and repair
//!
//! An interrupted process can leave a stale store lock, half-written staging
//! or import directories, and backup directories the store never learned
//! about. `Doctor` finds and cleans these up and can rebuild the registry
//! from the manifests on disk when the store itself is lost or corrupt.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use super::scan::disk_usage;
use crate::audit::{Journal, Operation};
use crate::config::paths::{BackupPaths, IMPORT_PREFIX, STAGING_PREFIX};
use crate::error::{BackupError, BackupResult};
use crate::models::{validate_name, BackupRecord, Manifest, MANIFEST_FILE};
use crate::storage::lock::lock_age;
use crate::storage::{Document, MetadataStore};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// What `doctor` may change
#[derive(Debug, Clone, Copy, Default)]
pub struct DoctorOptions {
    /// Remove the store lock regardless of age and delete orphan directories
    pub force: bool,
    /// Rebuild the registry from manifests on disk
    pub repair: bool,
}

/// State of the store lock when doctor ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockStatus {
    #[default]
    Free,
    /// A stale lock was removed
    Removed { age: Duration },
    /// A lock younger than the timeout is held; nothing else was touched
    Held { age: Duration },
}

/// Findings and actions of a doctor run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoctorReport {
    pub lock: LockStatus,
    /// Staging and import scratch directories removed
    pub partials_removed: Vec<PathBuf>,
    /// Backup directories the store does not reference
    pub orphans: Vec<PathBuf>,
    pub orphans_removed: bool,
    /// Records whose backup directory is missing
    pub missing: Vec<String>,
    /// Why the store could not be loaded
    pub store_error: Option<String>,
    /// Number of records written by a registry rebuild
    pub rebuilt: Option<usize>,
}

impl DoctorReport {
    /// Whether nothing needs attention after this run
    pub fn is_healthy(&self) -> bool {
        !matches!(self.lock, LockStatus::Held { .. })
            && (self.orphans.is_empty() || self.orphans_removed)
            && self.missing.is_empty()
            && self.store_error.is_none()
    }
}

/// Checks and repairs one backup root
pub struct Doctor {
    store: MetadataStore,
    journal: Journal,
}

impl Doctor {
    pub fn new(paths: BackupPaths) -> Self {
        let journal = Journal::new(paths.journal_file());
        Self {
            store: MetadataStore::new(paths),
            journal,
        }
    }

    fn paths(&self) -> &BackupPaths {
        self.store.paths()
    }

    pub fn run(&self, options: DoctorOptions) -> BackupResult<DoctorReport> {
        let mut report = DoctorReport::default();
        if !self.paths().root().exists() {
            return Err(BackupError::Config(format!(
                "backup root {} does not exist",
                self.paths().root().display()
            )));
        }

        report.lock = self.clear_stale_lock(options.force)?;
        if matches!(report.lock, LockStatus::Held { .. }) {
            return Ok(report);
        }

        let _lock = self.store.lock()?;
        report.partials_removed = self.remove_partials()?;

        let mut loaded = self.store.load();
        if options.repair {
            let previous = loaded.as_ref().ok();
            let rebuilt = self.rebuild(previous)?;
            report.rebuilt = Some(rebuilt.backups.len());
            loaded = Ok(rebuilt);
        }

        match loaded {
            Ok(doc) => {
                report.missing = doc
                    .backups
                    .iter()
                    .filter(|r| !r.path.is_dir())
                    .map(|r| r.name.clone())
                    .collect();
                report.orphans = self.find_orphans(&doc)?;
                if options.force && !report.orphans.is_empty() {
                    for orphan in &report.orphans {
                        fs::remove_dir_all(orphan)?;
                        info!(path = %orphan.display(), "removed orphan backup directory");
                    }
                    report.orphans_removed = true;
                    self.journal.record(
                        Operation::Repair,
                        None,
                        Some(format!("removed {} orphan directories", report.orphans.len())),
                    );
                }
            }
            Err(e) => report.store_error = Some(e.to_string()),
        }

        Ok(report)
    }

    fn lock_timeout(&self) -> Duration {
        self.store
            .load()
            .map(|doc| doc.config.lock_timeout())
            .unwrap_or(DEFAULT_LOCK_TIMEOUT)
    }

    fn clear_stale_lock(&self, force: bool) -> BackupResult<LockStatus> {
        let path = self.paths().lock_file();
        if !path.exists() {
            return Ok(LockStatus::Free);
        }

        let age = lock_age(&path).unwrap_or_default();
        if !force && age < self.lock_timeout() {
            return Ok(LockStatus::Held { age });
        }

        fs::remove_file(&path).map_err(|e| {
            BackupError::Io(format!("Failed to remove {}: {}", path.display(), e))
        })?;
        warn!(path = %path.display(), age_secs = age.as_secs(), "removed stale store lock");
        self.journal.record(
            Operation::Repair,
            None,
            Some(format!("removed store lock held for {}s", age.as_secs())),
        );
        Ok(LockStatus::Removed { age })
    }

    /// Remove leftovers of interrupted captures and imports
    fn remove_partials(&self) -> BackupResult<Vec<PathBuf>> {
        let mut removed = Vec::new();
        let candidates = [
            (self.paths().backups_dir(), STAGING_PREFIX),
            (self.paths().root().to_path_buf(), IMPORT_PREFIX),
        ];
        for (dir, prefix) in candidates {
            for path in subdirectories(&dir)? {
                if dir_name(&path).starts_with(prefix) {
                    fs::remove_dir_all(&path)?;
                    info!(path = %path.display(), "removed partial directory");
                    removed.push(path);
                }
            }
        }
        if !removed.is_empty() {
            self.journal.record(
                Operation::Repair,
                None,
                Some(format!("removed {} partial directories", removed.len())),
            );
        }
        Ok(removed)
    }

    /// Directories under `backups/` named after no record
    fn find_orphans(&self, doc: &Document) -> BackupResult<Vec<PathBuf>> {
        let referenced: HashSet<&str> = doc.backups.iter().map(|r| r.name.as_str()).collect();
        Ok(subdirectories(&self.paths().backups_dir())?
            .into_iter()
            .filter(|path| {
                let name = dir_name(path);
                !name.starts_with('.') && !referenced.contains(name.as_str())
            })
            .collect())
    }

    /// Rebuild the registry from the manifests found under `backups/`
    ///
    /// Configuration and tiers are carried over from the previous document
    /// when it could still be read.
    fn rebuild(&self, previous: Option<&Document>) -> BackupResult<Document> {
        let mut doc = Document::new(self.paths().root());
        if let Some(previous) = previous {
            doc.config = previous.config.clone();
        }

        let mut records = Vec::new();
        for dir in subdirectories(&self.paths().backups_dir())? {
            if dir_name(&dir).starts_with('.') {
                continue;
            }
            let manifest = match Manifest::load(&dir.join(MANIFEST_FILE)) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "no usable manifest, not recovered");
                    continue;
                }
            };
            let meta = manifest.metadata;
            if validate_name(&meta.name).is_err() || meta.name != dir_name(&dir) {
                warn!(path = %dir.display(), name = %meta.name, "manifest name does not match its directory, not recovered");
                continue;
            }
            let archive = dir.join(meta.compression.archive_file_name());
            records.push(BackupRecord {
                tier: previous
                    .and_then(|p| p.get(&meta.name))
                    .and_then(|r| r.tier),
                name: meta.name,
                backup_type: meta.source_type,
                parent: meta.parent,
                created: meta.created,
                size_bytes: disk_usage(&archive).unwrap_or(0),
                file_count: manifest.total_files,
                path: dir,
                compression: meta.compression,
                checksum: meta.checksum,
                description: meta.description,
            });
        }

        records.sort_by(|a, b| a.created.cmp(&b.created));
        for record in records {
            if doc.contains(&record.name) {
                warn!(name = %record.name, path = %record.path.display(), "duplicate backup name, not recovered");
                continue;
            }
            doc.insert(record)?;
        }

        self.store.save_forced(&doc)?;
        info!(records = doc.backups.len(), "rebuilt metadata store");
        self.journal.record(
            Operation::Repair,
            None,
            Some(format!("rebuilt store with {} records", doc.backups.len())),
        );
        Ok(doc)
    }
}

fn subdirectories(dir: &Path) -> BackupResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::testing::Fixture;
    use crate::backup::verify_all;
    use crate::models::BackupType;

    fn doctor(fx: &Fixture) -> Doctor {
        Doctor::new(fx.paths().clone())
    }

    #[test]
    fn test_healthy_root() {
        let fx = Fixture::new();
        fx.create(BackupType::Full, "base");
        let report = doctor(&fx).run(DoctorOptions::default()).unwrap();
        assert!(report.is_healthy());
        assert_eq!(report.lock, LockStatus::Free);
    }

    #[test]
    fn test_fresh_lock_is_left_alone_unless_forced() {
        let fx = Fixture::new();
        fs::write(fx.paths().lock_file(), "pid=1").unwrap();
        fs::create_dir_all(fx.paths().staging_dir("x")).unwrap();

        let report = doctor(&fx).run(DoctorOptions::default()).unwrap();
        assert!(matches!(report.lock, LockStatus::Held { .. }));
        assert!(fx.paths().lock_file().exists());
        assert!(fx.paths().staging_dir("x").exists());

        let forced = doctor(&fx)
            .run(DoctorOptions {
                force: true,
                repair: false,
            })
            .unwrap();
        assert!(matches!(forced.lock, LockStatus::Removed { .. }));
        assert!(!fx.paths().lock_file().exists());
        assert_eq!(forced.partials_removed, vec![fx.paths().staging_dir("x")]);
    }

    #[test]
    fn test_stale_lock_is_removed_after_timeout() {
        let fx = Fixture::new();
        fx.manager().set_config("lock_timeout_secs", "0").unwrap();
        fs::write(fx.paths().lock_file(), "pid=1").unwrap();

        let report = doctor(&fx).run(DoctorOptions::default()).unwrap();
        assert!(matches!(report.lock, LockStatus::Removed { .. }));
    }

    #[test]
    fn test_orphans_reported_then_removed_with_force() {
        let fx = Fixture::new();
        fx.create(BackupType::Full, "base");
        let orphan = fx.paths().backup_dir("leftover");
        fs::create_dir_all(&orphan).unwrap();

        let report = doctor(&fx).run(DoctorOptions::default()).unwrap();
        assert_eq!(report.orphans, vec![orphan.clone()]);
        assert!(!report.is_healthy());
        assert!(orphan.exists());

        let forced = doctor(&fx)
            .run(DoctorOptions {
                force: true,
                repair: false,
            })
            .unwrap();
        assert!(forced.orphans_removed);
        assert!(!orphan.exists());
        assert!(fx.paths().backup_dir("base").exists());
    }

    #[test]
    fn test_moved_root_keeps_its_backups() {
        let fx = Fixture::new();
        fx.create(BackupType::Full, "base");
        let moved = fx.paths().root().with_file_name("moved-root");
        fs::rename(fx.paths().root(), &moved).unwrap();
        let paths = BackupPaths::with_root(moved);

        let report = Doctor::new(paths.clone())
            .run(DoctorOptions {
                force: true,
                repair: false,
            })
            .unwrap();
        assert!(report.orphans.is_empty());
        assert!(report.missing.is_empty());
        assert!(report.is_healthy());
        assert!(paths.backup_dir("base").join(MANIFEST_FILE).is_file());

        let doc = MetadataStore::new(paths.clone()).load().unwrap();
        assert!(verify_all(&doc).all_valid());
    }

    #[test]
    fn test_missing_directory_is_reported() {
        let fx = Fixture::new();
        let base = fx.create(BackupType::Full, "base");
        fs::remove_dir_all(&base.path).unwrap();

        let report = doctor(&fx).run(DoctorOptions::default()).unwrap();
        assert_eq!(report.missing, vec!["base"]);
    }

    #[test]
    fn test_repair_rebuilds_corrupt_store_from_manifests() {
        let fx = Fixture::new();
        fx.create(BackupType::Full, "base");
        fx.write(".zshrc", "export EDITOR=hx\n");
        fx.create(BackupType::Incremental, "inc1");
        fs::write(fx.paths().store_file(), "{ truncated").unwrap();

        let report = doctor(&fx).run(DoctorOptions::default()).unwrap();
        assert!(report.store_error.is_some());

        let repaired = doctor(&fx)
            .run(DoctorOptions {
                force: false,
                repair: true,
            })
            .unwrap();
        assert_eq!(repaired.rebuilt, Some(2));
        assert!(repaired.store_error.is_none());

        let doc = fx.document();
        assert_eq!(doc.backups[0].name, "base");
        assert_eq!(doc.backups[1].parent.as_deref(), Some("base"));
        assert!(verify_all(&doc).all_valid());
    }
}
