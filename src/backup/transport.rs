//! Moving backup sets between roots
//!
//! `export` packs the store and every registered backup directory into one
//! gzip tar. `import` unpacks such an archive and merges it into this root,
//! and `migrate` copies directly from another root. Both merge the same way:
//! names already present are skipped, so repeating an import or migration
//! leaves the registry unchanged, and each record's `path` becomes its
//! directory under this root. Names that would escape `backups/` are refused.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::audit::{Journal, Operation};
use crate::config::paths::{BackupPaths, IMPORT_PREFIX};
use crate::error::{BackupError, BackupResult};
use crate::storage::{Document, MetadataStore};

const STORE_ENTRY: &str = "store.json";
const BACKUPS_ENTRY: &str = "backups";

/// Result of an export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub backups: usize,
    pub bytes: u64,
}

/// Result of an import or migration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSummary {
    /// Records added to this root
    pub copied: Vec<String>,
    /// Records left alone because the name already exists here
    pub skipped: Vec<String>,
}

/// Export, import and migration for one backup root
pub struct Transport {
    store: MetadataStore,
    journal: Journal,
}

impl Transport {
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

    /// Pack the store and all registered backups into a gzip tar
    ///
    /// Holds the store lock so the snapshot cannot change underneath.
    pub fn export(&self, output: &Path) -> BackupResult<ExportSummary> {
        if !self.paths().is_initialized() {
            return Err(BackupError::Config(format!(
                "backup root {} is not initialized",
                self.paths().root().display()
            )));
        }
        let _lock = self.store.lock()?;
        let doc = self.store.load()?;

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(output).map_err(|e| {
            BackupError::Io(format!("Failed to create {}: {}", output.display(), e))
        })?;
        let encoder = GzEncoder::new(BufWriter::new(file), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let pack_error =
            |e: std::io::Error| BackupError::Archive(format!("Failed to write export: {}", e));

        builder
            .append_path_with_name(self.paths().store_file(), STORE_ENTRY)
            .map_err(pack_error)?;

        let mut exported = 0;
        for record in &doc.backups {
            if !record.path.is_dir() {
                warn!(name = %record.name, path = %record.path.display(), "backup directory missing, not exported");
                continue;
            }
            builder
                .append_dir_all(format!("{}/{}", BACKUPS_ENTRY, record.name), &record.path)
                .map_err(pack_error)?;
            exported += 1;
        }

        let encoder = builder.into_inner().map_err(pack_error)?;
        let mut writer = encoder.finish().map_err(pack_error)?;
        writer.flush()?;
        drop(writer);

        let summary = ExportSummary {
            path: output.to_path_buf(),
            backups: exported,
            bytes: fs::metadata(output)?.len(),
        };
        info!(path = %output.display(), backups = exported, "exported backup root");
        self.journal.record(
            Operation::Export,
            None,
            Some(format!("{} backups to {}", exported, output.display())),
        );
        Ok(summary)
    }

    /// Merge an exported archive into this root
    pub fn import(&self, archive: &Path) -> BackupResult<TransferSummary> {
        if !archive.is_file() {
            return Err(BackupError::NotFound {
                entity_type: "Archive",
                identifier: archive.display().to_string(),
            });
        }

        self.paths().ensure_directories()?;
        let was_initialized = self.paths().is_initialized();
        let _lock = self.store.lock()?;
        let mut doc = self.store.load()?;

        let unpack_dir = self.paths().root().join(format!(
            "{}{}",
            IMPORT_PREFIX,
            Utc::now().format("%Y%m%d%H%M%S%f")
        ));
        let result = self.merge_export(archive, &unpack_dir, &mut doc, was_initialized);
        if unpack_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&unpack_dir) {
                warn!(path = %unpack_dir.display(), error = %e, "failed to remove import scratch directory");
            }
        }
        let summary = result?;

        self.store.save(&doc)?;
        for name in &summary.copied {
            self.journal.record(
                Operation::Import,
                Some(name),
                Some(format!("from {}", archive.display())),
            );
        }
        info!(
            imported = summary.copied.len(),
            skipped = summary.skipped.len(),
            "import complete"
        );
        Ok(summary)
    }

    fn merge_export(
        &self,
        archive: &Path,
        unpack_dir: &Path,
        doc: &mut Document,
        was_initialized: bool,
    ) -> BackupResult<TransferSummary> {
        let file = File::open(archive)?;
        let mut unpacker = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
        unpacker.unpack(unpack_dir).map_err(|e| {
            BackupError::Archive(format!("{} is not a valid export: {}", archive.display(), e))
        })?;

        let store_path = unpack_dir.join(STORE_ENTRY);
        if !store_path.is_file() {
            return Err(BackupError::Archive(format!(
                "{} has no {}",
                archive.display(),
                STORE_ENTRY
            )));
        }
        let contents = fs::read_to_string(&store_path)?;
        let imported: Document = serde_json::from_str(&contents).map_err(|e| {
            BackupError::StoreCorrupt(format!("store in {} does not parse: {}", archive.display(), e))
        })?;
        // Rejects names that would leave backups/ once joined to it
        imported.validate()?;

        if !was_initialized {
            doc.config = imported.config.clone();
        }

        let mut summary = TransferSummary::default();
        for record in &imported.backups {
            let source_dir = unpack_dir.join(BACKUPS_ENTRY).join(&record.name);
            if doc.contains(&record.name) {
                summary.skipped.push(record.name.clone());
                continue;
            }
            if !source_dir.is_dir() {
                warn!(name = %record.name, "export has no directory for backup, skipping");
                summary.skipped.push(record.name.clone());
                continue;
            }
            let destination = self.paths().backup_dir(&record.name);
            if destination.exists() {
                warn!(path = %destination.display(), "unregistered directory in the way, skipping");
                summary.skipped.push(record.name.clone());
                continue;
            }

            fs::rename(&source_dir, &destination)?;
            let mut merged = record.clone();
            merged.path = destination;
            debug!(name = %merged.name, path = %merged.path.display(), "imported backup");
            doc.insert(merged)?;
            summary.copied.push(record.name.clone());
        }
        Ok(summary)
    }

    /// Copy every backup from another root into this one
    ///
    /// Running it again with the same source adds nothing.
    pub fn migrate_from(&self, source: &BackupPaths) -> BackupResult<TransferSummary> {
        if source.root() == self.paths().root() {
            return Err(BackupError::Validation(
                "source and target roots are the same".into(),
            ));
        }
        if !source.is_initialized() {
            return Err(BackupError::Config(format!(
                "source root {} is not initialized",
                source.root().display()
            )));
        }

        let source_store = MetadataStore::new(source.clone());
        let _source_lock = source_store.lock()?;
        let source_doc = source_store.load()?;

        self.paths().ensure_directories()?;
        let was_initialized = self.paths().is_initialized();
        let _lock = self.store.lock()?;
        let mut doc = self.store.load()?;
        if !was_initialized {
            doc.config = source_doc.config.clone();
        }

        let mut summary = TransferSummary::default();
        for record in &source_doc.backups {
            if doc.contains(&record.name) {
                summary.skipped.push(record.name.clone());
                continue;
            }
            if !record.path.is_dir() {
                return Err(BackupError::NotFound {
                    entity_type: "Backup directory",
                    identifier: record.path.display().to_string(),
                });
            }

            let destination = self.paths().backup_dir(&record.name);
            if destination.exists() {
                // Left behind by an interrupted migration
                fs::remove_dir_all(&destination)?;
            }
            if let Err(e) = copy_dir(&record.path, &destination) {
                let _ = fs::remove_dir_all(&destination);
                return Err(e);
            }

            let mut migrated = record.clone();
            migrated.path = destination;
            doc.insert(migrated)?;
            summary.copied.push(record.name.clone());
        }

        self.store.save(&doc)?;
        for name in &summary.copied {
            self.journal.record(
                Operation::Migrate,
                Some(name),
                Some(format!("from {}", source.root().display())),
            );
        }
        info!(
            copied = summary.copied.len(),
            skipped = summary.skipped.len(),
            "migration complete"
        );
        Ok(summary)
    }
}

/// Recursively copy a directory of regular files
fn copy_dir(source: &Path, destination: &Path) -> BackupResult<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(source).map_err(|e| {
            BackupError::Io(format!("Failed to copy {}: {}", entry.path().display(), e))
        })?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).map_err(|e| {
                BackupError::Io(format!("Failed to copy {}: {}", entry.path().display(), e))
            })?;
        }
    }
    Ok(())
}
