//! Backup manager for dotbackup
//!
//! Captures new backups and maintains the registry: listing, inspection,
//! deletion, retention and verification. Every mutation runs under the store
//! lock and follows the same order: stage files on disk, persist the store,
//! then make the change visible or remove what the store no longer references.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::archive::ArchiveWriter;
use super::chain::{chain_state, resolve_chain};
use super::retention::{plan_retention, RetentionPlan};
use super::scan::{scan_sources, ScanRequest, ScannedFile};
use super::verify::{verify_all, verify_record, VerificationReport, VerificationResult};
use crate::audit::{Journal, JournalEntry, Operation};
use crate::config::paths::BackupPaths;
use crate::config::settings::EngineConfig;
use crate::error::{BackupError, BackupResult};
use crate::models::{
    validate_name, BackupRecord, BackupType, Compression, FileState, Manifest, ManifestMetadata,
    MANIFEST_FILE,
};
use crate::storage::{Document, MetadataStore};

/// Optional inputs to `create`
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Backup name; derived from the type and timestamp when absent
    pub name: Option<String>,
    /// Explicit baseline, overriding the automatic choice
    pub parent: Option<String>,
    pub description: Option<String>,
    /// Source paths overriding the configured ones (ignored for config-only)
    pub sources: Option<Vec<String>>,
    /// Exclude patterns overriding the configured ones
    pub excludes: Option<Vec<String>>,
    /// Compression overriding the configured default
    pub compression: Option<Compression>,
}

impl CreateOptions {
    /// Options with only a name set
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// A record with everything `info` shows about it
#[derive(Debug, Clone)]
pub struct BackupDetails {
    pub record: BackupRecord,
    /// Baseline chain from the root ancestor to this backup
    pub chain: Vec<String>,
    /// Why the chain could not be resolved, if it could not
    pub chain_error: Option<String>,
    /// Records that depend on this one
    pub dependents: Vec<String>,
    pub manifest: Option<Manifest>,
}

/// Captures backups and manages the registry of one backup root
pub struct BackupManager {
    store: MetadataStore,
    journal: Journal,
}

impl BackupManager {
    /// Create a new BackupManager
    pub fn new(paths: BackupPaths) -> Self {
        let journal = Journal::new(paths.journal_file());
        Self {
            store: MetadataStore::new(paths),
            journal,
        }
    }

    pub fn paths(&self) -> &BackupPaths {
        self.store.paths()
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Initialize the backup root
    ///
    /// Returns `false` when the root was already initialized.
    pub fn init(&self, force: bool) -> BackupResult<bool> {
        let created = self.store.init(force)?;
        if created {
            info!(root = %self.paths().root().display(), "initialized backup root");
            self.journal.record(
                Operation::Repair,
                None,
                Some(format!("initialized {}", self.paths().root().display())),
            );
        }
        Ok(created)
    }

    fn require_initialized(&self) -> BackupResult<()> {
        if self.paths().is_initialized() {
            Ok(())
        } else {
            Err(BackupError::Config(format!(
                "backup root {} is not initialized; run `dot-backup init`",
                self.paths().root().display()
            )))
        }
    }

    /// Load the store of an initialized root
    fn load(&self) -> BackupResult<Document> {
        self.require_initialized()?;
        self.store.load()
    }

    /// Capture a new backup
    ///
    /// Nothing is registered unless the archive and manifest were written in
    /// full; on any failure the staging directory is removed and the store is
    /// left untouched.
    pub fn create(
        &self,
        backup_type: BackupType,
        options: CreateOptions,
    ) -> BackupResult<BackupRecord> {
        self.require_initialized()?;
        let lock = self.store.lock()?;
        let mut doc = self.store.load()?;
        let config = doc.config.clone();
        let created = Utc::now();

        let name = match options.name {
            Some(name) => {
                validate_name(&name)?;
                name
            }
            None => self.default_name(&doc.backups, backup_type, created),
        };
        if doc.contains(&name) {
            return Err(BackupError::backup_exists(name));
        }
        let final_dir = self.paths().backup_dir(&name);
        if final_dir.exists() {
            return Err(BackupError::Validation(format!(
                "{} exists but is not registered; run `dot-backup doctor`",
                final_dir.display()
            )));
        }

        let parent = resolve_parent(&doc, backup_type, options.parent.as_deref())?;
        let baseline = match &parent {
            Some(parent) => Some(chain_state(&doc, parent)?),
            None => None,
        };

        let base_dir = config.base_dir()?;
        let sources = match backup_type {
            BackupType::ConfigOnly => config.config_paths.clone(),
            _ => options.sources.unwrap_or_else(|| config.sources.clone()),
        };
        let excludes = options.excludes.unwrap_or_else(|| config.excludes.clone());

        let scanned = scan_sources(&ScanRequest {
            base_dir: &base_dir,
            sources: &sources,
            excludes: &excludes,
            config_paths: &config.config_paths,
            checksum: config.checksum,
        })?;
        let (selected, removed) = select_changes(&scanned, baseline.as_ref());
        if selected.is_empty() && !backup_type.requires_parent() {
            warn!(name = %name, "no files matched the source paths");
        }

        let mut record = BackupRecord {
            name: name.clone(),
            backup_type,
            parent,
            created,
            path: final_dir.clone(),
            compression: options.compression.unwrap_or(config.compression),
            checksum: config.checksum,
            size_bytes: 0,
            file_count: selected.len() as u64,
            tier: None,
            description: options.description,
        };

        let staging = self.paths().staging_dir(&name);
        record.size_bytes = stage_backup(&staging, &record, &selected, removed)?;

        if let Err(e) = fs::rename(&staging, &final_dir) {
            discard(&staging);
            return Err(BackupError::Io(format!(
                "Failed to move {} into place: {}",
                staging.display(),
                e
            )));
        }

        doc.insert(record.clone())?;
        if let Err(e) = self.store.save(&doc) {
            discard(&final_dir);
            return Err(e);
        }
        drop(lock);

        info!(
            name = %record.name,
            backup_type = %record.backup_type,
            files = record.file_count,
            bytes = record.size_bytes,
            "created backup"
        );
        self.journal.record(
            Operation::Create,
            Some(&record.name),
            Some(format!("{}, {} files", record.backup_type, record.file_count)),
        );
        Ok(record)
    }

    /// Timestamp-derived name that is not taken yet
    fn default_name(
        &self,
        records: &[BackupRecord],
        backup_type: BackupType,
        created: DateTime<Utc>,
    ) -> String {
        let base = format!("{}-{}", backup_type, created.format("%Y%m%d-%H%M%S"));
        let taken = |candidate: &str| {
            records.iter().any(|r| r.name == candidate)
                || self.paths().backup_dir(candidate).exists()
        };
        let mut candidate = base.clone();
        let mut suffix = 2;
        while taken(&candidate) {
            candidate = format!("{}-{}", base, suffix);
            suffix += 1;
        }
        candidate
    }

    /// Records matching an optional filter, newest first
    pub fn list(&self, filter: Option<&str>) -> BackupResult<Vec<BackupRecord>> {
        let doc = self.load()?;
        let mut records: Vec<BackupRecord> = doc
            .backups
            .into_iter()
            .filter(|r| filter.map_or(true, |f| r.matches_filter(f)))
            .collect();
        records.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(records)
    }

    /// Get a record by name
    pub fn get(&self, name: &str) -> BackupResult<BackupRecord> {
        let doc = self.load()?;
        doc.require(name).cloned()
    }

    /// Record plus lineage and manifest
    pub fn info(&self, name: &str) -> BackupResult<BackupDetails> {
        let doc = self.load()?;
        let record = doc.require(name)?.clone();

        let (chain, chain_error) = match resolve_chain(&doc, name) {
            Ok(chain) => (chain.iter().map(|r| r.name.clone()).collect(), None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };
        let manifest = Manifest::load(&record.manifest_path()).ok();

        Ok(BackupDetails {
            dependents: doc.descendants(name),
            record,
            chain,
            chain_error,
            manifest,
        })
    }

    /// Delete a backup
    ///
    /// A backup other records depend on is only deleted with `force`, which
    /// deletes the dependents as well. Returns the deleted records.
    pub fn delete(&self, name: &str, force: bool) -> BackupResult<Vec<BackupRecord>> {
        self.require_initialized()?;
        let removed = self.store.update(|doc| {
            doc.require(name)?;
            let dependents = doc.descendants(name);
            if !dependents.is_empty() && !force {
                return Err(BackupError::Validation(format!(
                    "'{}' is the baseline of {}; delete those first or use --force",
                    name,
                    dependents.join(", ")
                )));
            }

            let mut removed = Vec::new();
            for victim in dependents.iter().map(String::as_str).chain([name]) {
                if let Some(record) = doc.remove(victim) {
                    removed.push(record);
                }
            }
            Ok(removed)
        })?;

        self.remove_directories(&removed, Operation::Delete)?;
        Ok(removed)
    }

    /// Evaluate the retention policy without changing anything
    pub fn plan_retention(&self) -> BackupResult<RetentionPlan> {
        let doc = self.load()?;
        Ok(plan_retention(&doc.config.retention, &doc.backups))
    }

    /// Apply the retention policy
    ///
    /// Tier assignments and removals are saved before any directory is
    /// deleted, so an interruption leaves at worst an unreferenced directory
    /// for `doctor` to clean up.
    pub fn apply_retention(&self) -> BackupResult<RetentionPlan> {
        self.require_initialized()?;
        let (plan, pruned) = self.store.update(|doc| {
            let plan = plan_retention(&doc.config.retention, &doc.backups);
            for record in doc.backups.iter_mut() {
                record.tier = plan.tier_of(&record.name);
            }
            let pruned: Vec<BackupRecord> =
                plan.prune.iter().filter_map(|name| doc.remove(name)).collect();
            Ok((plan, pruned))
        })?;

        for promotion in &plan.promotions {
            let from = promotion
                .from
                .map_or_else(|| "none".to_string(), |t| t.to_string());
            self.journal.record(
                Operation::Promote,
                Some(&promotion.name),
                Some(format!("{} -> {}", from, promotion.to)),
            );
        }
        self.remove_directories(&pruned, Operation::Prune)?;

        info!(
            promoted = plan.promotions.len(),
            pruned = plan.prune.len(),
            protected = plan.protected.len(),
            "applied retention policy"
        );
        Ok(plan)
    }

    fn remove_directories(
        &self,
        records: &[BackupRecord],
        operation: Operation,
    ) -> BackupResult<()> {
        let mut failures = Vec::new();
        for record in records {
            if record.path.exists() {
                if let Err(e) = fs::remove_dir_all(&record.path) {
                    failures.push(format!("{}: {}", record.path.display(), e));
                    continue;
                }
            }
            debug!(name = %record.name, "removed backup directory");
            self.journal.record(operation, Some(&record.name), None);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BackupError::Io(format!(
                "removed from the store but could not delete: {}",
                failures.join("; ")
            )))
        }
    }

    /// Verify one backup
    pub fn verify(&self, name: &str) -> BackupResult<VerificationResult> {
        let doc = self.load()?;
        let record = doc.require(name)?;
        Ok(verify_record(&doc, record))
    }

    /// Verify every backup
    pub fn verify_all(&self) -> BackupResult<VerificationReport> {
        let doc = self.load()?;
        Ok(verify_all(&doc))
    }

    /// Current engine configuration
    pub fn config(&self) -> BackupResult<EngineConfig> {
        Ok(self.load()?.config)
    }

    /// Change one setting by key
    pub fn set_config(&self, key: &str, value: &str) -> BackupResult<()> {
        self.update_config(|config| config.set(key, value))?;
        self.journal
            .record(Operation::Config, None, Some(format!("{} = {}", key, value)));
        Ok(())
    }

    /// Mutate the configuration under the store lock
    pub fn update_config<F>(&self, f: F) -> BackupResult<EngineConfig>
    where
        F: FnOnce(&mut EngineConfig) -> BackupResult<()>,
    {
        self.require_initialized()?;
        self.store.update(|doc| {
            f(&mut doc.config)?;
            Ok(doc.config.clone())
        })
    }

    /// Most recent journal entries
    pub fn history(&self, limit: usize) -> BackupResult<Vec<JournalEntry>> {
        self.journal.read_recent(limit)
    }
}

/// Pick the baseline for a new backup
fn resolve_parent(
    doc: &Document,
    backup_type: BackupType,
    explicit: Option<&str>,
) -> BackupResult<Option<String>> {
    match (backup_type, explicit) {
        (BackupType::Full | BackupType::ConfigOnly, Some(parent)) => {
            Err(BackupError::Validation(format!(
                "{} backups have no parent (got '{}')",
                backup_type, parent
            )))
        }
        (BackupType::Full | BackupType::ConfigOnly, None) => Ok(None),
        (BackupType::Incremental, Some(parent)) => Ok(Some(doc.require(parent)?.name.clone())),
        (BackupType::Incremental, None) => doc
            .latest()
            .map(|r| Some(r.name.clone()))
            .ok_or_else(|| {
                BackupError::NoBaseline(
                    "no previous backup to build an incremental on; create a full backup first"
                        .into(),
                )
            }),
        (BackupType::Differential, Some(parent)) => {
            let record = doc.require(parent)?;
            if record.backup_type != BackupType::Full {
                return Err(BackupError::Validation(format!(
                    "differential baseline '{}' is a {} backup, not full",
                    parent, record.backup_type
                )));
            }
            Ok(Some(record.name.clone()))
        }
        (BackupType::Differential, None) => doc
            .latest_of_type(BackupType::Full)
            .map(|r| Some(r.name.clone()))
            .ok_or_else(|| {
                BackupError::NoBaseline(
                    "no full backup exists for a differential; create a full backup first".into(),
                )
            }),
    }
}

/// Files to capture and baseline paths that disappeared
fn select_changes<'a>(
    scanned: &'a BTreeMap<String, ScannedFile>,
    baseline: Option<&FileState>,
) -> (Vec<&'a ScannedFile>, Vec<String>) {
    let Some(baseline) = baseline else {
        return (scanned.values().collect(), Vec::new());
    };

    let selected = scanned
        .values()
        .filter(|file| {
            baseline
                .get(&file.entry.relative_path)
                .map_or(true, |previous| previous.differs_from(&file.entry))
        })
        .collect();
    let removed = baseline
        .keys()
        .filter(|path| !scanned.contains_key(*path))
        .cloned()
        .collect();
    (selected, removed)
}

/// Write archive and manifest into the staging directory
///
/// Returns the archive size. The staging directory is removed on failure.
fn stage_backup(
    staging: &Path,
    record: &BackupRecord,
    selected: &[&ScannedFile],
    removed: Vec<String>,
) -> BackupResult<u64> {
    let result = write_staging(staging, record, selected, removed);
    if result.is_err() {
        discard(staging);
    }
    result
}

fn write_staging(
    staging: &Path,
    record: &BackupRecord,
    selected: &[&ScannedFile],
    removed: Vec<String>,
) -> BackupResult<u64> {
    if staging.exists() {
        fs::remove_dir_all(staging)?;
    }
    fs::create_dir_all(staging)?;

    let mut writer = ArchiveWriter::create(
        &staging.join(record.compression.archive_file_name()),
        record.compression,
    )?;
    for file in selected {
        writer.append_file(&file.entry.relative_path, &file.absolute)?;
    }
    let size = writer.finish()?;

    let manifest = Manifest::new(
        ManifestMetadata::for_record(record),
        selected.iter().map(|file| file.entry.clone()).collect(),
        removed,
    );
    manifest.save(&staging.join(MANIFEST_FILE))?;
    Ok(size)
}

fn discard(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        if dir.exists() {
            warn!(path = %dir.display(), error = %e, "failed to remove partial backup");
        }
    }
}
