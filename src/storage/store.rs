//! Metadata store
//!
//! A single JSON document per backup root holding the engine configuration
//! and every backup record. It is loaded whole into a typed `Document`,
//! mutated in memory and persisted with an atomic rename. Mutations run
//! under the exclusive store lock for their full read-modify-write cycle.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::file_io::write_json_atomic;
use super::lock::StoreLock;
use crate::config::paths::BackupPaths;
use crate::config::settings::EngineConfig;
use crate::error::{BackupError, BackupResult};
use crate::models::{validate_name, BackupRecord, BackupType};

/// Current document schema version
pub const STORE_VERSION: u32 = 1;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

fn default_version() -> u32 {
    STORE_VERSION
}

/// The registry document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Schema version for migration support
    #[serde(default = "default_version")]
    pub version: u32,

    /// Root the document was last written under
    #[serde(default)]
    pub root: PathBuf,

    /// Engine configuration
    #[serde(default)]
    pub config: EngineConfig,

    /// Backup records in creation order
    #[serde(default)]
    pub backups: Vec<BackupRecord>,
}

impl Document {
    /// Create an empty document for a root
    pub fn new(root: &Path) -> Self {
        Self {
            version: STORE_VERSION,
            root: root.to_path_buf(),
            config: EngineConfig::default(),
            backups: Vec::new(),
        }
    }

    /// Get a record by name
    pub fn get(&self, name: &str) -> Option<&BackupRecord> {
        self.backups.iter().find(|b| b.name == name)
    }

    /// Get a record by name, failing with `NotFound`
    pub fn require(&self, name: &str) -> BackupResult<&BackupRecord> {
        self.get(name)
            .ok_or_else(|| BackupError::backup_not_found(name))
    }

    /// Whether a record exists
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Append a record; names are unique
    pub fn insert(&mut self, record: BackupRecord) -> BackupResult<()> {
        if self.contains(&record.name) {
            return Err(BackupError::backup_exists(record.name));
        }
        self.backups.push(record);
        Ok(())
    }

    /// Remove a record by name
    pub fn remove(&mut self, name: &str) -> Option<BackupRecord> {
        let index = self.backups.iter().position(|b| b.name == name)?;
        Some(self.backups.remove(index))
    }

    /// Most recently created record of any type
    ///
    /// Ties on the timestamp go to the record appended last.
    pub fn latest(&self) -> Option<&BackupRecord> {
        self.backups
            .iter()
            .enumerate()
            .max_by_key(|(i, b)| (b.created, *i))
            .map(|(_, b)| b)
    }

    /// Most recently created record of a given type
    pub fn latest_of_type(&self, backup_type: BackupType) -> Option<&BackupRecord> {
        self.backups
            .iter()
            .enumerate()
            .filter(|(_, b)| b.backup_type == backup_type)
            .max_by_key(|(i, b)| (b.created, *i))
            .map(|(_, b)| b)
    }

    /// Records whose parent is `name`
    pub fn children(&self, name: &str) -> Vec<&BackupRecord> {
        self.backups
            .iter()
            .filter(|b| b.parent.as_deref() == Some(name))
            .collect()
    }

    /// Every record that depends on `name` directly or transitively
    pub fn descendants(&self, name: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            for child in self.children(&current) {
                if seen.insert(child.name.clone()) {
                    found.push(child.name.clone());
                    frontier.push(child.name.clone());
                }
            }
        }
        found
    }

    /// Structural checks that make a document unusable
    pub fn validate(&self) -> BackupResult<()> {
        let mut names = HashSet::new();
        for record in &self.backups {
            validate_name(&record.name)
                .map_err(|e| BackupError::StoreCorrupt(e.to_string()))?;
            if !names.insert(record.name.as_str()) {
                return Err(BackupError::StoreCorrupt(format!(
                    "duplicate backup name '{}'",
                    record.name
                )));
            }
        }
        Ok(())
    }

    /// Point every record at its directory under `paths`
    ///
    /// A record's directory is always `backups/<name>` of the root the store
    /// lives in, whatever path was recorded when it was written. Returns the
    /// number of records whose path changed.
    pub fn relocate(&mut self, paths: &BackupPaths) -> usize {
        let mut changed = 0;
        for record in &mut self.backups {
            let expected = paths.backup_dir(&record.name);
            if record.path != expected {
                record.path = expected;
                changed += 1;
            }
        }
        self.root = paths.root().to_path_buf();
        changed
    }
}

/// Handle to the metadata store of one backup root
#[derive(Debug, Clone)]
pub struct MetadataStore {
    paths: BackupPaths,
}

impl MetadataStore {
    /// Create a store handle
    pub fn new(paths: BackupPaths) -> Self {
        Self { paths }
    }

    /// Paths of the backup root
    pub fn paths(&self) -> &BackupPaths {
        &self.paths
    }

    /// Load the document
    ///
    /// A missing store yields an empty document; a malformed one fails with
    /// `StoreCorrupt`.
    pub fn load(&self) -> BackupResult<Document> {
        let path = self.paths.store_file();
        if !path.exists() {
            return Ok(Document::new(self.paths.root()));
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| BackupError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        let mut document: Document = serde_json::from_str(&contents).map_err(|e| {
            BackupError::StoreCorrupt(format!("{} does not parse: {}", path.display(), e))
        })?;
        document.validate()?;
        if document.root != self.paths.root() {
            debug!(
                from = %document.root.display(),
                to = %self.paths.root().display(),
                "store was written under another root"
            );
        }
        let relocated = document.relocate(&self.paths);
        if relocated > 0 {
            debug!(records = relocated, "relocated record paths");
        }

        if document.version > STORE_VERSION {
            return Err(BackupError::StoreCorrupt(format!(
                "store version {} is newer than supported version {}",
                document.version, STORE_VERSION
            )));
        }

        Ok(document)
    }

    /// Persist the document atomically
    ///
    /// Refuses to replace an existing store that no longer parses; use
    /// `save_forced` for an explicit repair.
    pub fn save(&self, document: &Document) -> BackupResult<()> {
        let path = self.paths.store_file();
        if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| {
                BackupError::Io(format!("Failed to read {}: {}", path.display(), e))
            })?;
            if serde_json::from_str::<Document>(&contents).is_err() {
                return Err(BackupError::StoreCorrupt(format!(
                    "refusing to overwrite unparseable {}",
                    path.display()
                )));
            }
        }
        self.save_forced(document)
    }

    /// Persist the document without checking the prior one
    pub fn save_forced(&self, document: &Document) -> BackupResult<()> {
        document.validate()?;
        let mut document = document.clone();
        document.version = STORE_VERSION;
        document.root = self.paths.root().to_path_buf();
        write_json_atomic(self.paths.store_file(), &document)?;
        debug!(records = document.backups.len(), "saved metadata store");
        Ok(())
    }

    /// Acquire the exclusive store lock
    pub fn lock(&self) -> BackupResult<StoreLock> {
        let timeout = self
            .load()
            .map(|d| d.config.lock_timeout())
            .unwrap_or(DEFAULT_LOCK_TIMEOUT);
        StoreLock::acquire(&self.paths.lock_file(), timeout)
    }

    /// Run a read-modify-write cycle under the store lock
    ///
    /// Nothing is written when `f` fails.
    pub fn update<T, F>(&self, f: F) -> BackupResult<T>
    where
        F: FnOnce(&mut Document) -> BackupResult<T>,
    {
        let _lock = self.lock()?;
        let mut document = self.load()?;
        let result = f(&mut document)?;
        self.save(&document)?;
        Ok(result)
    }

    /// Create the store if it does not exist
    ///
    /// Returns `true` when a new store was written. An existing corrupt store
    /// is only replaced with `force`, after being moved aside.
    pub fn init(&self, force: bool) -> BackupResult<bool> {
        self.paths.ensure_directories()?;
        let _lock = self.lock()?;

        match self.load() {
            Ok(_) if self.paths.is_initialized() => Ok(false),
            Ok(document) => {
                self.save_forced(&document)?;
                Ok(true)
            }
            Err(BackupError::StoreCorrupt(reason)) if force => {
                let store = self.paths.store_file();
                let aside = store.with_extension(format!(
                    "json.corrupt-{}",
                    chrono::Utc::now().format("%Y%m%d%H%M%S")
                ));
                fs::rename(&store, &aside)?;
                warn!(reason = %reason, moved_to = %aside.display(), "replacing corrupt store");
                self.save_forced(&Document::new(self.paths.root()))?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }
}
