//! Backup restoration for dotbackup
//!
//! Rebuilds a backup's file state by folding its baseline chain (root
//! ancestor first, later layers winning) and extracts the selected files into
//! a target directory. Everything that can fail before a byte is written is
//! checked up front: chain resolution, verification of every layer, path
//! safety and destination conflicts.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info};

use super::archive::ArchiveReader;
use super::chain::{load_manifests, resolve_chain};
use super::scan::{build_globset, validate_archive_path};
use super::verify::verify_record;
use crate::audit::{Journal, Operation};
use crate::config::paths::BackupPaths;
use crate::error::{BackupError, BackupResult};
use crate::models::ManifestEntry;
use crate::storage::MetadataStore;

/// Which files of the reconstructed state to write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestoreMode {
    /// Every file
    #[default]
    Full,
    /// Files matching caller-supplied glob patterns
    Selective,
    /// Files tagged as configuration in the manifest
    ConfigOnly,
}

impl RestoreMode {
    /// Parse restore mode from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "full" => Some(Self::Full),
            "selective" => Some(Self::Selective),
            "config-only" | "config_only" | "config" => Some(Self::ConfigOnly),
            _ => None,
        }
    }
}

impl fmt::Display for RestoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Selective => write!(f, "selective"),
            Self::ConfigOnly => write!(f, "config-only"),
        }
    }
}

/// What to restore and where
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub name: String,
    /// Target directory; the configured base directory when absent
    pub target: Option<PathBuf>,
    pub mode: RestoreMode,
    /// Glob patterns for selective mode
    pub include: Vec<String>,
    /// Replace files that already exist at the target
    pub overwrite: bool,
}

impl RestoreRequest {
    /// Full restore of `name` into `target`
    pub fn new(name: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            target: Some(target.into()),
            mode: RestoreMode::Full,
            include: Vec::new(),
            overwrite: false,
        }
    }
}

/// Result of a restore operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreResult {
    pub name: String,
    pub target: PathBuf,
    pub mode: RestoreMode,
    /// Chain members applied, root ancestor first
    pub layers: Vec<String>,
    pub files_restored: u64,
    pub bytes_restored: u64,
}

impl RestoreResult {
    /// Get a summary of what was restored
    pub fn summary(&self) -> String {
        format!(
            "Restored {} file(s) from '{}' ({} restore, {} layer(s)) into {}",
            self.files_restored,
            self.name,
            self.mode,
            self.layers.len(),
            self.target.display()
        )
    }
}

/// Handles restoring from backups
pub struct RestoreManager {
    store: MetadataStore,
    journal: Journal,
}

impl RestoreManager {
    /// Create a new RestoreManager
    pub fn new(paths: BackupPaths) -> Self {
        let journal = Journal::new(paths.journal_file());
        Self {
            store: MetadataStore::new(paths),
            journal,
        }
    }

    /// Restore a backup
    pub fn restore(&self, request: &RestoreRequest) -> BackupResult<RestoreResult> {
        let doc = self.store.load()?;
        let target = match &request.target {
            Some(target) => target.clone(),
            None => doc.config.base_dir()?,
        };

        let chain = resolve_chain(&doc, &request.name)?;
        for record in &chain {
            let result = verify_record(&doc, record);
            let Some(reason) = result.reason else {
                continue;
            };
            if record.name == request.name {
                return Err(BackupError::Integrity(format!(
                    "backup '{}' failed verification: {}",
                    record.name, reason
                )));
            }
            return Err(BackupError::broken_chain(
                &request.name,
                format!("ancestor '{}' failed verification: {}", record.name, reason),
            ));
        }

        let manifests = load_manifests(&request.name, &chain)?;

        // Relative path to (layer index, entry), later layers winning
        let mut plan: BTreeMap<String, (usize, ManifestEntry)> = BTreeMap::new();
        for (layer, manifest) in manifests.iter().enumerate() {
            for removed in &manifest.removed {
                plan.remove(removed);
            }
            for entry in &manifest.entries {
                plan.insert(entry.relative_path.clone(), (layer, entry.clone()));
            }
        }

        match request.mode {
            RestoreMode::Full => {}
            RestoreMode::ConfigOnly => plan.retain(|_, (_, entry)| entry.config),
            RestoreMode::Selective => {
                if request.include.is_empty() {
                    return Err(BackupError::Validation(
                        "selective restore needs at least one --include pattern".into(),
                    ));
                }
                let include = build_globset(&request.include)?;
                plan.retain(|path, _| include.is_match(path));
            }
        }

        for path in plan.keys() {
            validate_archive_path(path)?;
            check_destination(&target, path, request.overwrite)?;
        }

        fs::create_dir_all(&target).map_err(|e| {
            BackupError::Io(format!("Failed to create {}: {}", target.display(), e))
        })?;

        let mut files_restored = 0u64;
        let mut bytes_restored = 0u64;
        for (layer, record) in chain.iter().enumerate() {
            let wanted: BTreeMap<&str, &ManifestEntry> = plan
                .iter()
                .filter(|(_, (owner, _))| *owner == layer)
                .map(|(path, (_, entry))| (path.as_str(), entry))
                .collect();
            if wanted.is_empty() {
                continue;
            }

            debug!(layer = %record.name, files = wanted.len(), "extracting layer");
            let reader = ArchiveReader::open(&record.archive_path(), record.compression)?;
            reader.for_each_file(|path, content| {
                let Some(entry) = wanted.get(path) else {
                    return Ok(());
                };
                bytes_restored += write_restored(&target.join(path), content, entry)?;
                files_restored += 1;
                Ok(())
            })?;
        }

        if files_restored != plan.len() as u64 {
            return Err(BackupError::Integrity(format!(
                "expected to restore {} files from '{}' but found {}",
                plan.len(),
                request.name,
                files_restored
            )));
        }

        let result = RestoreResult {
            name: request.name.clone(),
            target,
            mode: request.mode,
            layers: chain.iter().map(|r| r.name.clone()).collect(),
            files_restored,
            bytes_restored,
        };

        info!(
            name = %result.name,
            files = result.files_restored,
            target = %result.target.display(),
            "restored backup"
        );
        self.journal.record(
            Operation::Restore,
            Some(&result.name),
            Some(format!(
                "{} files to {}",
                result.files_restored,
                result.target.display()
            )),
        );
        Ok(result)
    }
}

/// Fail if writing `relative` under `target` would clobber something
///
/// Existing files are only replaced with `overwrite`. A non-directory in the
/// way of a parent directory is always a conflict; a symlink to a directory
/// is followed like the directory itself.
fn check_destination(target: &Path, relative: &str, overwrite: bool) -> BackupResult<()> {
    let destination = target.join(relative);

    let mut ancestor = destination.parent();
    while let Some(dir) = ancestor {
        if dir == target {
            break;
        }
        let blocked = match fs::metadata(dir) {
            Ok(meta) => !meta.is_dir(),
            // Dangling symlink
            Err(_) => fs::symlink_metadata(dir).is_ok(),
        };
        if blocked {
            return Err(BackupError::DestinationExists(dir.to_path_buf()));
        }
        ancestor = dir.parent();
    }

    match fs::symlink_metadata(&destination) {
        Ok(meta) if meta.is_dir() => Err(BackupError::DestinationExists(destination)),
        Ok(_) if !overwrite => Err(BackupError::DestinationExists(destination)),
        _ => Ok(()),
    }
}

/// Write one file through a temporary sibling and rename it into place
fn write_restored(
    destination: &Path,
    content: &mut dyn Read,
    entry: &ManifestEntry,
) -> BackupResult<u64> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = destination.with_file_name(format!(".{}.dot-restore", file_name));

    copy_into(&temp, content, entry)
        .and_then(|written| fs::rename(&temp, destination).map(|_| written))
        .map_err(|e| {
            let _ = fs::remove_file(&temp);
            BackupError::Io(format!("Failed to restore {}: {}", destination.display(), e))
        })
}

fn copy_into(path: &Path, content: &mut dyn Read, entry: &ManifestEntry) -> io::Result<u64> {
    let mut file = File::create(path)?;
    let written = io::copy(content, &mut file)?;
    file.flush()?;
    file.set_modified(SystemTime::from(entry.modified))?;
    apply_mode(&file, entry.mode)?;
    Ok(written)
}

#[cfg(unix)]
fn apply_mode(file: &File, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    match mode {
        Some(mode) => file.set_permissions(fs::Permissions::from_mode(mode)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn apply_mode(_file: &File, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::testing::{write_file, Fixture};
    use crate::models::{BackupType, Compression};
    use walkdir::WalkDir;

    fn restore_manager(fx: &Fixture) -> RestoreManager {
        RestoreManager::new(fx.paths().clone())
    }

    /// Relative path to contents for every file under `dir`
    fn tree(dir: &Path) -> BTreeMap<String, String> {
        WalkDir::new(dir)
            .into_iter()
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e
                    .path()
                    .strip_prefix(dir)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/");
                (rel, fs::read_to_string(e.path()).unwrap())
            })
            .collect()
    }

    #[test]
    fn test_full_round_trip_every_compression() {
        for compression in [
            Compression::Gzip,
            Compression::Bzip2,
            Compression::Xz,
            Compression::Zip,
            Compression::None,
        ] {
            let fx = Fixture::with_compression(compression);
            fx.create(BackupType::Full, "base");

            let target = fx.target("restored");
            let result = restore_manager(&fx)
                .restore(&RestoreRequest::new("base", &target))
                .unwrap();

            assert_eq!(result.files_restored, 3, "{}", compression);
            assert_eq!(tree(&target), tree(&fx.home), "{}", compression);
        }
    }

    #[test]
    fn test_example_scenario_incremental_restore() {
        let fx = Fixture::new();
        fx.create(BackupType::Full, "base");
        fx.write(".zshrc", "export EDITOR=hx\n");
        fx.create(BackupType::Incremental, "inc1");

        let target = fx.target("restored");
        let result = restore_manager(&fx)
            .restore(&RestoreRequest::new("inc1", &target))
            .unwrap();

        assert_eq!(result.layers, vec!["base", "inc1"]);
        assert_eq!(result.files_restored, 3);
        let restored = tree(&target);
        assert_eq!(restored[".zshrc"], "export EDITOR=hx\n");
        assert_eq!(restored[".gitconfig"], "[user]\n  name = dev\n");
        assert_eq!(restored[".config/nvim/init.lua"], "vim.opt.number = true\n");
    }

    #[test]
    fn test_removed_files_are_not_restored() {
        let fx = Fixture::new();
        fx.create(BackupType::Full, "base");
        fx.remove(".gitconfig");
        fx.create(BackupType::Incremental, "inc1");

        let target = fx.target("restored");
        restore_manager(&fx)
            .restore(&RestoreRequest::new("inc1", &target))
            .unwrap();
        assert!(!target.join(".gitconfig").exists());
        assert_eq!(tree(&target), tree(&fx.home));
    }

    #[test]
    fn test_existing_destination_fails_before_writing() {
        let fx = Fixture::new();
        fx.create(BackupType::Full, "base");

        let target = fx.target("restored");
        write_file(&target, ".zshrc", "mine");

        let err = restore_manager(&fx)
            .restore(&RestoreRequest::new("base", &target))
            .unwrap_err();
        assert!(matches!(err, BackupError::DestinationExists(ref p) if p.ends_with(".zshrc")));
        assert!(!target.join(".gitconfig").exists());
        assert_eq!(fs::read_to_string(target.join(".zshrc")).unwrap(), "mine");

        let mut request = RestoreRequest::new("base", &target);
        request.overwrite = true;
        restore_manager(&fx).restore(&request).unwrap();
        assert_eq!(
            fs::read_to_string(target.join(".zshrc")).unwrap(),
            "export EDITOR=nvim\n"
        );
    }

    #[test]
    fn test_missing_ancestor_is_broken_chain() {
        let fx = Fixture::new();
        let base = fx.create(BackupType::Full, "base");
        fx.write(".zshrc", "export EDITOR=hx\n");
        fx.create(BackupType::Incremental, "inc1");
        fs::remove_file(base.archive_path()).unwrap();

        let target = fx.target("restored");
        let err = restore_manager(&fx)
            .restore(&RestoreRequest::new("inc1", &target))
            .unwrap_err();
        assert!(matches!(err, BackupError::BrokenChain { .. }));
        assert_eq!(fs::read_dir(&target).unwrap().count(), 0);
    }

    #[test]
    fn test_dangling_parent_is_broken_chain() {
        let fx = Fixture::new();
        fx.create(BackupType::Full, "base");
        fx.write(".zshrc", "export EDITOR=hx\n");
        fx.create(BackupType::Incremental, "inc1");
        fx.store_update(|doc| {
            doc.remove("base");
        });

        let target = fx.target("restored");
        let err = restore_manager(&fx)
            .restore(&RestoreRequest::new("inc1", &target))
            .unwrap_err();
        assert!(matches!(err, BackupError::BrokenChain { .. }));
    }

    #[test]
    fn test_selective_restore() {
        let fx = Fixture::new();
        fx.create(BackupType::Full, "base");

        let target = fx.target("restored");
        let mut request = RestoreRequest::new("base", &target);
        request.mode = RestoreMode::Selective;
        request.include = vec![".config/**".into()];
        let result = restore_manager(&fx).restore(&request).unwrap();

        assert_eq!(result.files_restored, 1);
        assert_eq!(
            tree(&target).keys().collect::<Vec<_>>(),
            vec![".config/nvim/init.lua"]
        );

        request.include.clear();
        assert!(restore_manager(&fx).restore(&request).unwrap_err().is_validation());
    }

    #[test]
    fn test_config_only_restore_uses_config_tags() {
        let fx = Fixture::new();
        fx.create(BackupType::Full, "base");

        let target = fx.target("restored");
        let mut request = RestoreRequest::new("base", &target);
        request.mode = RestoreMode::ConfigOnly;
        restore_manager(&fx).restore(&request).unwrap();

        assert_eq!(
            tree(&target).keys().collect::<Vec<_>>(),
            vec![".gitconfig", ".zshrc"]
        );
    }

    #[test]
    fn test_selective_restore_across_chain_with_removal() {
        let fx = Fixture::new();
        fx.create(BackupType::Full, "base");
        fx.remove(".gitconfig");
        fx.write(".config/nvim/init.lua", "vim.opt.number = false\n");
        fx.create(BackupType::Incremental, "inc1");

        let target = fx.target("restored");
        let mut request = RestoreRequest::new("inc1", &target);
        request.mode = RestoreMode::Selective;
        request.include = vec![".gitconfig".into(), ".config/**".into()];
        let result = restore_manager(&fx).restore(&request).unwrap();

        assert_eq!(result.layers, vec!["base", "inc1"]);
        assert_eq!(result.files_restored, 1);
        let restored = tree(&target);
        assert_eq!(restored.keys().collect::<Vec<_>>(), vec![".config/nvim/init.lua"]);
        assert_eq!(restored[".config/nvim/init.lua"], "vim.opt.number = false\n");
    }

    #[test]
    fn test_config_only_capture_restores() {
        let fx = Fixture::new();
        let record = fx.create(BackupType::ConfigOnly, "settings");
        assert_eq!(record.parent, None);
        assert_eq!(record.file_count, 2);

        let target = fx.target("restored");
        let result = restore_manager(&fx)
            .restore(&RestoreRequest::new("settings", &target))
            .unwrap();

        assert_eq!(result.layers, vec!["settings"]);
        assert_eq!(result.files_restored, 2);
        let restored = tree(&target);
        assert_eq!(restored.keys().collect::<Vec<_>>(), vec![".gitconfig", ".zshrc"]);
        assert_eq!(restored[".zshrc"], "export EDITOR=nvim\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_parent_directory_is_followed() {
        use std::os::unix::fs::symlink;

        let fx = Fixture::new();
        fx.create(BackupType::Full, "base");

        let target = fx.target("restored");
        let real_config = fx.target("dotfiles-repo");
        symlink(&real_config, target.join(".config")).unwrap();

        let mut request = RestoreRequest::new("base", &target);
        request.overwrite = true;
        restore_manager(&fx).restore(&request).unwrap();

        assert!(fs::symlink_metadata(target.join(".config"))
            .unwrap()
            .file_type()
            .is_symlink());
        assert_eq!(
            fs::read_to_string(real_config.join("nvim/init.lua")).unwrap(),
            "vim.opt.number = true\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_file_in_place_of_parent_is_a_conflict() {
        use std::os::unix::fs::symlink;

        let fx = Fixture::new();
        fx.create(BackupType::Full, "base");

        let target = fx.target("restored");
        write_file(&target, "elsewhere", "file");
        symlink(target.join("elsewhere"), target.join(".config")).unwrap();

        let mut request = RestoreRequest::new("base", &target);
        request.overwrite = true;
        let err = restore_manager(&fx).restore(&request).unwrap_err();
        assert!(matches!(err, BackupError::DestinationExists(ref p) if p.ends_with(".config")));
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_are_restored() {
        use std::os::unix::fs::PermissionsExt;

        let fx = Fixture::new();
        let script = fx.home.join(".zshrc");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();
        fx.create(BackupType::Full, "base");

        let target = fx.target("restored");
        restore_manager(&fx)
            .restore(&RestoreRequest::new("base", &target))
            .unwrap();
        let mode = fs::metadata(target.join(".zshrc")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[test]
    fn test_default_target_is_base_dir() {
        let fx = Fixture::new();
        fx.create(BackupType::Full, "base");
        fx.remove(".zshrc");

        let mut request = RestoreRequest::new("base", "/unused");
        request.target = None;
        request.include = vec![".zshrc".into()];
        request.mode = RestoreMode::Selective;
        let result = restore_manager(&fx).restore(&request).unwrap();

        assert_eq!(result.target, fx.home);
        assert_eq!(fx.read(".zshrc"), "export EDITOR=nvim\n");
    }

    #[test]
    fn test_restore_mode_parse() {
        assert_eq!(RestoreMode::parse("config"), Some(RestoreMode::ConfigOnly));
        assert_eq!(RestoreMode::parse("FULL"), Some(RestoreMode::Full));
        assert_eq!(RestoreMode::parse("partial"), None);
    }
}
