//! Baseline chain resolution
//!
//! Incremental and differential backups only hold the files that changed
//! since their parent. Reconstructing one means walking `parent` links back to
//! a record without a parent (a full or config-only backup) and folding the
//! manifests oldest first.

use std::collections::HashSet;

use crate::error::{BackupError, BackupResult};
use crate::models::{fold_manifest, BackupRecord, FileState, Manifest};
use crate::storage::Document;

/// Resolve the chain for `name`, ordered from the root ancestor to `name`
///
/// A missing ancestor fails with `BrokenChain`; a parent cycle means the
/// store is corrupt.
pub fn resolve_chain<'a>(doc: &'a Document, name: &str) -> BackupResult<Vec<&'a BackupRecord>> {
    let mut current = doc.require(name)?;
    let mut visited: HashSet<&str> = HashSet::new();
    let mut chain = Vec::new();

    loop {
        visited.insert(current.name.as_str());
        chain.push(current);

        let Some(parent) = current.parent.as_deref() else {
            if current.backup_type.requires_parent() {
                return Err(BackupError::broken_chain(
                    name,
                    format!("{} backup '{}' has no parent", current.backup_type, current.name),
                ));
            }
            break;
        };

        if visited.contains(parent) {
            return Err(BackupError::StoreCorrupt(format!(
                "parent cycle through '{}' while resolving '{}'",
                parent, name
            )));
        }

        current = doc.get(parent).ok_or_else(|| {
            BackupError::broken_chain(
                name,
                format!("parent '{}' of '{}' is missing", parent, current.name),
            )
        })?;
    }

    chain.reverse();
    Ok(chain)
}

/// Load the manifest of every record in a chain
pub fn load_manifests(name: &str, chain: &[&BackupRecord]) -> BackupResult<Vec<Manifest>> {
    chain
        .iter()
        .map(|record| {
            Manifest::load(&record.manifest_path()).map_err(|e| {
                BackupError::broken_chain(
                    name,
                    format!("manifest of '{}' is unreadable: {}", record.name, e),
                )
            })
        })
        .collect()
}

/// Folded file state reconstructed by restoring `name`
pub fn chain_state(doc: &Document, name: &str) -> BackupResult<FileState> {
    let chain = resolve_chain(doc, name)?;
    let manifests = load_manifests(name, &chain)?;
    let mut state = FileState::new();
    for manifest in &manifests {
        fold_manifest(&mut state, manifest);
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackupType, ChecksumAlgorithm, Compression};
    use chrono::Utc;
    use std::path::{Path, PathBuf};

    fn record(name: &str, backup_type: BackupType, parent: Option<&str>) -> BackupRecord {
        BackupRecord {
            name: name.into(),
            backup_type,
            parent: parent.map(String::from),
            created: Utc::now(),
            path: PathBuf::from("/nowhere").join(name),
            compression: Compression::Gzip,
            checksum: ChecksumAlgorithm::Sha256,
            size_bytes: 0,
            file_count: 0,
            tier: None,
            description: None,
        }
    }

    fn names(chain: &[&BackupRecord]) -> Vec<String> {
        chain.iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn test_chain_is_ordered_oldest_first() {
        let mut doc = Document::new(Path::new("/r"));
        doc.insert(record("base", BackupType::Full, None)).unwrap();
        doc.insert(record("inc1", BackupType::Incremental, Some("base"))).unwrap();
        doc.insert(record("inc2", BackupType::Incremental, Some("inc1"))).unwrap();

        let chain = resolve_chain(&doc, "inc2").unwrap();
        assert_eq!(names(&chain), vec!["base", "inc1", "inc2"]);
        assert_eq!(names(&resolve_chain(&doc, "base").unwrap()), vec!["base"]);
    }

    #[test]
    fn test_dangling_parent_is_broken_chain() {
        let mut doc = Document::new(Path::new("/r"));
        doc.insert(record("inc1", BackupType::Incremental, Some("gone"))).unwrap();

        let err = resolve_chain(&doc, "inc1").unwrap_err();
        assert!(matches!(err, BackupError::BrokenChain { .. }));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_incremental_without_parent_is_broken() {
        let mut doc = Document::new(Path::new("/r"));
        doc.insert(record("inc1", BackupType::Incremental, None)).unwrap();
        assert!(matches!(
            resolve_chain(&doc, "inc1"),
            Err(BackupError::BrokenChain { .. })
        ));
    }

    #[test]
    fn test_cycle_is_store_corruption() {
        let mut doc = Document::new(Path::new("/r"));
        doc.insert(record("a", BackupType::Incremental, Some("b"))).unwrap();
        doc.insert(record("b", BackupType::Incremental, Some("a"))).unwrap();

        assert!(matches!(
            resolve_chain(&doc, "a"),
            Err(BackupError::StoreCorrupt(_))
        ));
    }

    #[test]
    fn test_unknown_name() {
        let doc = Document::new(Path::new("/r"));
        assert!(resolve_chain(&doc, "nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_missing_manifest_is_broken_chain() {
        let mut doc = Document::new(Path::new("/r"));
        doc.insert(record("base", BackupType::Full, None)).unwrap();
        let err = chain_state(&doc, "base").unwrap_err();
        assert!(matches!(err, BackupError::BrokenChain { .. }));
    }
}
