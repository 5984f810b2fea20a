//! JSON documents on disk
//!
//! The store and every manifest are written through `write_json_atomic`: the
//! document goes to a sibling temp file, is synced, then renamed over the
//! target, so readers only ever see the old or the new version.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::BackupError;

fn io_error(action: &str, path: &Path, err: std::io::Error) -> BackupError {
    BackupError::Io(format!("Failed to {} {}: {}", action, path.display(), err))
}

/// Sibling temp path used while `path` is being replaced
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".tmp-{}", std::process::id()));
    path.with_file_name(name)
}

/// Read a JSON document that must exist
///
/// A missing file is `NotFound`; a malformed one is `Json`.
pub fn read_json_required<T, P>(path: P) -> Result<T, BackupError>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BackupError::NotFound {
                entity_type: "File",
                identifier: path.display().to_string(),
            })
        }
        Err(e) => return Err(io_error("open", path, e)),
    };

    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| BackupError::Json(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Replace `path` with the pretty-printed JSON of `data`
pub fn write_json_atomic<T, P>(path: P, data: &T) -> Result<(), BackupError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error("create directory", parent, e))?;
    }

    let temp = temp_path(path);
    let result = write_synced(&temp, data).and_then(|()| {
        fs::rename(&temp, path).map_err(|e| io_error("replace", path, e))
    });
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

fn write_synced<T: Serialize>(path: &Path, data: &T) -> Result<(), BackupError> {
    let file = File::create(path).map_err(|e| io_error("create", path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, data)
        .map_err(|e| BackupError::Json(format!("Failed to serialize {}: {}", path.display(), e)))?;
    writer.flush().map_err(|e| io_error("flush", path, e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| io_error("sync", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
    struct Doc {
        name: String,
        files: u64,
    }

    #[test]
    fn test_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.json");
        let doc = Doc {
            name: "base".to_string(),
            files: 3,
        };

        write_json_atomic(&path, &doc).unwrap();
        let loaded: Doc = read_json_required(&path).unwrap();
        assert_eq!(doc, loaded);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_write_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("backups").join("base").join("manifest.json");

        write_json_atomic(&path, &Doc::default()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_failed_rename_leaves_target_untouched() {
        let temp_dir = TempDir::new().unwrap();
        // A directory in place of the target makes the rename fail
        let path = temp_dir.path().join("store.json");
        fs::create_dir_all(path.join("occupied")).unwrap();

        assert!(write_json_atomic(&path, &Doc::default()).is_err());
        assert!(path.join("occupied").is_dir());
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let err = read_json_required::<Doc, _>(temp_dir.path().join("nope.json")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_read_malformed_is_json_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("manifest.json");
        fs::write(&path, "{ nope").unwrap();

        let err = read_json_required::<Doc, _>(&path).unwrap_err();
        assert!(matches!(err, BackupError::Json(_)));
    }
}
