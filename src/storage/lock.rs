//! Exclusive lock on the metadata store
//!
//! The lock is a file created with `create_new`, so only one process can hold
//! it. It records the holder's pid and acquisition time and is removed when
//! the guard drops. A process that dies while holding it leaves a stale lock
//! behind; `doctor` removes those.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use tracing::debug;

use crate::error::{BackupError, BackupResult};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Guard for the exclusive store lock
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    /// Acquire the lock, waiting at most `timeout`
    pub fn acquire(path: &Path, timeout: Duration) -> BackupResult<Self> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }
            if Instant::now() >= deadline {
                let holder = fs::read_to_string(path).unwrap_or_default();
                return Err(BackupError::LockTimeout(format!(
                    "{} is held by another process ({}); if no backup is running, \
                     clear it with `dot-backup doctor --force`",
                    path.display(),
                    holder.trim()
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Try to acquire the lock once
    pub fn try_acquire(path: &Path) -> BackupResult<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BackupError::Io(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let stamp = chrono::Utc::now().to_rfc3339();
                // Holder info is diagnostic only
                let _ = writeln!(file, "pid={} acquired={}", std::process::id(), stamp);
                debug!(path = %path.display(), "acquired store lock");
                Ok(Some(Self {
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(BackupError::Io(format!(
                "Failed to acquire store lock {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
        debug!(path = %self.path.display(), "released store lock");
    }
}

/// Age of an existing lock file, if any
pub fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.lock");

        let first = StoreLock::try_acquire(&path).unwrap();
        assert!(first.is_some());
        assert!(StoreLock::try_acquire(&path).unwrap().is_none());

        drop(first);
        assert!(!path.exists());
        assert!(StoreLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_acquire_times_out() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.lock");
        let _held = StoreLock::try_acquire(&path).unwrap().unwrap();

        let err = StoreLock::acquire(&path, Duration::from_millis(120)).unwrap_err();
        assert!(matches!(err, BackupError::LockTimeout(_)));
        assert!(err.to_string().contains("doctor"));
    }

    #[test]
    fn test_lock_records_holder() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.lock");
        let _held = StoreLock::acquire(&path, Duration::from_secs(1)).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with(&format!("pid={}", std::process::id())));
        assert!(lock_age(&path).is_some());
    }
}
