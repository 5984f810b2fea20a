//! Append-only journal file
//!
//! One JSON object per line. Lines are appended with a single write so an
//! interrupted process leaves at most one truncated line, which readers skip.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{BackupError, BackupResult};

use super::entry::{JournalEntry, Operation};

/// Operation journal of one backup root
#[derive(Debug, Clone)]
pub struct Journal {
    log_path: PathBuf,
}

impl Journal {
    pub fn new(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    /// Append an entry
    pub fn log(&self, entry: &JournalEntry) -> BackupResult<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .map_err(|e| {
                BackupError::Io(format!(
                    "Failed to append to journal {}: {}",
                    self.log_path.display(),
                    e
                ))
            })
    }

    /// Append an entry, downgrading a write failure to a warning
    ///
    /// Called after the operation it describes has already completed.
    pub fn record(&self, operation: Operation, backup: Option<&str>, detail: Option<String>) {
        let entry = JournalEntry::new(operation, backup, detail);
        if let Err(e) = self.log(&entry) {
            warn!(error = %e, operation = %operation, "failed to append journal entry");
        }
    }

    /// All readable entries, oldest first
    pub fn read_all(&self) -> BackupResult<Vec<JournalEntry>> {
        let file = match File::open(&self.log_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BackupError::Io(format!(
                    "Failed to open journal {}: {}",
                    self.log_path.display(),
                    e
                )))
            }
        };

        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(line = index + 1, error = %e, "skipping unreadable journal line"),
            }
        }
        Ok(entries)
    }

    /// The last `count` entries, oldest first
    pub fn read_recent(&self, count: usize) -> BackupResult<Vec<JournalEntry>> {
        let mut entries = self.read_all()?;
        let skip = entries.len().saturating_sub(count);
        entries.drain(..skip);
        Ok(entries)
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn journal_in(temp: &TempDir) -> Journal {
        Journal::new(temp.path().join("journal.log"))
    }

    #[test]
    fn test_record_then_read() {
        let temp = TempDir::new().unwrap();
        let journal = journal_in(&temp);
        journal.record(Operation::Create, Some("base"), Some("3 files".into()));

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, Operation::Create);
        assert_eq!(entries[0].backup.as_deref(), Some("base"));
        assert_eq!(entries[0].detail.as_deref(), Some("3 files"));
    }

    #[test]
    fn test_read_recent_keeps_newest() {
        let temp = TempDir::new().unwrap();
        let journal = journal_in(&temp);
        for i in 0..6 {
            journal.record(Operation::Prune, Some(&format!("daily-{}", i)), None);
        }

        let names: Vec<_> = journal
            .read_recent(2)
            .unwrap()
            .into_iter()
            .filter_map(|e| e.backup)
            .collect();
        assert_eq!(names, vec!["daily-4", "daily-5"]);
        assert_eq!(journal.read_recent(50).unwrap().len(), 6);
    }

    #[test]
    fn test_missing_journal_reads_empty() {
        let temp = TempDir::new().unwrap();
        assert!(journal_in(&temp).read_all().unwrap().is_empty());
    }

    #[test]
    fn test_truncated_line_is_skipped() {
        let temp = TempDir::new().unwrap();
        let journal = journal_in(&temp);
        journal.record(Operation::Create, Some("base"), None);
        let mut contents = fs::read_to_string(journal.path()).unwrap();
        contents.push_str("{\"timestamp\":\"2024-01-");
        fs::write(journal.path(), contents).unwrap();

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].backup.as_deref(), Some("base"));
    }

    #[test]
    fn test_record_swallows_write_failure() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::new(temp.path().join("missing").join("journal.log"));

        journal.record(Operation::Delete, Some("x"), None);
        assert!(journal
            .log(&JournalEntry::new(Operation::Delete, None, None))
            .is_err());
    }
}
