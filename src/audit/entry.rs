//! Journal entry data structures
//!
//! Defines the operations recorded in the journal and the entry format itself.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Types of operations that are journaled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Backup was created
    Create,
    /// Backup was deleted explicitly
    Delete,
    /// Backup was restored
    Restore,
    /// Backup was removed by the retention policy
    Prune,
    /// Backup was moved to a different retention tier
    Promote,
    /// Backup root was exported
    Export,
    /// Backup was merged in from an export
    Import,
    /// Backup was copied in from another root
    Migrate,
    /// A setting changed
    Config,
    /// The external schedule changed
    Schedule,
    /// Registry was rebuilt or cleaned up
    Repair,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Operation::Create => "CREATE",
            Operation::Delete => "DELETE",
            Operation::Restore => "RESTORE",
            Operation::Prune => "PRUNE",
            Operation::Promote => "PROMOTE",
            Operation::Export => "EXPORT",
            Operation::Import => "IMPORT",
            Operation::Migrate => "MIGRATE",
            Operation::Config => "CONFIG",
            Operation::Schedule => "SCHEDULE",
            Operation::Repair => "REPAIR",
        };
        write!(f, "{}", label)
    }
}

/// A single journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// When the operation occurred (UTC)
    pub timestamp: DateTime<Utc>,

    /// Type of operation performed
    pub operation: Operation,

    /// Backup affected, if the operation targets one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,

    /// Human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl JournalEntry {
    /// Create an entry stamped with the current time
    pub fn new(operation: Operation, backup: Option<&str>, detail: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            backup: backup.map(String::from),
            detail,
        }
    }

    /// One-line rendering for `history`
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} {:<8}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.operation
        );
        if let Some(backup) = &self.backup {
            line.push_str(&format!(" {}", backup));
        }
        if let Some(detail) = &self.detail {
            line.push_str(&format!(" ({})", detail));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_serializes_lowercase() {
        let json = serde_json::to_string(&Operation::Promote).unwrap();
        assert_eq!(json, "\"promote\"");
    }

    #[test]
    fn test_summary() {
        let entry = JournalEntry::new(
            Operation::Create,
            Some("base"),
            Some("full, 3 files".to_string()),
        );
        let line = entry.summary();
        assert!(line.contains("CREATE"));
        assert!(line.contains("base"));
        assert!(line.ends_with("(full, 3 files)"));
    }

    #[test]
    fn test_optional_fields_are_skipped() {
        let entry = JournalEntry::new(Operation::Config, None, None);
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("backup").is_none());
        assert!(value.get("detail").is_none());
    }
}
