//! Backup record display formatting
//!
//! Formats records for terminal output in table and detail views.

use chrono::{DateTime, Utc};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::{format_age, format_size};
use crate::backup::BackupDetails;
use crate::models::BackupRecord;

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    backup_type: String,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Files")]
    files: u64,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Tier")]
    tier: String,
}

impl RecordRow {
    fn new(record: &BackupRecord, now: DateTime<Utc>) -> Self {
        Self {
            name: record.name.clone(),
            backup_type: record.backup_type.to_string(),
            parent: record.parent.clone().unwrap_or_else(|| "-".into()),
            created: record.created.format("%Y-%m-%d %H:%M").to_string(),
            age: format_age(now.signed_duration_since(record.created)),
            files: record.file_count,
            size: format_size(record.size_bytes),
            tier: record.tier.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
        }
    }
}

/// Format records as a table, with ages relative to `now`
pub fn format_record_table(records: &[BackupRecord], now: DateTime<Utc>) -> String {
    if records.is_empty() {
        return "No backups found.".to_string();
    }

    let rows: Vec<RecordRow> = records.iter().map(|r| RecordRow::new(r, now)).collect();
    let mut table = Table::new(rows);
    table.with(Style::psql());

    let total: u64 = records.iter().map(|r| r.size_bytes).sum();
    format!(
        "{}\n\nTotal: {} backup(s), {}",
        table,
        records.len(),
        format_size(total)
    )
}

/// Format everything known about one backup
pub fn format_record_details(details: &BackupDetails) -> String {
    let record = &details.record;
    let mut lines = vec![
        format!("Backup:      {}", record.name),
        format!("Type:        {}", record.backup_type),
        format!("Created:     {}", record.created.format("%Y-%m-%d %H:%M:%S UTC")),
        format!("Location:    {}", record.path.display()),
        format!(
            "Archive:     {} ({}, {})",
            record.compression.archive_file_name(),
            record.compression,
            format_size(record.size_bytes)
        ),
        format!("Files:       {}", record.file_count),
        format!("Checksums:   {}", record.checksum),
    ];

    if let Some(description) = &record.description {
        lines.push(format!("Description: {}", description));
    }
    if let Some(tier) = record.tier {
        lines.push(format!("Tier:        {}", tier));
    }

    match &details.chain_error {
        Some(reason) => lines.push(format!("Chain:       BROKEN ({})", reason)),
        None => lines.push(format!("Chain:       {}", details.chain.join(" -> "))),
    }
    if !details.dependents.is_empty() {
        lines.push(format!("Dependents:  {}", details.dependents.join(", ")));
    }

    match &details.manifest {
        Some(manifest) => {
            lines.push(format!(
                "Manifest:    {} file(s), {} ({} config)",
                manifest.total_files,
                format_size(manifest.total_bytes()),
                manifest.config_entries().count()
            ));
            if !manifest.removed.is_empty() {
                lines.push(format!("Removed:     {}", manifest.removed.join(", ")));
            }
        }
        None => lines.push("Manifest:    unreadable".to_string()),
    }

    lines.join("\n")
}
