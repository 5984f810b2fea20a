//! Report formatting for verify, prune, doctor, history and transfers

use crate::audit::JournalEntry;
use crate::backup::{DoctorReport, LockStatus, RetentionPlan, TransferSummary, VerificationReport};
use crate::models::Tier;

/// Format a verification report, one line per backup
pub fn format_verification(report: &VerificationReport) -> String {
    if report.results.is_empty() {
        return "No backups to verify.".to_string();
    }

    let mut lines: Vec<String> = report
        .results
        .iter()
        .map(|r| match &r.reason {
            Some(reason) if !r.valid => format!("FAIL  {}: {}", r.name, reason),
            _ => format!("ok    {}", r.name),
        })
        .collect();
    lines.push(String::new());
    lines.push(format!(
        "{} passed, {} failed",
        report.passed(),
        report.failed()
    ));
    lines.join("\n")
}

/// Format a retention plan; `applied` switches the wording from plan to result
pub fn format_retention_plan(plan: &RetentionPlan, applied: bool) -> String {
    let mut lines = Vec::new();
    let counts: Vec<String> = [Tier::Daily, Tier::Weekly, Tier::Monthly, Tier::Yearly]
        .iter()
        .map(|tier| format!("{} {}", plan.count_in(*tier), tier))
        .collect();
    lines.push(format!("Retained: {}", counts.join(", ")));

    for promotion in &plan.promotions {
        let from = promotion
            .from
            .map(|t| t.to_string())
            .unwrap_or_else(|| "untiered".into());
        lines.push(format!("  {}: {} -> {}", promotion.name, from, promotion.to));
    }
    if !plan.protected.is_empty() {
        lines.push(format!(
            "Kept as baseline: {}",
            plan.protected.join(", ")
        ));
    }

    if plan.prune.is_empty() {
        lines.push("Nothing to prune.".to_string());
    } else {
        let verb = if applied { "Pruned" } else { "Would prune" };
        lines.push(format!("{} {} backup(s):", verb, plan.prune.len()));
        lines.extend(plan.prune.iter().map(|name| format!("  {}", name)));
    }
    lines.join("\n")
}

/// Format journal entries, oldest first
pub fn format_history(entries: &[JournalEntry]) -> String {
    if entries.is_empty() {
        return "No operations recorded.".to_string();
    }
    entries
        .iter()
        .map(JournalEntry::summary)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format the findings of a doctor run
pub fn format_doctor_report(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    match report.lock {
        LockStatus::Free => {}
        LockStatus::Removed { age } => {
            lines.push(format!("Removed stale lock ({}s old)", age.as_secs()))
        }
        LockStatus::Held { age } => {
            lines.push(format!(
                "Store lock is held ({}s old); rerun with --force if no backup is running",
                age.as_secs()
            ));
            return lines.join("\n");
        }
    }

    for path in &report.partials_removed {
        lines.push(format!("Removed partial directory {}", path.display()));
    }
    if let Some(reason) = &report.store_error {
        lines.push(format!("Store unreadable: {} (rebuild with --repair)", reason));
    }
    if let Some(count) = report.rebuilt {
        lines.push(format!("Rebuilt store from manifests: {} backup(s)", count));
    }
    for name in &report.missing {
        lines.push(format!("Missing directory for backup '{}'", name));
    }
    for path in &report.orphans {
        let action = if report.orphans_removed {
            "Removed"
        } else {
            "Orphan"
        };
        lines.push(format!("{} {}", action, path.display()));
    }
    if !report.orphans.is_empty() && !report.orphans_removed {
        lines.push("Delete orphans with --force".to_string());
    }

    if report.is_healthy() {
        lines.push("No problems found.".to_string());
    }
    lines.join("\n")
}

/// Format the result of an import or migration
pub fn format_transfer(summary: &TransferSummary) -> String {
    let mut line = format!("Copied {} backup(s)", summary.copied.len());
    if !summary.skipped.is_empty() {
        line.push_str(&format!(
            ", skipped {} already present ({})",
            summary.skipped.len(),
            summary.skipped.join(", ")
        ));
    }
    line
}
