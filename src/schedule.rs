//! Automatic backups through an external scheduler
//!
//! The engine never runs a timer itself. Enabling auto-backup records the
//! setting in the store and asks a [`Scheduler`] to run the capture command
//! at the configured frequency. The default scheduler owns one tagged line in
//! the user's crontab.

use std::io::Write;
use std::process::{Command, Stdio};

use chrono::{NaiveTime, Timelike};
use tracing::{debug, info};

use crate::audit::Operation;
use crate::backup::BackupManager;
use crate::config::settings::Frequency;
use crate::error::{BackupError, BackupResult};

/// Tag identifying the crontab line this tool owns
pub const CRONTAB_MARKER: &str = "# dot-backup auto";

/// What to run and when
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub frequency: Frequency,
    pub time: NaiveTime,
    /// Shell command the scheduler runs
    pub command: String,
}

impl ScheduleSpec {
    /// Five-field cron expression for this schedule
    ///
    /// Hourly runs use only the minute of `time`; weekly runs fire on Sunday.
    pub fn cron_expression(&self) -> String {
        let (minute, hour) = (self.time.minute(), self.time.hour());
        match self.frequency {
            Frequency::Hourly => format!("{} * * * *", minute),
            Frequency::Daily => format!("{} {} * * *", minute, hour),
            Frequency::Weekly => format!("{} {} * * 0", minute, hour),
        }
    }

    /// The full crontab line, tagged with [`CRONTAB_MARKER`]
    pub fn crontab_line(&self) -> String {
        format!("{} {} {}", self.cron_expression(), self.command, CRONTAB_MARKER)
    }
}

/// External collaborator that triggers scheduled backups
pub trait Scheduler {
    /// Install or replace the schedule
    fn install(&self, spec: &ScheduleSpec) -> BackupResult<()>;

    /// Remove the schedule; returns whether one was installed
    fn remove(&self) -> BackupResult<bool>;

    /// Description of the installed schedule, if any
    fn status(&self) -> BackupResult<Option<String>>;
}

/// Scheduler backed by the `crontab` command
#[derive(Debug, Clone, Default)]
pub struct CrontabScheduler;

impl CrontabScheduler {
    pub fn new() -> Self {
        Self
    }

    fn read(&self) -> BackupResult<String> {
        let output = Command::new("crontab")
            .arg("-l")
            .output()
            .map_err(|e| BackupError::Schedule(format!("failed to run crontab -l: {}", e)))?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        // A user without a crontab is not an error
        if stderr.contains("no crontab") {
            return Ok(String::new());
        }
        Err(BackupError::Schedule(format!(
            "crontab -l failed: {}",
            stderr.trim()
        )))
    }

    fn write(&self, contents: &str) -> BackupResult<()> {
        let mut child = Command::new("crontab")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BackupError::Schedule(format!("failed to run crontab: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(contents.as_bytes())
                .map_err(|e| BackupError::Schedule(format!("failed to write crontab: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| BackupError::Schedule(format!("crontab did not finish: {}", e)))?;
        if !output.status.success() {
            return Err(BackupError::Schedule(format!(
                "crontab rejected the new table: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!("wrote crontab");
        Ok(())
    }
}

impl Scheduler for CrontabScheduler {
    fn install(&self, spec: &ScheduleSpec) -> BackupResult<()> {
        let current = self.read()?;
        self.write(&merge_crontab(&current, Some(&spec.crontab_line())))
    }

    fn remove(&self) -> BackupResult<bool> {
        let current = self.read()?;
        if find_marked(&current).is_none() {
            return Ok(false);
        }
        self.write(&merge_crontab(&current, None))?;
        Ok(true)
    }

    fn status(&self) -> BackupResult<Option<String>> {
        Ok(find_marked(&self.read()?).map(str::to_string))
    }
}

/// Replace the tagged line of a crontab, or drop it when `line` is `None`
///
/// All other lines are kept in order.
pub fn merge_crontab(current: &str, line: Option<&str>) -> String {
    let mut lines: Vec<&str> = current
        .lines()
        .filter(|l| !l.trim_end().ends_with(CRONTAB_MARKER))
        .collect();
    if let Some(line) = line {
        lines.push(line);
    }

    let mut merged = lines.join("\n");
    if !merged.is_empty() {
        merged.push('\n');
    }
    merged
}

fn find_marked(crontab: &str) -> Option<&str> {
    crontab
        .lines()
        .find(|l| l.trim_end().ends_with(CRONTAB_MARKER))
}

/// Turn auto-backup on and install the schedule from the stored settings
pub fn enable(
    manager: &BackupManager,
    scheduler: &dyn Scheduler,
    command: &str,
) -> BackupResult<ScheduleSpec> {
    let config = manager.config()?;
    let spec = ScheduleSpec {
        frequency: config.auto_backup.frequency,
        time: config.auto_backup.time_of_day()?,
        command: command.to_string(),
    };

    scheduler.install(&spec)?;
    manager.update_config(|config| {
        config.auto_backup.enabled = true;
        Ok(())
    })?;

    info!(cron = %spec.cron_expression(), "enabled automatic backups");
    manager
        .journal()
        .record(Operation::Schedule, None, Some(format!("enabled: {}", spec.cron_expression())));
    Ok(spec)
}

/// Turn auto-backup off and remove any installed schedule
///
/// Returns whether the scheduler had something installed.
pub fn disable(manager: &BackupManager, scheduler: &dyn Scheduler) -> BackupResult<bool> {
    let removed = scheduler.remove()?;
    manager.update_config(|config| {
        config.auto_backup.enabled = false;
        Ok(())
    })?;

    info!(removed, "disabled automatic backups");
    manager
        .journal()
        .record(Operation::Schedule, None, Some("disabled".to_string()));
    Ok(removed)
}
