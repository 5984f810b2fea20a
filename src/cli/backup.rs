//! Backup CLI commands
//!
//! Implements the `dot-backup` subcommands on top of the backup engine.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Subcommand, ValueEnum};

use crate::backup::{
    BackupManager, CreateOptions, Doctor, DoctorOptions, RestoreManager, RestoreMode,
    RestoreRequest, Transport,
};
use crate::config::paths::BackupPaths;
use crate::config::settings::SETTING_KEYS;
use crate::display::{
    format_doctor_report, format_history, format_record_details, format_record_table,
    format_retention_plan, format_size, format_transfer, format_verification,
};
use crate::error::{BackupError, BackupResult};
use crate::models::{BackupType, Compression};
use crate::schedule::{self, CrontabScheduler, Scheduler};

/// Output format for `list`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ListFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

/// `schedule` actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScheduleAction {
    Enable,
    Disable,
    Status,
}

/// Backup subcommands
#[derive(Subcommand)]
pub enum BackupCommands {
    /// Create the backup root and an empty metadata store
    Init {
        /// Replace a corrupt store with an empty one
        #[arg(short, long)]
        force: bool,
    },

    /// Capture a new backup
    Create {
        /// full, incremental, differential or config-only
        backup_type: String,
        /// Backup name (derived from the type and time when omitted)
        name: Option<String>,
        /// Free-form description
        description: Option<String>,
        /// Baseline to diff against instead of the automatic choice
        #[arg(long)]
        parent: Option<String>,
        /// Source path relative to the base directory (repeatable)
        #[arg(long = "source")]
        sources: Vec<String>,
        /// Exclude glob (repeatable)
        #[arg(long = "exclude")]
        excludes: Vec<String>,
        /// gzip, bzip2, xz, zip or none
        #[arg(long)]
        compression: Option<String>,
        /// Apply the retention policy afterwards
        #[arg(long)]
        prune: bool,
    },

    /// List backups, newest first
    List {
        /// Name substring, description substring, tier or backup type
        filter: Option<String>,
        #[arg(short, long, value_enum, default_value_t = ListFormat::Table)]
        format: ListFormat,
    },

    /// Show details of a backup
    Info {
        name: String,
    },

    /// Delete a backup
    Delete {
        name: String,
        /// Also delete backups that depend on it
        #[arg(short, long)]
        force: bool,
    },

    /// Apply the retention policy
    Prune {
        /// Show what would be pruned without changing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Verify one backup or all of them
    Verify {
        /// Backup name, or `all`
        #[arg(default_value = "all")]
        target: String,
        /// Print nothing; only the exit code reports the result
        #[arg(short, long)]
        quiet: bool,
    },

    /// Restore files from a backup
    Restore {
        name: String,
        /// Directory to restore into (defaults to the base directory)
        target: Option<PathBuf>,
        /// full, selective or config-only
        #[arg(default_value = "full")]
        mode: String,
        /// Glob selecting files for a selective restore (repeatable)
        #[arg(long = "include")]
        include: Vec<String>,
        /// Replace files that already exist at the target
        #[arg(long)]
        overwrite: bool,
    },

    /// Show or change engine settings
    Config {
        /// Setting key such as `retention.daily`
        key: Option<String>,
        /// New value
        value: Option<String>,
    },

    /// Manage automatic incremental backups
    Schedule {
        #[arg(value_enum)]
        action: ScheduleAction,
    },

    /// Clean up stale locks and partial directories, repair the store
    Doctor {
        /// Remove the lock regardless of age and delete orphan directories
        #[arg(short, long)]
        force: bool,
        /// Rebuild the store from the manifests on disk
        #[arg(long)]
        repair: bool,
    },

    /// Show recent operations
    History {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Package the backup root into one archive
    Export {
        output: PathBuf,
    },

    /// Merge an exported archive into a backup root
    Import {
        archive: PathBuf,
        /// Root to import into (defaults to the current root)
        target: Option<PathBuf>,
    },

    /// Copy every backup from one root into another
    Migrate {
        source: PathBuf,
        target: PathBuf,
    },
}

impl BackupCommands {
    /// Whether the command asked for no output at all
    pub fn is_quiet(&self) -> bool {
        matches!(self, Self::Verify { quiet: true, .. })
    }
}

/// Handle a backup command
pub fn handle_backup_command(paths: &BackupPaths, cmd: BackupCommands) -> BackupResult<()> {
    let manager = BackupManager::new(paths.clone());

    match cmd {
        BackupCommands::Init { force } => {
            if manager.init(force)? {
                println!("Initialized backup root at {}", paths.root().display());
            } else {
                println!("Backup root already initialized: {}", paths.root().display());
            }
        }

        BackupCommands::Create {
            backup_type,
            name,
            description,
            parent,
            sources,
            excludes,
            compression,
            prune,
        } => {
            let backup_type = BackupType::parse(&backup_type).ok_or_else(|| {
                BackupError::Validation(format!(
                    "Invalid backup type '{}'. Valid types: full, incremental, differential, config-only",
                    backup_type
                ))
            })?;
            let compression = compression
                .map(|c| {
                    Compression::parse(&c).ok_or_else(|| {
                        BackupError::Validation(format!(
                            "Invalid compression '{}'. Valid values: gzip, bzip2, xz, zip, none",
                            c
                        ))
                    })
                })
                .transpose()?;

            let options = CreateOptions {
                name,
                parent,
                description,
                sources: (!sources.is_empty()).then_some(sources),
                excludes: (!excludes.is_empty()).then_some(excludes),
                compression,
            };
            let record = manager.create(backup_type, options)?;

            println!("Created {} backup '{}'", record.backup_type, record.name);
            if let Some(parent) = &record.parent {
                println!("Baseline: {}", parent);
            }
            println!(
                "Files:    {} ({})",
                record.file_count,
                format_size(record.size_bytes)
            );
            println!("Location: {}", record.path.display());

            if prune || manager.config()?.auto_prune {
                let plan = manager.apply_retention()?;
                if !plan.prune.is_empty() {
                    println!();
                    println!("{}", format_retention_plan(&plan, true));
                }
            }
        }

        BackupCommands::List { filter, format } => {
            let records = manager.list(filter.as_deref())?;
            match format {
                ListFormat::Table => println!("{}", format_record_table(&records, Utc::now())),
                ListFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
                ListFormat::Yaml => {
                    let yaml = serde_yaml::to_string(&records)
                        .map_err(|e| BackupError::Config(format!("YAML encoding failed: {}", e)))?;
                    print!("{}", yaml);
                }
            }
        }

        BackupCommands::Info { name } => {
            let details = manager.info(&name)?;
            println!("{}", format_record_details(&details));
        }

        BackupCommands::Delete { name, force } => {
            let removed = manager.delete(&name, force)?;
            for record in &removed {
                println!("Deleted '{}'", record.name);
            }
        }

        BackupCommands::Prune { dry_run } => {
            let plan = if dry_run {
                manager.plan_retention()?
            } else {
                manager.apply_retention()?
            };
            println!("{}", format_retention_plan(&plan, !dry_run));
        }

        BackupCommands::Verify { target, quiet } => {
            if target == "all" {
                let report = manager.verify_all()?;
                if !quiet {
                    println!("{}", format_verification(&report));
                }
                report.into_result()?;
            } else {
                let result = manager.verify(&target)?;
                if !quiet {
                    match &result.reason {
                        Some(reason) if !result.valid => {
                            println!("FAIL  {}: {}", result.name, reason)
                        }
                        _ => println!("ok    {}", result.name),
                    }
                }
                result.into_result()?;
            }
        }

        BackupCommands::Restore {
            name,
            target,
            mode,
            include,
            overwrite,
        } => {
            let mode = RestoreMode::parse(&mode).ok_or_else(|| {
                BackupError::Validation(format!(
                    "Invalid restore mode '{}'. Valid modes: full, selective, config-only",
                    mode
                ))
            })?;
            let request = RestoreRequest {
                name,
                target,
                mode,
                include,
                overwrite,
            };
            let result = RestoreManager::new(paths.clone()).restore(&request)?;
            println!("{}", result.summary());
            println!("Layers: {}", result.layers.join(" -> "));
        }

        BackupCommands::Config { key, value } => match (key, value) {
            (None, _) => {
                let config = manager.config()?;
                for key in SETTING_KEYS {
                    println!("{} = {}", key, config.get(key).unwrap_or_default());
                }
            }
            (Some(key), None) => {
                let config = manager.config()?;
                let value = config.get(&key).ok_or_else(|| {
                    BackupError::Validation(format!(
                        "Unknown setting '{}'. Known settings: {}",
                        key,
                        SETTING_KEYS.join(", ")
                    ))
                })?;
                println!("{}", value);
            }
            (Some(key), Some(value)) => {
                manager.set_config(&key, &value)?;
                println!("{} = {}", key, value);
            }
        },

        BackupCommands::Schedule { action } => {
            let scheduler = CrontabScheduler::new();
            match action {
                ScheduleAction::Enable => {
                    let spec = schedule::enable(&manager, &scheduler, &scheduled_command(paths)?)?;
                    println!(
                        "Automatic backups enabled ({} at {}): {}",
                        spec.frequency,
                        spec.time.format("%H:%M"),
                        spec.cron_expression()
                    );
                }
                ScheduleAction::Disable => {
                    if schedule::disable(&manager, &scheduler)? {
                        println!("Automatic backups disabled");
                    } else {
                        println!("Automatic backups disabled (no schedule was installed)");
                    }
                }
                ScheduleAction::Status => {
                    let config = manager.config()?;
                    let state = if config.auto_backup.enabled {
                        "enabled"
                    } else {
                        "disabled"
                    };
                    println!(
                        "Automatic backups {} ({} at {})",
                        state, config.auto_backup.frequency, config.auto_backup.time
                    );
                    match scheduler.status()? {
                        Some(line) => println!("Installed: {}", line),
                        None => println!("Installed: none"),
                    }
                }
            }
        }

        BackupCommands::Doctor { force, repair } => {
            let report = Doctor::new(paths.clone()).run(DoctorOptions { force, repair })?;
            println!("{}", format_doctor_report(&report));
        }

        BackupCommands::History { limit } => {
            let entries = manager.history(limit)?;
            println!("{}", format_history(&entries));
        }

        BackupCommands::Export { output } => {
            let summary = Transport::new(paths.clone()).export(&output)?;
            println!(
                "Exported {} backup(s) to {} ({})",
                summary.backups,
                summary.path.display(),
                format_size(summary.bytes)
            );
        }

        BackupCommands::Import { archive, target } => {
            let target = target
                .map(BackupPaths::with_root)
                .unwrap_or_else(|| paths.clone());
            let summary = Transport::new(target).import(&archive)?;
            println!("{}", format_transfer(&summary));
        }

        BackupCommands::Migrate { source, target } => {
            let summary = Transport::new(BackupPaths::with_root(target))
                .migrate_from(&BackupPaths::with_root(source))?;
            println!("{}", format_transfer(&summary));
        }
    }

    Ok(())
}

/// Command line the scheduler runs for automatic backups
fn scheduled_command(paths: &BackupPaths) -> BackupResult<String> {
    let exe = std::env::current_exe()
        .map_err(|e| BackupError::Schedule(format!("cannot locate dot-backup binary: {}", e)))?;
    Ok(format!(
        "'{}' --root '{}' create incremental",
        exe.display(),
        paths.root().display()
    ))
}
