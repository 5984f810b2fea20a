//! Engine settings for dotbackup
//!
//! The settings live in the metadata store's `config` section: default
//! compression and checksum, the tiered retention policy, auto-backup schedule,
//! and the source/exclude/config path sets used by captures.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::BackupError;
use crate::models::{ChecksumAlgorithm, Compression};

/// Tiered retention counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Number of most recent days to keep a daily backup for
    #[serde(default)]
    pub daily: usize,
    /// Number of weeks to keep a weekly backup for
    #[serde(default)]
    pub weekly: usize,
    /// Number of months to keep a monthly backup for
    #[serde(default)]
    pub monthly: usize,
    /// Number of years to keep a yearly backup for
    #[serde(default)]
    pub yearly: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            daily: 7,
            weekly: 4,
            monthly: 12,
            yearly: 2,
        }
    }
}

/// How often the external scheduler triggers an incremental backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    #[default]
    Daily,
    Weekly,
}

impl Frequency {
    /// Parse frequency from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hourly => write!(f, "hourly"),
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
        }
    }
}

/// Auto-backup schedule settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoBackup {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub frequency: Frequency,
    /// Time of day as `HH:MM`
    #[serde(default = "default_backup_time")]
    pub time: String,
}

impl Default for AutoBackup {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: Frequency::default(),
            time: default_backup_time(),
        }
    }
}

impl AutoBackup {
    /// Parsed time of day
    pub fn time_of_day(&self) -> Result<NaiveTime, BackupError> {
        parse_time(&self.time)
    }
}

/// Engine configuration stored in the metadata store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default compression for new backups
    #[serde(default)]
    pub compression: Compression,

    /// Checksum algorithm for manifests
    #[serde(default)]
    pub checksum: ChecksumAlgorithm,

    /// Tiered retention policy
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Scheduled incremental backups
    #[serde(default)]
    pub auto_backup: AutoBackup,

    /// Apply retention after every create
    #[serde(default)]
    pub auto_prune: bool,

    /// Directory archive paths are relative to (defaults to home)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,

    /// Source paths, relative to the base directory or absolute
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,

    /// Glob patterns excluded from captures
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,

    /// Fixed configuration set for config-only captures and restores
    #[serde(default = "default_config_paths")]
    pub config_paths: Vec<String>,

    /// Seconds to wait for the store lock before giving up
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

fn default_backup_time() -> String {
    "02:00".to_string()
}

fn default_sources() -> Vec<String> {
    [
        ".bashrc",
        ".bash_profile",
        ".zshrc",
        ".profile",
        ".gitconfig",
        ".tmux.conf",
        ".vimrc",
        ".config/nvim",
        ".config/alacritty",
        ".config/starship.toml",
        ".ssh/config",
        ".local/bin",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_excludes() -> Vec<String> {
    ["**/.git/**", "**/node_modules/**", "**/*.swp", "**/.DS_Store"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_config_paths() -> Vec<String> {
    [
        ".bashrc",
        ".zshrc",
        ".gitconfig",
        ".tmux.conf",
        ".vimrc",
        ".config/nvim",
        ".config/alacritty",
        ".config/starship.toml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_lock_timeout_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            checksum: ChecksumAlgorithm::default(),
            retention: RetentionConfig::default(),
            auto_backup: AutoBackup::default(),
            auto_prune: false,
            base_dir: None,
            sources: default_sources(),
            excludes: default_excludes(),
            config_paths: default_config_paths(),
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

/// Settings keys accepted by `config <setting> <value>`
pub const SETTING_KEYS: &[&str] = &[
    "compression",
    "checksum",
    "retention.daily",
    "retention.weekly",
    "retention.monthly",
    "retention.yearly",
    "auto_backup.enabled",
    "auto_backup.frequency",
    "auto_backup.time",
    "auto_prune",
    "base_dir",
    "sources",
    "excludes",
    "config_paths",
    "lock_timeout_secs",
];

impl EngineConfig {
    /// Resolved capture base directory
    pub fn base_dir(&self) -> Result<PathBuf, BackupError> {
        match &self.base_dir {
            Some(dir) => Ok(dir.clone()),
            None => super::paths::home_dir(),
        }
    }

    /// Lock wait bound
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Set a setting from its dotted key and string value
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), BackupError> {
        match key {
            "compression" => {
                self.compression = Compression::parse(value).ok_or_else(|| {
                    invalid(key, value, "expected gzip, bzip2, xz, zip or none")
                })?;
            }
            "checksum" => {
                self.checksum = ChecksumAlgorithm::parse(value)
                    .ok_or_else(|| invalid(key, value, "expected none or sha256"))?;
            }
            "retention.daily" => self.retention.daily = parse_count(key, value)?,
            "retention.weekly" => self.retention.weekly = parse_count(key, value)?,
            "retention.monthly" => self.retention.monthly = parse_count(key, value)?,
            "retention.yearly" => self.retention.yearly = parse_count(key, value)?,
            "auto_backup.enabled" => self.auto_backup.enabled = parse_bool(key, value)?,
            "auto_backup.frequency" => {
                self.auto_backup.frequency = Frequency::parse(value)
                    .ok_or_else(|| invalid(key, value, "expected hourly, daily or weekly"))?;
            }
            "auto_backup.time" => {
                parse_time(value)?;
                self.auto_backup.time = value.to_string();
            }
            "auto_prune" => self.auto_prune = parse_bool(key, value)?,
            "base_dir" => {
                self.base_dir = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "sources" => self.sources = parse_list(value),
            "excludes" => self.excludes = parse_list(value),
            "config_paths" => self.config_paths = parse_list(value),
            "lock_timeout_secs" => {
                self.lock_timeout_secs = value
                    .parse()
                    .map_err(|_| invalid(key, value, "expected a number of seconds"))?;
            }
            _ => {
                return Err(BackupError::Validation(format!(
                    "Unknown setting '{}'. Known settings: {}",
                    key,
                    SETTING_KEYS.join(", ")
                )))
            }
        }
        Ok(())
    }

    /// Render a setting's current value
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "compression" => self.compression.to_string(),
            "checksum" => self.checksum.to_string(),
            "retention.daily" => self.retention.daily.to_string(),
            "retention.weekly" => self.retention.weekly.to_string(),
            "retention.monthly" => self.retention.monthly.to_string(),
            "retention.yearly" => self.retention.yearly.to_string(),
            "auto_backup.enabled" => self.auto_backup.enabled.to_string(),
            "auto_backup.frequency" => self.auto_backup.frequency.to_string(),
            "auto_backup.time" => self.auto_backup.time.clone(),
            "auto_prune" => self.auto_prune.to_string(),
            "base_dir" => self
                .base_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "~".to_string()),
            "sources" => self.sources.join(","),
            "excludes" => self.excludes.join(","),
            "config_paths" => self.config_paths.join(","),
            "lock_timeout_secs" => self.lock_timeout_secs.to_string(),
            _ => return None,
        };
        Some(value)
    }
}

fn invalid(key: &str, value: &str, expected: &str) -> BackupError {
    BackupError::Validation(format!("Invalid value '{}' for {}: {}", value, key, expected))
}

fn parse_count(key: &str, value: &str) -> Result<usize, BackupError> {
    value
        .parse()
        .map_err(|_| invalid(key, value, "expected a non-negative integer"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, BackupError> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(key, value, "expected true or false")),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_time(value: &str) -> Result<NaiveTime, BackupError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| invalid("auto_backup.time", value, "expected HH:MM"))
}
