//! Daemon settings.
//!
//! Loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/cronlock/config.toml)
//! 3. Config file passed with `--config`
//! 4. Environment variables (`CRONLOCK__LOG_LEVEL`, `CRONLOCK__LOCK__BACKEND`, ...)
//!
//! CLI flags are applied by the caller afterwards.

use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cronlock_scheduler::{LockConfig, LockError, SchedulerConfig, SchedulerError};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid job '{name}': {reason}")]
    InvalidJob { name: String, reason: String },

    #[error("Invalid [scheduler] settings: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Invalid [lock] settings: {0}")]
    Lock(#[from] LockError),
}

/// A shell command run on a cron schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandJobConfig {
    pub name: String,

    /// Cron expression, seconds first.
    pub schedule: String,

    /// Passed to `sh -c`.
    pub command: String,

    /// Working directory; `~` is expanded.
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Per-trigger deadline. Unset uses `scheduler.default_job_timeout_secs`.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default)]
    pub retry_delay_ms: u64,
}

impl CommandJobConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.command.trim().is_empty() {
            return Err("command must not be empty".to_string());
        }
        if self.timeout_secs == Some(0) {
            return Err("timeout_secs must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error) or an EnvFilter directive.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How often `run` logs every job's status. 0 disables.
    #[serde(default = "default_status_log_interval")]
    pub status_log_interval_secs: u64,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub jobs: Vec<CommandJobConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_status_log_interval() -> u64 {
    300
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            status_log_interval_secs: default_status_log_interval(),
            scheduler: SchedulerConfig::default(),
            lock: LockConfig::default(),
            jobs: Vec::new(),
        }
    }
}

/// Default config file location, without extension.
pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("", "", "cronlock")
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config")
}

impl Settings {
    /// Load settings with layered precedence (see module docs).
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())?
            .set_default(
                "status_log_interval_secs",
                default_status_log_interval() as i64,
            )?
            .add_source(File::with_name(&default_config_path().to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("CRONLOCK")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.scheduler.validate()?;
        self.lock.validate()?;
        for job in &self.jobs {
            job.validate().map_err(|reason| SettingsError::InvalidJob {
                name: job.name.clone(),
                reason,
            })?;
        }
        Ok(())
    }
}
