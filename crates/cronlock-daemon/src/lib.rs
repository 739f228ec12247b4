//! Cronlock daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `settings`: Layered configuration (defaults, files, environment)
//! - `jobs`: Shell-command jobs
//! - `commands`: Command implementations (run, trigger, jobs, next)

pub mod cli;
pub mod commands;
pub mod jobs;
pub mod settings;

pub use cli::{Cli, Commands};
pub use commands::{build_scheduler, list_jobs, run_daemon, show_next, trigger_job};
pub use jobs::CommandJob;
pub use settings::{CommandJobConfig, Settings, SettingsError};
