//! CLI argument parsing for the cronlock daemon.
//!
//! CLI flags override all other config sources.

use clap::{Parser, Subcommand};

/// Cronlock Daemon
///
/// Runs shell commands on cron schedules, at most once per trigger across
/// every daemon sharing the same lock backend.
#[derive(Parser, Debug)]
#[command(name = "cronlock-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/cronlock/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler in the foreground until Ctrl+C or SIGTERM
    Run,

    /// Run one configured job now, through the same lease and retry pipeline
    Trigger {
        /// Job name from the config file
        name: String,
    },

    /// List configured jobs with their next trigger time
    Jobs,

    /// Print the upcoming trigger times of a cron expression
    Next {
        /// Cron expression, seconds first (e.g. "0 30 9 * * MON-FRI")
        expression: String,

        /// Number of trigger times to print
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,

        /// IANA timezone to evaluate in (default from config)
        #[arg(short, long)]
        timezone: Option<String>,
    },
}
