//! Cronlock Daemon
//!
//! Runs shell commands on cron schedules with lease-based mutual exclusion,
//! so a fleet of daemons sharing one redis runs each trigger once.
//!
//! # Usage
//!
//! ```bash
//! cronlock-daemon run [--config PATH] [--log-level LEVEL]
//! cronlock-daemon trigger <NAME>
//! cronlock-daemon jobs
//! cronlock-daemon next <EXPRESSION> [-n COUNT] [--timezone TZ]
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/cronlock/config.toml)
//! 3. Environment variables (CRONLOCK__*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use cronlock_daemon::{list_jobs, run_daemon, show_next, trigger_job, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            run_daemon(cli.config.as_deref(), cli.log_level.as_deref()).await?;
        }
        Commands::Trigger { name } => {
            trigger_job(cli.config.as_deref(), cli.log_level.as_deref(), &name).await?;
        }
        Commands::Jobs => {
            list_jobs(cli.config.as_deref())?;
        }
        Commands::Next {
            expression,
            count,
            timezone,
        } => {
            show_next(
                cli.config.as_deref(),
                &expression,
                count,
                timezone.as_deref(),
            )?;
        }
    }

    Ok(())
}
