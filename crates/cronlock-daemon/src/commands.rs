//! Command implementations for the cronlock daemon.
//!
//! Handles:
//! - run: load config, connect the lock backend, schedule jobs, wait for a signal
//! - trigger: run one configured job immediately
//! - jobs: list configured jobs and their next trigger
//! - next: preview trigger times of an expression

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cronlock_scheduler::{lock, CronSchedule, JobResult, Scheduler, TriggerOutcome};

use crate::jobs::CommandJob;
use crate::settings::Settings;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

fn load_settings(config_path: Option<&str>, log_level: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    Ok(settings)
}

fn init_tracing(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse()
        .map_err(|_| anyhow!("invalid timezone '{}'", name))
}

/// Connect the lock backend and register every configured job.
pub async fn build_scheduler(settings: &Settings) -> Result<Scheduler> {
    let lock_manager = lock::connect(&settings.lock)
        .await
        .context("Failed to connect lock backend")?;

    let scheduler = Scheduler::new(settings.scheduler.clone(), lock_manager)
        .context("Failed to create scheduler")?;

    for job in &settings.jobs {
        scheduler
            .add_job(CommandJob::new(job.clone()))
            .await
            .with_context(|| format!("Failed to register job '{}'", job.name))?;
    }

    Ok(scheduler)
}

/// Run the scheduler until Ctrl+C or SIGTERM.
pub async fn run_daemon(config_path: Option<&str>, log_level: Option<&str>) -> Result<()> {
    let settings = load_settings(config_path, log_level)?;
    init_tracing(&settings.log_level)?;

    info!("Cronlock daemon starting...");
    info!("Configuration:");
    info!("  Timezone: {}", settings.scheduler.timezone);
    info!("  Lock backend: {:?}", settings.lock.backend);
    info!("  Lock TTL: {}s", settings.scheduler.lock_ttl_secs);
    info!("  Jobs: {}", settings.jobs.len());

    let scheduler = build_scheduler(&settings).await?;
    if scheduler.job_count() == 0 {
        warn!("No jobs configured; add [[jobs]] entries to the config file");
    }

    let shutdown = CancellationToken::new();
    scheduler
        .start(&shutdown)
        .await
        .context("Failed to start scheduler")?;

    if settings.status_log_interval_secs > 0 {
        tokio::spawn(log_statuses(
            scheduler.clone(),
            Duration::from_secs(settings.status_log_interval_secs),
            shutdown.clone(),
        ));
    }

    shutdown_signal().await;

    shutdown.cancel();
    scheduler.stop().await.context("Failed to stop scheduler")?;
    info!("Cronlock daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

async fn log_statuses(scheduler: Scheduler, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                for status in scheduler.job_statuses().await {
                    info!(
                        job = %status.name,
                        runs = status.run_count,
                        successes = status.success_count,
                        errors = status.error_count,
                        running = status.is_running,
                        locked = status.is_locked,
                        next_run = ?status.next_run,
                        last_error = ?status.last_error,
                        "Job status"
                    );
                }
            }
        }
    }
}

/// Run one configured job immediately and report the outcome.
///
/// Exits with an error if the job failed, so scripts can check the status.
pub async fn trigger_job(
    config_path: Option<&str>,
    log_level: Option<&str>,
    name: &str,
) -> Result<()> {
    let settings = load_settings(config_path, log_level)?;
    init_tracing(&settings.log_level)?;

    let scheduler = build_scheduler(&settings).await?;
    let shutdown = CancellationToken::new();
    scheduler.start(&shutdown).await?;

    let outcome = scheduler.trigger(name).await;
    scheduler.stop().await?;

    match outcome? {
        TriggerOutcome::Skipped => {
            println!("{}: skipped (lease held by another process)", name);
            Ok(())
        }
        TriggerOutcome::Completed(JobResult::Success) => {
            println!("{}: succeeded", name);
            Ok(())
        }
        TriggerOutcome::Completed(JobResult::Failed(e))
        | TriggerOutcome::Completed(JobResult::Cancelled(e)) => {
            Err(anyhow!("{}: {}", name, e))
        }
    }
}

/// Print configured jobs and their next trigger.
pub fn list_jobs(config_path: Option<&str>) -> Result<()> {
    let settings = Settings::load(config_path).context("Failed to load configuration")?;
    let tz = parse_timezone(&settings.scheduler.timezone)?;

    if settings.jobs.is_empty() {
        println!("No jobs configured");
        return Ok(());
    }
    for line in describe_jobs(&settings, tz, Utc::now()) {
        println!("{}", line);
    }
    Ok(())
}

/// One line per job: name, schedule, next trigger and command.
pub fn describe_jobs(settings: &Settings, tz: Tz, now: DateTime<Utc>) -> Vec<String> {
    settings
        .jobs
        .iter()
        .map(|job| {
            let next = match CronSchedule::parse_in(&job.schedule, tz) {
                Ok(schedule) => schedule
                    .next_after(now)
                    .map(|t| t.with_timezone(&tz).format(TIME_FORMAT).to_string())
                    .unwrap_or_else(|| "never".to_string()),
                Err(e) => format!("invalid schedule ({})", e),
            };
            format!(
                "{:<20} {:<20} next: {:<28} {}",
                job.name, job.schedule, next, job.command
            )
        })
        .collect()
}

/// Print the next `count` trigger times of `expression`.
pub fn show_next(
    config_path: Option<&str>,
    expression: &str,
    count: usize,
    timezone: Option<&str>,
) -> Result<()> {
    let tz = match timezone {
        Some(name) => parse_timezone(name)?,
        None => {
            let settings =
                Settings::load(config_path).context("Failed to load configuration")?;
            parse_timezone(&settings.scheduler.timezone)?
        }
    };

    let schedule = CronSchedule::parse_in(expression, tz)
        .with_context(|| format!("Invalid cron expression '{}'", expression))?;

    let upcoming = format_upcoming(&schedule, Utc::now(), count);
    if upcoming.is_empty() {
        println!("{} never fires", schedule);
    }
    for line in upcoming {
        println!("{}", line);
    }
    Ok(())
}

pub fn format_upcoming(schedule: &CronSchedule, from: DateTime<Utc>, count: usize) -> Vec<String> {
    schedule
        .upcoming_after(from, count)
        .into_iter()
        .map(|t| {
            t.with_timezone(&schedule.timezone())
                .format(TIME_FORMAT)
                .to_string()
        })
        .collect()
}
