//! Distributed cron scheduler.
//!
//! Jobs are registered under unique names with a cron schedule. On every
//! trigger the scheduler takes a TTL-bounded lease named after the job
//! from a [`LockManager`]; the process that wins runs the job body under a
//! per-trigger deadline with bounded retry, then releases the lease. Point
//! several processes at one redis and each trigger runs exactly once
//! across them.
//!
//! # Features
//!
//! - Seconds-precision cron expressions, evaluated in a configured timezone
//! - Lease-based mutual exclusion with token-checked release and renewal
//! - Per-trigger deadline covering lock wait, every attempt and retry pauses
//! - Bounded retry with a fixed delay between attempts
//! - Per-job status: run/success/error counts, last error, next run, lease state
//! - Graceful shutdown via `CancellationToken`
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use cronlock_scheduler::{JobSpec, MemoryLockManager, Scheduler, SchedulerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default(), Arc::new(MemoryLockManager::new()))?;
//!
//! scheduler.add_job(
//!     JobSpec::new("hourly-rollup", "0 0 * * * *", |cancel| async move {
//!         do_rollup(cancel).await
//!     })
//!     .with_timeout(Duration::from_secs(300))
//!     .with_retries(2, Duration::from_secs(10)),
//! ).await?;
//!
//! let shutdown = CancellationToken::new();
//! scheduler.start(&shutdown).await?;
//!
//! let status = scheduler.job_status("hourly-rollup").await?;
//! println!("next run: {:?}", status.next_run);
//!
//! scheduler.stop().await?;
//! ```

mod config;
mod error;
mod executor;
mod job;
pub mod lock;
mod metrics;
mod registry;
mod schedule;
mod scheduler;

pub use config::{LockBackend, LockConfig, MetricsConfig, SchedulerConfig};
pub use error::{ExecutionError, LockError, SchedulerError};
pub use executor::TriggerOutcome;
pub use job::{ExecutionPolicy, Job, JobSpec};
pub use lock::{LockLease, LockManager, MemoryLockManager};
#[cfg(feature = "redis")]
pub use lock::RedisLockManager;
pub use registry::{JobResult, JobStatus};
pub use schedule::{CronError, CronSchedule};
pub use scheduler::Scheduler;
