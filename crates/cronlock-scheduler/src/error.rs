//! Error types for the scheduler crate.
//!
//! Registration and lifecycle failures surface as [`SchedulerError`].
//! Lease backend failures surface as [`LockError`]. Job execution errors are
//! never returned to callers; they are recorded in the job's status.

use std::time::Duration;

use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

/// Errors that can occur during scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Error from the underlying tokio-cron-scheduler engine
    #[error("Scheduler engine error: {0}")]
    Engine(String),

    /// Invalid cron expression for a job
    #[error("Invalid cron expression '{expression}' for job '{job}': {reason}")]
    InvalidCron {
        job: String,
        expression: String,
        reason: String,
    },

    /// Invalid timezone string
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// A scheduler option is out of range
    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    /// Job definition rejected (e.g. empty name)
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// A job with this name is already registered
    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    /// Job not found in scheduler
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Scheduler is already running
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// Scheduler is not running
    #[error("scheduler is not running")]
    NotRunning,

    /// Lease backend failure
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(err: JobSchedulerError) -> Self {
        SchedulerError::Engine(err.to_string())
    }
}

/// Errors returned by [`LockManager`](crate::LockManager) implementations.
#[derive(Debug, Error)]
pub enum LockError {
    /// No live lease with a matching token exists
    #[error("lock does not exist: {0}")]
    NotHeld(String),

    /// The backing store could not be reached or rejected a command
    #[error("Lock backend error: {0}")]
    Backend(String),

    /// A lock option or lease TTL is out of range
    #[error("Invalid lock configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for LockError {
    fn from(err: redis::RedisError) -> Self {
        LockError::Backend(err.to_string())
    }
}

/// Terminal failure of one trigger's attempt sequence.
///
/// Cancellation is kept apart from job failures so status consumers can tell
/// a broken job from one that was interrupted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// The job returned an error on its final attempt
    #[error("{0}")]
    Failed(String),

    /// The per-trigger deadline fired
    #[error("execution deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// The scheduler was stopped while the trigger was in flight
    #[error("execution cancelled by scheduler shutdown")]
    Cancelled,
}

impl ExecutionError {
    /// Whether this error came from cancellation rather than the job itself.
    pub fn is_cancellation(&self) -> bool {
        !matches!(self, ExecutionError::Failed(_))
    }
}
