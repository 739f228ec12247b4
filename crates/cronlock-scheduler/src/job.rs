//! The job contract and a closure-backed implementation.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A unit of recurring work.
///
/// `run` receives a token that fires when the trigger's deadline passes or
/// the scheduler stops. Implementations should return promptly once it
/// fires; the scheduler never aborts a running body.
#[async_trait]
pub trait Job: Send + Sync {
    /// Unique name, also used as the lease key.
    fn name(&self) -> &str;

    /// Cron expression (seconds-first, 6 or 7 fields).
    fn schedule(&self) -> &str;

    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()>;

    /// Deadline for one trigger's whole attempt sequence.
    /// `None` uses the scheduler's default job timeout.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Additional attempts after the first failure.
    fn retry_count(&self) -> u32 {
        0
    }

    /// Pause between attempts.
    fn retry_delay(&self) -> Duration {
        Duration::ZERO
    }
}

/// Timeout and retry settings resolved at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPolicy {
    pub timeout: Duration,
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl ExecutionPolicy {
    pub(crate) fn for_job(job: &dyn Job, default_timeout: Duration) -> Self {
        Self {
            timeout: job.timeout().unwrap_or(default_timeout),
            retry_count: job.retry_count(),
            retry_delay: job.retry_delay(),
        }
    }

    /// Total number of `run` invocations allowed per trigger.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

/// A [`Job`] built from a name, a schedule and an async closure.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use cronlock_scheduler::{Job, JobSpec};
///
/// let job = JobSpec::new("ping", "*/5 * * * * *", |_cancel| async { Ok(()) })
///     .with_timeout(Duration::from_secs(2))
///     .with_retries(3, Duration::from_millis(500));
///
/// assert_eq!(job.name(), "ping");
/// assert_eq!(job.retry_count(), 3);
/// ```
pub struct JobSpec<F> {
    name: String,
    schedule: String,
    timeout: Option<Duration>,
    retry_count: u32,
    retry_delay: Duration,
    run_fn: F,
}

impl<F, Fut> JobSpec<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, schedule: impl Into<String>, run_fn: F) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            timeout: None,
            retry_count: 0,
            retry_delay: Duration::ZERO,
            run_fn,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_delay = retry_delay;
        self
    }
}

#[async_trait]
impl<F, Fut> Job for JobSpec<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> &str {
        &self.schedule
    }

    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        (self.run_fn)(cancel).await
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}
