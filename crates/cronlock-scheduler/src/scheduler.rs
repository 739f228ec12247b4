//! Scheduler service wrapper around tokio-cron-scheduler.
//!
//! The engine only produces ticks. Every tick is handed to the trigger
//! pipeline in [`crate::executor`], which takes the job's lease, runs the
//! body under its deadline and retry policy, and records the outcome.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono_tz::Tz;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job as EngineJob, JobScheduler};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::executor::{execute_trigger, TriggerOutcome};
use crate::job::{ExecutionPolicy, Job};
use crate::lock::LockManager;
use crate::metrics::SchedulerMetrics;
use crate::registry::{JobRegistry, JobStatus, RegisteredJob};
use crate::schedule::CronSchedule;
use crate::{SchedulerConfig, SchedulerError};

/// A started engine and the token every trigger it spawns derives from.
struct Engine {
    scheduler: JobScheduler,
    lifetime: CancellationToken,
}

pub(crate) struct SchedulerInner {
    pub config: SchedulerConfig,
    pub timezone: Tz,
    pub lock_manager: Arc<dyn LockManager>,
    pub registry: Mutex<JobRegistry>,
    pub metrics: SchedulerMetrics,
    tracker: TaskTracker,
    running: AtomicBool,
    engine: tokio::sync::Mutex<Option<Engine>>,
}

impl SchedulerInner {
    fn dispatch(self: Arc<Self>, name: String, lifetime: CancellationToken) -> JoinHandle<TriggerOutcome> {
        let tracker = self.tracker.clone();
        tracker.spawn(execute_trigger(self, name, lifetime))
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let Some(mut engine) = self.engine.get_mut().take() else {
            return;
        };
        engine.lifetime.cancel();

        // Dropped while running: the engine's tick loop would outlive us.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = engine.scheduler.shutdown().await {
                        warn!("Error shutting down engine of dropped scheduler: {}", e);
                    }
                });
            }
            Err(_) => {
                warn!("Running scheduler dropped outside a runtime; engine not shut down");
            }
        }
    }
}

/// Distributed cron scheduler.
///
/// Cheap to clone; clones share the job table and lifecycle. Every trigger
/// takes a lease named after the job from the configured [`LockManager`],
/// so with a shared backend each trigger runs on at most one process.
///
/// Lifecycle: created stopped, `start` → running, `stop` → stopped. A
/// stopped scheduler may be started again. Call `stop` to drain in-flight
/// triggers; dropping a running scheduler only cancels them.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a stopped scheduler.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidTimezone` if the configured timezone
    /// is not a valid IANA name, and `SchedulerError::InvalidConfig` for a
    /// zero lease TTL, lock attempt count or default job timeout.
    pub fn new(
        config: SchedulerConfig,
        lock_manager: Arc<dyn LockManager>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let timezone = config.parse_timezone()?;
        let metrics = SchedulerMetrics::new(&config.metrics);

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                config,
                timezone,
                lock_manager,
                registry: Mutex::new(JobRegistry::new()),
                metrics,
                tracker: TaskTracker::new(),
                running: AtomicBool::new(false),
                engine: tokio::sync::Mutex::new(None),
            }),
        })
    }

    /// Register a job.
    ///
    /// Allowed in any state; if the scheduler is running the job starts
    /// firing immediately.
    ///
    /// # Errors
    ///
    /// - `InvalidJob` for an empty or whitespace-containing name, or a zero timeout
    /// - `InvalidCron` if the schedule does not parse
    /// - `DuplicateJob` if the name is already registered
    pub async fn add_job<J: Job + 'static>(&self, job: J) -> Result<(), SchedulerError> {
        self.add_shared_job(Arc::new(job)).await
    }

    /// Register a job that is already behind an `Arc`.
    pub async fn add_shared_job(&self, job: Arc<dyn Job>) -> Result<(), SchedulerError> {
        let name = job.name().to_string();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(SchedulerError::InvalidJob(format!(
                "job name '{}' must be non-empty and contain no whitespace",
                name
            )));
        }

        if job.timeout().is_some_and(|t| t.is_zero()) {
            return Err(SchedulerError::InvalidJob(format!(
                "job '{}' has a zero timeout",
                name
            )));
        }

        let schedule = CronSchedule::parse_in(job.schedule(), self.inner.timezone).map_err(
            |e| SchedulerError::InvalidCron {
                job: name.clone(),
                expression: job.schedule().to_string(),
                reason: e.0,
            },
        )?;
        validate_engine_expression(&name, &schedule)?;

        let policy = ExecutionPolicy::for_job(job.as_ref(), self.inner.config.default_job_timeout());

        let engine = self.inner.engine.lock().await;
        self.inner.registry.lock().register(RegisteredJob {
            job,
            schedule: schedule.clone(),
            policy,
            engine_id: None,
        })?;

        if let Some(engine) = engine.as_ref() {
            match self.schedule_on_engine(engine, &name, &schedule).await {
                Ok(id) => {
                    self.inner.registry.lock().set_engine_id(&name, Some(id));
                }
                Err(e) => {
                    let _ = self.inner.registry.lock().remove(&name);
                    return Err(e);
                }
            }
        }

        info!(
            job = %name,
            cron = %schedule.expression(),
            timezone = %schedule.timezone().name(),
            timeout_ms = policy.timeout.as_millis() as u64,
            retry_count = policy.retry_count,
            "Job registered"
        );
        Ok(())
    }

    /// Unregister a job.
    ///
    /// A trigger already in flight runs to completion. Any lease this
    /// process holds for the job is released.
    pub async fn remove_job(&self, name: &str) -> Result<(), SchedulerError> {
        let engine = self.inner.engine.lock().await;
        let removed = self.inner.registry.lock().remove(name);
        let (registered, leases) = removed?;

        if let (Some(engine), Some(id)) = (engine.as_ref(), registered.engine_id) {
            if let Err(e) = engine.scheduler.remove(&id).await {
                warn!(job = %name, error = %e, "Failed to remove job from engine");
            }
        }
        drop(engine);

        for lease in leases {
            if let Err(e) = self.inner.lock_manager.release_lock(&lease).await {
                warn!(job = %name, error = %e, "Failed to release lease of removed job");
            }
        }

        info!(job = %name, "Job removed");
        Ok(())
    }

    /// Start firing triggers.
    ///
    /// Cancelling `shutdown` aborts every in-flight trigger the same way
    /// `stop` does, but leaves the scheduler marked running until `stop`
    /// is called.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyRunning` if the scheduler is started.
    pub async fn start(&self, shutdown: &CancellationToken) -> Result<(), SchedulerError> {
        let mut slot = self.inner.engine.lock().await;
        if slot.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let lifetime = shutdown.child_token();
        let engine = Engine {
            scheduler: JobScheduler::new().await?,
            lifetime: lifetime.clone(),
        };

        let jobs: Vec<(String, CronSchedule)> = self
            .inner
            .registry
            .lock()
            .snapshots()
            .into_iter()
            .map(|(status, schedule)| (status.name, schedule))
            .collect();

        for (name, schedule) in &jobs {
            match self.schedule_on_engine(&engine, name, schedule).await {
                Ok(id) => {
                    self.inner.registry.lock().set_engine_id(name, Some(id));
                }
                Err(e) => {
                    self.inner.registry.lock().clear_engine_ids();
                    return Err(e);
                }
            }
        }

        if let Err(e) = engine.scheduler.start().await {
            self.inner.registry.lock().clear_engine_ids();
            return Err(e.into());
        }

        self.inner.tracker.reopen();
        self.inner.lock_manager.start_maintenance(lifetime);
        *slot = Some(engine);
        self.inner.running.store(true, Ordering::SeqCst);

        info!(
            jobs = jobs.len(),
            lock_backend = self.inner.lock_manager.backend_name(),
            timezone = %self.inner.timezone.name(),
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop firing triggers and wait for in-flight ones.
    ///
    /// In-flight triggers see their cancellation token fire; `stop` waits up
    /// to `shutdown_timeout_secs` for them to finish.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NotRunning` if the scheduler is not started.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut slot = self.inner.engine.lock().await;
        let Some(mut engine) = slot.take() else {
            return Err(SchedulerError::NotRunning);
        };

        info!("Initiating scheduler shutdown");
        self.inner.running.store(false, Ordering::SeqCst);
        engine.lifetime.cancel();

        if let Err(e) = engine.scheduler.shutdown().await {
            warn!("Error during scheduler shutdown: {}", e);
        }
        self.inner.registry.lock().clear_engine_ids();

        self.inner.tracker.close();
        let timeout = self.inner.config.shutdown_timeout();
        if tokio::time::timeout(timeout, self.inner.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.inner.tracker.len(),
                timeout_secs = timeout.as_secs(),
                "Shutdown timeout elapsed with triggers still running"
            );
        }

        info!("Scheduler shutdown complete");
        Ok(())
    }

    /// Check if the scheduler is currently running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Run one trigger of `name` now, outside its schedule.
    ///
    /// Goes through the same lease, deadline and retry pipeline as a
    /// scheduled tick and waits for it to finish.
    pub async fn trigger(&self, name: &str) -> Result<TriggerOutcome, SchedulerError> {
        let lifetime = {
            let slot = self.inner.engine.lock().await;
            match slot.as_ref() {
                Some(engine) => engine.lifetime.clone(),
                None => return Err(SchedulerError::NotRunning),
            }
        };

        if !self.inner.registry.lock().is_registered(name) {
            return Err(SchedulerError::JobNotFound(name.to_string()));
        }

        debug!(job = %name, "Manual trigger");
        self.inner
            .clone()
            .dispatch(name.to_string(), lifetime)
            .await
            .map_err(|e| SchedulerError::Engine(format!("trigger task for '{}' failed: {}", name, e)))
    }

    /// Status of one job, with `next_run` and `is_locked` computed now.
    pub async fn job_status(&self, name: &str) -> Result<JobStatus, SchedulerError> {
        let snapshot = self.inner.registry.lock().snapshot(name);
        let (status, schedule) =
            snapshot.ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?;
        Ok(self.refresh(status, &schedule).await)
    }

    /// Status of every registered job, sorted by name.
    pub async fn job_statuses(&self) -> Vec<JobStatus> {
        let snapshots = self.inner.registry.lock().snapshots();
        let mut statuses = Vec::with_capacity(snapshots.len());
        for (status, schedule) in snapshots {
            statuses.push(self.refresh(status, &schedule).await);
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    async fn refresh(&self, mut status: JobStatus, schedule: &CronSchedule) -> JobStatus {
        status.next_run = schedule.next_trigger();
        status.is_locked = match self.inner.lock_manager.is_locked(&status.name).await {
            Ok(locked) => locked,
            Err(e) => {
                warn!(job = %status.name, error = %e, "Failed to query lease state");
                false
            }
        };
        status
    }

    /// Names of registered jobs, sorted.
    pub fn job_names(&self) -> Vec<String> {
        let mut names = self.inner.registry.lock().names();
        names.sort();
        names
    }

    pub fn job_count(&self) -> usize {
        self.inner.registry.lock().job_count()
    }

    /// Get the scheduler configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn lock_manager(&self) -> Arc<dyn LockManager> {
        self.inner.lock_manager.clone()
    }

    async fn schedule_on_engine(
        &self,
        engine: &Engine,
        name: &str,
        schedule: &CronSchedule,
    ) -> Result<Uuid, SchedulerError> {
        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        let job_name = name.to_string();
        let lifetime = engine.lifetime.clone();

        let engine_job =
            EngineJob::new_async_tz(schedule.expression(), schedule.timezone(), move |_uuid, _lock| {
                let weak = weak.clone();
                let name = job_name.clone();
                let lifetime = lifetime.clone();
                Box::pin(async move {
                    if let Some(inner) = weak.upgrade() {
                        let _ = inner.dispatch(name, lifetime);
                    }
                })
            })
            .map_err(|e| SchedulerError::InvalidCron {
                job: name.to_string(),
                expression: schedule.expression().to_string(),
                reason: e.to_string(),
            })?;

        let id = engine.scheduler.add(engine_job).await?;
        debug!(job = %name, uuid = %id, "Job added to engine");
        Ok(id)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.job_count())
            .field("running", &self.is_running())
            .field("lock_backend", &self.inner.lock_manager.backend_name())
            .finish_non_exhaustive()
    }
}

/// Reject expressions the engine cannot tick even though they parse.
fn validate_engine_expression(job: &str, schedule: &CronSchedule) -> Result<(), SchedulerError> {
    EngineJob::new_async(schedule.expression(), |_uuid, _lock| Box::pin(async {}))
        .map(|_| ())
        .map_err(|e| SchedulerError::InvalidCron {
            job: job.to_string(),
            expression: schedule.expression().to_string(),
            reason: e.to_string(),
        })
}
