//! Job table and per-job execution status.
//!
//! The `JobRegistry` holds the registered jobs together with their status
//! records. It is not synchronized itself: the scheduler keeps it behind a
//! single mutex and only touches it in short bookkeeping sections.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::{ExecutionPolicy, Job};
use crate::lock::LockLease;
use crate::schedule::CronSchedule;
use crate::{ExecutionError, SchedulerError};

/// Result of one trigger's attempt sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobResult {
    /// Job completed successfully
    Success,
    /// Job failed with an error message after exhausting its retries
    Failed(String),
    /// Sequence cut short by the trigger deadline or scheduler shutdown
    Cancelled(String),
}

impl From<&Result<(), ExecutionError>> for JobResult {
    fn from(outcome: &Result<(), ExecutionError>) -> Self {
        match outcome {
            Ok(()) => JobResult::Success,
            Err(err) if err.is_cancellation() => JobResult::Cancelled(err.to_string()),
            Err(err) => JobResult::Failed(err.to_string()),
        }
    }
}

/// Status of a registered job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    /// Name of the job
    pub name: String,
    /// Cron expression for the job schedule
    pub schedule: String,
    /// When the job last finished a trigger (if ever)
    pub last_run: Option<DateTime<Utc>>,
    /// When the job is next scheduled to run
    pub next_run: Option<DateTime<Utc>>,
    /// Whether a trigger of this job is executing in this process
    pub is_running: bool,
    /// Whether any process holds the job's lease right now
    pub is_locked: bool,
    /// Total number of completed triggers
    pub run_count: u64,
    /// Triggers whose attempt sequence succeeded
    pub success_count: u64,
    /// Triggers whose attempt sequence failed or was cancelled
    pub error_count: u64,
    /// Error of the most recent failed trigger
    pub last_error: Option<String>,
    /// Result of the most recent trigger
    pub last_result: Option<JobResult>,
    /// Duration of the most recent trigger in milliseconds
    pub last_duration_ms: Option<u64>,
    /// When the job was registered
    pub created_at: DateTime<Utc>,
}

impl JobStatus {
    /// Create a new job status with the given name and cron expression.
    pub fn new(name: String, schedule: String) -> Self {
        Self {
            name,
            schedule,
            last_run: None,
            next_run: None,
            is_running: false,
            is_locked: false,
            run_count: 0,
            success_count: 0,
            error_count: 0,
            last_error: None,
            last_result: None,
            last_duration_ms: None,
            created_at: Utc::now(),
        }
    }
}

/// A job as the scheduler stores it.
#[derive(Clone)]
pub(crate) struct RegisteredJob {
    pub job: Arc<dyn Job>,
    pub schedule: CronSchedule,
    pub policy: ExecutionPolicy,
    /// Engine-side ID while the scheduler is running
    pub engine_id: Option<Uuid>,
}

struct Entry {
    registered: RegisteredJob,
    status: JobStatus,
    /// Leases of this process's in-flight triggers, oldest first
    held_leases: Vec<LockLease>,
}

/// Job table plus status table, keyed by job name.
#[derive(Default)]
pub(crate) struct JobRegistry {
    entries: HashMap<String, Entry>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. Leaves the registry untouched if the name is taken.
    pub fn register(&mut self, registered: RegisteredJob) -> Result<(), SchedulerError> {
        let name = registered.job.name().to_string();
        if self.entries.contains_key(&name) {
            return Err(SchedulerError::DuplicateJob(name));
        }

        let status = JobStatus::new(name.clone(), registered.schedule.expression().to_string());
        self.entries.insert(
            name,
            Entry {
                registered,
                status,
                held_leases: Vec::new(),
            },
        );
        Ok(())
    }

    /// Remove a job, returning it along with the leases this process holds.
    pub fn remove(
        &mut self,
        name: &str,
    ) -> Result<(RegisteredJob, Vec<LockLease>), SchedulerError> {
        self.entries
            .remove(name)
            .map(|entry| (entry.registered, entry.held_leases))
            .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredJob> {
        self.entries.get(name).map(|e| &e.registered)
    }

    pub fn set_engine_id(&mut self, name: &str, id: Option<Uuid>) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.registered.engine_id = id;
        }
    }

    pub fn clear_engine_ids(&mut self) {
        for entry in self.entries.values_mut() {
            entry.registered.engine_id = None;
        }
    }

    /// Mark the job as executing under `lease`.
    pub fn record_start(&mut self, name: &str, lease: LockLease) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.held_leases.push(lease);
            entry.status.is_running = true;
        }
    }

    /// Record the outcome of a whole attempt sequence.
    ///
    /// Exactly one of `success_count`/`error_count` is incremented.
    pub fn record_complete(
        &mut self,
        name: &str,
        token: &str,
        outcome: &Result<(), ExecutionError>,
        duration_ms: u64,
    ) {
        let Some(entry) = self.entries.get_mut(name) else {
            return;
        };

        entry.held_leases.retain(|lease| lease.token != token);

        let status = &mut entry.status;
        status.is_running = !entry.held_leases.is_empty();
        status.last_run = Some(Utc::now());
        status.last_duration_ms = Some(duration_ms);
        status.run_count += 1;
        match outcome {
            Ok(()) => status.success_count += 1,
            Err(err) => {
                status.error_count += 1;
                status.last_error = Some(err.to_string());
            }
        }
        status.last_result = Some(JobResult::from(outcome));
    }

    /// Copy of a job's stored status together with its schedule.
    pub fn snapshot(&self, name: &str) -> Option<(JobStatus, CronSchedule)> {
        self.entries
            .get(name)
            .map(|e| (e.status.clone(), e.registered.schedule.clone()))
    }

    pub fn snapshots(&self) -> Vec<(JobStatus, CronSchedule)> {
        self.entries
            .values()
            .map(|e| (e.status.clone(), e.registered.schedule.clone()))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn job_count(&self) -> usize {
        self.entries.len()
    }
}
