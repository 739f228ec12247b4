//! One trigger's pipeline: lease → deadline-bounded run with retry →
//! release → status update.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::job::{ExecutionPolicy, Job};
use crate::lock::{LockLease, LockManager};
use crate::registry::JobResult;
use crate::scheduler::SchedulerInner;
use crate::{ExecutionError, LockError};

/// What happened to a single trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The lease could not be taken (or the scheduler was stopping); nothing ran.
    Skipped,
    /// The job ran; carries the outcome of its whole attempt sequence.
    Completed(JobResult),
}

pub(crate) async fn execute_trigger(
    inner: Arc<SchedulerInner>,
    name: String,
    lifetime: CancellationToken,
) -> TriggerOutcome {
    if lifetime.is_cancelled() {
        debug!(job = %name, "Scheduler stopping, trigger dropped");
        return TriggerOutcome::Skipped;
    }

    let registered = inner.registry.lock().get(&name).cloned();
    let Some(registered) = registered else {
        debug!(job = %name, "Job no longer registered, trigger dropped");
        return TriggerOutcome::Skipped;
    };
    let policy = registered.policy;

    // One deadline for lock wait, every attempt, and every retry pause.
    let exec = lifetime.child_token();
    let _exec_guard = exec.clone().drop_guard();
    spawn_deadline(exec.clone(), policy.timeout);

    let Some(lease) = acquire_with_retry(&inner, &name, &exec).await else {
        debug!(job = %name, "Lease held elsewhere, skipping trigger");
        inner.metrics.record_skip(&name);
        return TriggerOutcome::Skipped;
    };

    inner.registry.lock().record_start(&name, lease.clone());
    info!(job = %name, "Job started");
    let started = Instant::now();

    let renewal = inner.config.lock_renewal.then(|| {
        spawn_renewal(inner.lock_manager.clone(), lease.clone(), inner.config.lock_ttl())
    });

    let outcome = run_with_retry(
        &inner,
        registered.job.as_ref(),
        &name,
        &policy,
        &exec,
        &lifetime,
    )
    .await;

    drop(renewal);
    match inner.lock_manager.release_lock(&lease).await {
        Ok(true) => debug!(job = %name, "Lease released"),
        Ok(false) => warn!(job = %name, "Lease expired before release"),
        Err(e) => warn!(job = %name, error = %e, "Failed to release lease"),
    }

    let elapsed = started.elapsed();
    let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    let result = JobResult::from(&outcome);
    inner
        .registry
        .lock()
        .record_complete(&name, &lease.token, &outcome, duration_ms);
    inner.metrics.record_outcome(&name, &result, elapsed);

    match &outcome {
        Ok(()) => info!(job = %name, duration_ms, "Job completed"),
        Err(e) if e.is_cancellation() => warn!(job = %name, duration_ms, error = %e, "Job cancelled"),
        Err(e) => error!(job = %name, duration_ms, error = %e, "Job failed"),
    }

    TriggerOutcome::Completed(result)
}

/// Cancel `exec` once `timeout` elapses, unless it is cancelled first.
fn spawn_deadline(exec: CancellationToken, timeout: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = exec.cancelled() => {}
            _ = tokio::time::sleep(timeout) => exec.cancel(),
        }
    });
}

async fn acquire_with_retry(
    inner: &SchedulerInner,
    name: &str,
    exec: &CancellationToken,
) -> Option<LockLease> {
    let attempts = inner.config.max_lock_retries.max(1);
    let ttl = inner.config.lock_ttl();
    let delay = inner.config.lock_retry_delay();

    for attempt in 1..=attempts {
        match inner.lock_manager.acquire_lock(name, ttl).await {
            Ok(Some(lease)) => return Some(lease),
            Ok(None) => debug!(job = %name, attempt, "Lease busy"),
            Err(e) => warn!(job = %name, attempt, error = %e, "Lease acquisition failed"),
        }

        if attempt < attempts {
            tokio::select! {
                biased;
                _ = exec.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    None
}

/// Keep extending `lease` every third of its TTL until the guard drops.
fn spawn_renewal(lock_manager: Arc<dyn LockManager>, lease: LockLease, ttl: Duration) -> DropGuard {
    let stop = CancellationToken::new();
    let stopped = stop.clone();
    let period = (ttl / 3).max(Duration::from_millis(100));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = stopped.cancelled() => break,
                _ = ticker.tick() => {
                    match lock_manager.extend_lock(&lease, ttl).await {
                        Ok(()) => debug!(job = %lease.job_name, "Lease extended"),
                        Err(LockError::NotHeld(_)) => {
                            warn!(job = %lease.job_name, "Lease lost while job was running");
                            break;
                        }
                        Err(e) => warn!(job = %lease.job_name, error = %e, "Failed to extend lease"),
                    }
                }
            }
        }
    });

    stop.drop_guard()
}

async fn run_with_retry(
    inner: &SchedulerInner,
    job: &dyn Job,
    name: &str,
    policy: &ExecutionPolicy,
    exec: &CancellationToken,
    lifetime: &CancellationToken,
) -> Result<(), ExecutionError> {
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match AssertUnwindSafe(job.run(exec.clone())).catch_unwind().await {
            Ok(Ok(())) => {
                if attempt > 1 {
                    info!(job = %name, attempt, "Job succeeded after retry");
                }
                return Ok(());
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => "job panicked".to_string(),
        };

        if exec.is_cancelled() {
            return Err(cancellation_cause(lifetime, policy.timeout));
        }

        inner.metrics.record_attempt_failure(name);
        if attempt >= max_attempts {
            return Err(ExecutionError::Failed(error));
        }

        warn!(
            job = %name,
            attempt,
            max_attempts,
            error = %error,
            retry_delay_ms = policy.retry_delay.as_millis() as u64,
            "Job attempt failed, retrying"
        );

        tokio::select! {
            biased;
            _ = exec.cancelled() => return Err(cancellation_cause(lifetime, policy.timeout)),
            _ = tokio::time::sleep(policy.retry_delay) => {}
        }
    }
}

fn cancellation_cause(lifetime: &CancellationToken, timeout: Duration) -> ExecutionError {
    if lifetime.is_cancelled() {
        ExecutionError::Cancelled
    } else {
        ExecutionError::DeadlineExceeded(timeout)
    }
}
