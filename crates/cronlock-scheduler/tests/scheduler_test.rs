//! Integration tests for the trigger pipeline.
//!
//! Most tests register jobs on a yearly schedule and drive them through
//! `Scheduler::trigger`, so timing only depends on the job bodies. The
//! end-to-end tests let the engine tick every second.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use cronlock_scheduler::{
    Job, JobResult, JobSpec, LockManager, MemoryLockManager, Scheduler, SchedulerConfig,
    SchedulerError, TriggerOutcome,
};

/// Fires once a year; tests trigger manually.
const YEARLY: &str = "0 0 0 1 1 *";

fn config() -> SchedulerConfig {
    SchedulerConfig {
        shutdown_timeout_secs: 2,
        max_lock_retries: 1,
        lock_retry_delay_ms: 50,
        ..Default::default()
    }
}

async fn started(locks: MemoryLockManager, config: SchedulerConfig) -> (Scheduler, CancellationToken) {
    let scheduler = Scheduler::new(config, Arc::new(locks)).unwrap();
    let shutdown = CancellationToken::new();
    scheduler.start(&shutdown).await.unwrap();
    (scheduler, shutdown)
}

/// Fails its first `failures` attempts, recording when each attempt began.
struct FlakyJob {
    name: String,
    failures: u32,
    retry_count: u32,
    retry_delay: Duration,
    attempts: Arc<Mutex<Vec<Instant>>>,
}

#[async_trait]
impl Job for FlakyJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> &str {
        YEARLY
    }

    async fn run(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        let attempt = {
            let mut attempts = self.attempts.lock();
            attempts.push(Instant::now());
            attempts.len() as u32
        };
        if attempt <= self.failures {
            anyhow::bail!("attempt {} failed", attempt);
        }
        Ok(())
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_duplicate_registration_rejected() {
    let scheduler = Scheduler::new(config(), Arc::new(MemoryLockManager::new())).unwrap();
    scheduler
        .add_job(JobSpec::new("report", YEARLY, |_| async { Ok(()) }))
        .await
        .unwrap();

    let err = scheduler
        .add_job(JobSpec::new("report", "*/5 * * * * *", |_| async { Ok(()) }))
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::DuplicateJob(_)));
    assert!(err.to_string().contains("report"));
    assert_eq!(scheduler.job_count(), 1);

    let status = scheduler.job_status("report").await.unwrap();
    assert_eq!(status.schedule, YEARLY);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_cron_names_job() {
    let scheduler = Scheduler::new(config(), Arc::new(MemoryLockManager::new())).unwrap();
    let err = scheduler
        .add_job(JobSpec::new("nightly", "61 * * * * *", |_| async { Ok(()) }))
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::InvalidCron { .. }));
    assert!(err.to_string().contains("nightly"));
    assert!(err.to_string().contains("61 * * * * *"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retry_until_success() {
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let (scheduler, _shutdown) = started(MemoryLockManager::new(), config()).await;
    scheduler
        .add_job(FlakyJob {
            name: "flaky".to_string(),
            failures: 2,
            retry_count: 3,
            retry_delay: Duration::from_millis(100),
            attempts: attempts.clone(),
        })
        .await
        .unwrap();

    let outcome = scheduler.trigger("flaky").await.unwrap();
    assert_eq!(outcome, TriggerOutcome::Completed(JobResult::Success));

    let attempts = attempts.lock().clone();
    assert_eq!(attempts.len(), 3);
    for pair in attempts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(100));
    }

    let status = scheduler.job_status("flaky").await.unwrap();
    assert_eq!(status.run_count, 1);
    assert_eq!(status.success_count, 1);
    assert_eq!(status.error_count, 0);
    assert!(status.last_error.is_none());

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retries_exhausted() {
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let (scheduler, _shutdown) = started(MemoryLockManager::new(), config()).await;
    scheduler
        .add_job(FlakyJob {
            name: "broken".to_string(),
            failures: u32::MAX,
            retry_count: 2,
            retry_delay: Duration::from_millis(10),
            attempts: attempts.clone(),
        })
        .await
        .unwrap();

    let outcome = scheduler.trigger("broken").await.unwrap();
    assert_eq!(
        outcome,
        TriggerOutcome::Completed(JobResult::Failed("attempt 3 failed".to_string()))
    );
    assert_eq!(attempts.lock().len(), 3);

    let status = scheduler.job_status("broken").await.unwrap();
    assert_eq!(status.run_count, 1);
    assert_eq!(status.error_count, 1);
    assert_eq!(status.success_count, 0);
    assert_eq!(status.last_error.as_deref(), Some("attempt 3 failed"));
    assert!(!status.is_running);

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_skip_when_lease_held_elsewhere() {
    let locks = MemoryLockManager::new();
    let other_process = locks.clone();
    let (scheduler, _shutdown) = started(locks, config()).await;

    let runs = Arc::new(AtomicU32::new(0));
    let counter = runs.clone();
    scheduler
        .add_job(JobSpec::new("report", YEARLY, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
        .await
        .unwrap();

    let held = other_process
        .acquire_lock("report", Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let outcome = scheduler.trigger("report").await.unwrap();
    assert_eq!(outcome, TriggerOutcome::Skipped);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    let status = scheduler.job_status("report").await.unwrap();
    assert_eq!(status.run_count, 0);
    assert!(status.is_locked);
    assert!(!status.is_running);

    other_process.release_lock(&held).await.unwrap();
    let outcome = scheduler.trigger("report").await.unwrap();
    assert_eq!(outcome, TriggerOutcome::Completed(JobResult::Success));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lock_retry_picks_up_released_lease() {
    let locks = MemoryLockManager::new();
    let other_process = locks.clone();
    let config = SchedulerConfig {
        max_lock_retries: 5,
        lock_retry_delay_ms: 100,
        ..config()
    };
    let (scheduler, _shutdown) = started(locks, config).await;
    scheduler
        .add_job(JobSpec::new("report", YEARLY, |_| async { Ok(()) }))
        .await
        .unwrap();

    let held = other_process
        .acquire_lock("report", Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        other_process.release_lock(&held).await.unwrap();
    });

    let outcome = scheduler.trigger("report").await.unwrap();
    assert_eq!(outcome, TriggerOutcome::Completed(JobResult::Success));

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lease_released_after_run() {
    let locks = MemoryLockManager::new();
    let observer = locks.clone();
    let (scheduler, _shutdown) = started(locks, config()).await;
    scheduler
        .add_job(JobSpec::new("report", YEARLY, |_| async {
            anyhow::bail!("upstream unavailable")
        }))
        .await
        .unwrap();

    scheduler.trigger("report").await.unwrap();
    assert!(!observer.is_locked("report").await.unwrap());

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deadline_cancels_job() {
    let (scheduler, _shutdown) = started(MemoryLockManager::new(), config()).await;
    scheduler
        .add_job(
            JobSpec::new("slow", YEARLY, |cancel: CancellationToken| async move {
                tokio::select! {
                    _ = cancel.cancelled() => anyhow::bail!("interrupted"),
                    _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(()),
                }
            })
            .with_timeout(Duration::from_millis(200))
            .with_retries(3, Duration::from_millis(50)),
        )
        .await
        .unwrap();

    let started_at = Instant::now();
    let outcome = scheduler.trigger("slow").await.unwrap();
    assert!(started_at.elapsed() < Duration::from_secs(2));
    assert!(matches!(outcome, TriggerOutcome::Completed(JobResult::Cancelled(_))));

    let status = scheduler.job_status("slow").await.unwrap();
    assert_eq!(status.error_count, 1);
    assert!(status.last_error.unwrap().contains("deadline"));

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_interrupts_retry_delay() {
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let (scheduler, _shutdown) = started(MemoryLockManager::new(), config()).await;
    scheduler
        .add_job(FlakyJob {
            name: "patient".to_string(),
            failures: u32::MAX,
            retry_count: 5,
            retry_delay: Duration::from_secs(10),
            attempts: attempts.clone(),
        })
        .await
        .unwrap();

    let trigger = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.trigger("patient").await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stop_began = Instant::now();
    scheduler.stop().await.unwrap();
    assert!(stop_began.elapsed() < Duration::from_secs(2));

    let outcome = trigger.await.unwrap().unwrap();
    assert!(matches!(outcome, TriggerOutcome::Completed(JobResult::Cancelled(_))));
    assert_eq!(attempts.lock().len(), 1);

    let status = scheduler.job_status("patient").await.unwrap();
    assert!(!status.is_running);
    assert_eq!(status.error_count, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_panicking_job_is_recorded() {
    let locks = MemoryLockManager::new();
    let observer = locks.clone();
    let (scheduler, _shutdown) = started(locks, config()).await;
    scheduler
        .add_job(JobSpec::new("explosive", YEARLY, |_| async { panic!("boom") }))
        .await
        .unwrap();

    let outcome = scheduler.trigger("explosive").await.unwrap();
    assert_eq!(
        outcome,
        TriggerOutcome::Completed(JobResult::Failed("job panicked".to_string()))
    );
    assert!(!observer.is_locked("explosive").await.unwrap());

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trigger_unknown_job() {
    let (scheduler, _shutdown) = started(MemoryLockManager::new(), config()).await;
    let result = scheduler.trigger("missing").await;
    assert!(matches!(result, Err(SchedulerError::JobNotFound(_))));
    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remove_job_stops_triggers() {
    let (scheduler, _shutdown) = started(MemoryLockManager::new(), config()).await;
    scheduler
        .add_job(JobSpec::new("report", YEARLY, |_| async { Ok(()) }))
        .await
        .unwrap();

    scheduler.remove_job("report").await.unwrap();
    assert!(matches!(
        scheduler.trigger("report").await,
        Err(SchedulerError::JobNotFound(_))
    ));
    assert!(matches!(
        scheduler.job_status("report").await,
        Err(SchedulerError::JobNotFound(_))
    ));

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_every_second_end_to_end() {
    let runs = Arc::new(AtomicU32::new(0));
    let counter = runs.clone();
    let scheduler = Scheduler::new(config(), Arc::new(MemoryLockManager::new())).unwrap();
    scheduler
        .add_job(
            JobSpec::new("ping", "* * * * * *", move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .with_timeout(Duration::from_secs(2))
            .with_retries(0, Duration::ZERO),
        )
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    scheduler.start(&shutdown).await.unwrap();
    tokio::time::sleep(Duration::from_millis(3500)).await;
    scheduler.stop().await.unwrap();

    let status = scheduler.job_status("ping").await.unwrap();
    assert!(status.run_count >= 2, "run_count = {}", status.run_count);
    assert_eq!(status.run_count, u64::from(runs.load(Ordering::SeqCst)));
    assert_eq!(status.success_count, status.run_count);
    assert!(status.last_run.is_some());
    assert!(!status.is_running);
    assert!(!scheduler.is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_two_schedulers_share_leases() {
    let locks = MemoryLockManager::new();
    let starts = Arc::new(Mutex::new(Vec::new()));

    let mut schedulers = Vec::new();
    let shutdown = CancellationToken::new();
    for _ in 0..2 {
        let scheduler = Scheduler::new(config(), Arc::new(locks.clone())).unwrap();
        let starts = starts.clone();
        scheduler
            .add_job(JobSpec::new("tick", "* * * * * *", move |_| {
                let starts = starts.clone();
                async move {
                    starts.lock().push(Instant::now());
                    tokio::time::sleep(Duration::from_millis(800)).await;
                    Ok(())
                }
            }))
            .await
            .unwrap();
        scheduler.start(&shutdown).await.unwrap();
        schedulers.push(scheduler);
    }

    tokio::time::sleep(Duration::from_millis(3500)).await;
    for scheduler in &schedulers {
        scheduler.stop().await.unwrap();
    }

    let mut starts = starts.lock().clone();
    starts.sort();
    assert!(!starts.is_empty());
    for pair in starts.windows(2) {
        assert!(
            pair[1] - pair[0] >= Duration::from_millis(500),
            "two executions overlapped"
        );
    }

    let mut total_runs = 0;
    for scheduler in &schedulers {
        total_runs += scheduler.job_status("tick").await.unwrap().run_count;
    }
    assert_eq!(total_runs, starts.len() as u64);
}
