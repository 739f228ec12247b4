//! Process-local lease store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{check_ttl, LockLease, LockManager};
use crate::LockError;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct MemoryLease {
    token: String,
    acquired_at: Instant,
    ttl: Duration,
}

impl MemoryLease {
    fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.acquired_at) < self.ttl
    }
}

type LeaseTable = Arc<Mutex<HashMap<String, MemoryLease>>>;

/// Lease store kept in process memory.
///
/// Clones share one table, so independent handles contend exactly like
/// separate clients of a shared backend. Expired leases are evicted lazily
/// on access and by a periodic sweep started through
/// [`LockManager::start_maintenance`].
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use cronlock_scheduler::{LockManager, MemoryLockManager};
///
/// let locks = MemoryLockManager::new();
/// let lease = locks.acquire_lock("report", Duration::from_secs(30)).await?;
/// assert!(lease.is_some());
/// assert!(locks.acquire_lock("report", Duration::from_secs(30)).await?.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct MemoryLockManager {
    leases: LeaseTable,
    sweep_interval: Duration,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            leases: Arc::new(Mutex::new(HashMap::new())),
            sweep_interval,
        }
    }

    /// Drop every expired lease, returning how many were removed.
    pub fn sweep(&self) -> usize {
        sweep_table(&self.leases)
    }

    /// Number of entries currently stored, live or not yet evicted.
    pub fn len(&self) -> usize {
        self.leases.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryLockManager {
    fn default() -> Self {
        Self::new()
    }
}

fn sweep_table(leases: &LeaseTable) -> usize {
    let now = Instant::now();
    let mut table = leases.lock();
    let before = table.len();
    table.retain(|_, lease| lease.is_live(now));
    before - table.len()
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn acquire_lock(
        &self,
        job_name: &str,
        ttl: Duration,
    ) -> Result<Option<LockLease>, LockError> {
        check_ttl(job_name, ttl)?;
        let now = Instant::now();
        let mut table = self.leases.lock();

        if let Some(existing) = table.get(job_name) {
            if existing.is_live(now) {
                return Ok(None);
            }
        }

        let lease = LockLease::new(job_name, ttl);
        table.insert(
            job_name.to_string(),
            MemoryLease {
                token: lease.token.clone(),
                acquired_at: now,
                ttl,
            },
        );
        Ok(Some(lease))
    }

    async fn release_lock(&self, lease: &LockLease) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut table = self.leases.lock();

        match table.get(&lease.job_name) {
            Some(held) if held.token == lease.token => {
                let was_live = held.is_live(now);
                table.remove(&lease.job_name);
                Ok(was_live)
            }
            Some(held) if !held.is_live(now) => {
                table.remove(&lease.job_name);
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    async fn extend_lock(&self, lease: &LockLease, ttl: Duration) -> Result<(), LockError> {
        check_ttl(&lease.job_name, ttl)?;
        let now = Instant::now();
        let mut table = self.leases.lock();

        match table.get_mut(&lease.job_name) {
            Some(held) if held.token == lease.token && held.is_live(now) => {
                held.acquired_at = now;
                held.ttl = ttl;
                Ok(())
            }
            Some(held) => {
                if !held.is_live(now) {
                    table.remove(&lease.job_name);
                }
                Err(LockError::NotHeld(lease.job_name.clone()))
            }
            None => Err(LockError::NotHeld(lease.job_name.clone())),
        }
    }

    async fn is_locked(&self, job_name: &str) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut table = self.leases.lock();

        match table.get(job_name) {
            Some(held) if held.is_live(now) => Ok(true),
            Some(_) => {
                table.remove(job_name);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn start_maintenance(&self, shutdown: CancellationToken) {
        let leases = self.leases.clone();
        let period = self.sweep_interval;
        if period.is_zero() {
            warn!("Lease sweep disabled: sweep interval is zero");
            return;
        }

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Lease sweep stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = sweep_table(&leases);
                        if removed > 0 {
                            debug!(removed, "Swept expired leases");
                        }
                    }
                }
            }
        });
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
