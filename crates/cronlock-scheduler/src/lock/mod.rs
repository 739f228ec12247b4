//! Lease-based job locks.
//!
//! A [`LockManager`] hands out TTL-bounded leases keyed by job name. At most
//! one live lease exists per name; every lease carries a random token and
//! release/extension only act when the stored token matches, so a holder
//! whose lease expired cannot delete a lease taken over by someone else.
//!
//! Two backends are provided:
//! - [`MemoryLockManager`]: process-local, for single-instance deployments
//! - [`RedisLockManager`]: shared across every process pointing at one redis

mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{LockBackend, LockConfig};
use crate::LockError;

pub use memory::MemoryLockManager;
#[cfg(feature = "redis")]
pub use self::redis::RedisLockManager;

/// A held lease on a job name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLease {
    pub job_name: String,
    /// Random token proving ownership
    pub token: String,
    pub ttl: Duration,
    pub acquired_at: DateTime<Utc>,
}

impl LockLease {
    pub(crate) fn new(job_name: &str, ttl: Duration) -> Self {
        Self {
            job_name: job_name.to_string(),
            token: Uuid::new_v4().to_string(),
            ttl,
            acquired_at: Utc::now(),
        }
    }

    /// When the lease lapses unless extended.
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.acquired_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Capability interface over a lease store.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Atomically take the lease for `job_name` if no live lease exists.
    ///
    /// Never waits for a holder: returns `Ok(None)` when the name is taken.
    async fn acquire_lock(&self, job_name: &str, ttl: Duration)
        -> Result<Option<LockLease>, LockError>;

    /// Delete the lease if it is still held under `lease.token`.
    ///
    /// Returns `true` if a lease was removed.
    async fn release_lock(&self, lease: &LockLease) -> Result<bool, LockError>;

    /// Push the expiry of a held lease to `now + ttl`.
    ///
    /// Fails with [`LockError::NotHeld`] if no live lease with this token exists.
    async fn extend_lock(&self, lease: &LockLease, ttl: Duration) -> Result<(), LockError>;

    /// Whether a live lease exists for `job_name`, regardless of holder.
    async fn is_locked(&self, job_name: &str) -> Result<bool, LockError>;

    /// Start background upkeep tied to `shutdown`. Default: nothing to do.
    fn start_maintenance(&self, _shutdown: CancellationToken) {}

    /// Short backend name for logs and status output.
    fn backend_name(&self) -> &'static str;
}

/// Build the lock manager selected by `config`.
///
/// With `backend = "redis"` and `fallback_to_memory = true`, an unreachable
/// redis degrades to the memory backend with a warning.
pub async fn connect(config: &LockConfig) -> Result<Arc<dyn LockManager>, LockError> {
    config.validate()?;
    match config.backend {
        LockBackend::Memory => {
            info!("Using in-memory lock manager");
            Ok(Arc::new(MemoryLockManager::with_sweep_interval(
                config.sweep_interval(),
            )))
        }
        LockBackend::Redis => match connect_redis(config).await {
            Ok(manager) => Ok(manager),
            Err(e) if config.fallback_to_memory => {
                warn!(
                    error = %e,
                    "Redis lock backend unavailable, falling back to in-memory locks"
                );
                Ok(Arc::new(MemoryLockManager::with_sweep_interval(
                    config.sweep_interval(),
                )))
            }
            Err(e) => Err(e),
        },
    }
}

/// Leases with a zero TTL would be expired on creation.
pub(crate) fn check_ttl(job_name: &str, ttl: Duration) -> Result<(), LockError> {
    if ttl.is_zero() {
        return Err(LockError::InvalidConfig(format!(
            "lease TTL for '{}' must be greater than zero",
            job_name
        )));
    }
    Ok(())
}

#[cfg(feature = "redis")]
async fn connect_redis(config: &LockConfig) -> Result<Arc<dyn LockManager>, LockError> {
    let manager = RedisLockManager::connect(&config.redis_url, &config.key_prefix).await?;
    Ok(Arc::new(manager))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_config: &LockConfig) -> Result<Arc<dyn LockManager>, LockError> {
    Err(LockError::Backend(
        "redis support not compiled in (enable the `redis` feature)".to_string(),
    ))
}
