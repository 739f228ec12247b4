//! Redis-backed lease store shared by every scheduler process.
//!
//! Each lease is a single key `prefix + job_name` whose value is the lease
//! token and whose redis TTL is the lease TTL:
//! - acquire: `SET key token NX PX ttl`
//! - release: compare-and-`DEL` script
//! - extend: compare-and-`PEXPIRE` script
//! - query: `EXISTS key`

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use super::{check_ttl, LockLease, LockManager};
use crate::LockError;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Lease store backed by redis.
pub struct RedisLockManager {
    conn: ConnectionManager,
    key_prefix: String,
    release_script: Script,
    extend_script: Script,
}

impl RedisLockManager {
    /// Connect to redis at `url` and verify the connection with `PING`.
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self, LockError> {
        let client = redis::Client::open(url)?;

        // Fail fast on an unreachable server before handing the client to
        // the reconnecting manager.
        let mut ping_conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut ping_conn).await?;

        let conn = ConnectionManager::new(client).await?;
        info!(url, key_prefix, "Redis lock backend connected");

        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
            release_script: Script::new(RELEASE_SCRIPT),
            extend_script: Script::new(EXTEND_SCRIPT),
        })
    }

    fn key(&self, job_name: &str) -> String {
        lease_key(&self.key_prefix, job_name)
    }
}

fn lease_key(prefix: &str, job_name: &str) -> String {
    format!("{}{}", prefix, job_name)
}

/// Redis rejects `PX 0`; round sub-millisecond TTLs up.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn acquire_lock(
        &self,
        job_name: &str,
        ttl: Duration,
    ) -> Result<Option<LockLease>, LockError> {
        check_ttl(job_name, ttl)?;
        let mut conn = self.conn.clone();
        let lease = LockLease::new(job_name, ttl);

        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(job_name))
            .arg(&lease.token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        if reply.is_some() {
            debug!(job = %job_name, "Lease acquired");
            Ok(Some(lease))
        } else {
            Ok(None)
        }
    }

    async fn release_lock(&self, lease: &LockLease) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release_script
            .key(self.key(&lease.job_name))
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn extend_lock(&self, lease: &LockLease, ttl: Duration) -> Result<(), LockError> {
        check_ttl(&lease.job_name, ttl)?;
        let mut conn = self.conn.clone();
        let refreshed: i64 = self
            .extend_script
            .key(self.key(&lease.job_name))
            .arg(&lease.token)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;

        if refreshed > 0 {
            Ok(())
        } else {
            Err(LockError::NotHeld(lease.job_name.clone()))
        }
    }

    async fn is_locked(&self, job_name: &str) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(self.key(job_name)).await?;
        Ok(exists)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
