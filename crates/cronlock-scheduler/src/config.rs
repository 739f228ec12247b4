//! Scheduler and lock backend configuration.
//!
//! Durations are carried as integer seconds/milliseconds so the structs
//! round-trip cleanly through TOML, JSON, and environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{LockError, SchedulerError};

/// Configuration for the scheduler service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Timezone used to evaluate cron expressions (IANA name, e.g. "Europe/Berlin").
    /// Defaults to "UTC".
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// How long `stop()` waits for in-flight triggers after cancelling them.
    /// Defaults to 30 seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Lease TTL used for every job lock. Defaults to 30 seconds.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// Fixed pause between lock acquisition attempts. Defaults to 1000 ms.
    #[serde(default = "default_lock_retry_delay")]
    pub lock_retry_delay_ms: u64,

    /// Number of lock acquisition attempts per trigger. Defaults to 3.
    #[serde(default = "default_max_lock_retries")]
    pub max_lock_retries: u32,

    /// Timeout for jobs that do not declare their own. Defaults to 10 minutes.
    #[serde(default = "default_job_timeout")]
    pub default_job_timeout_secs: u64,

    /// Keep extending the lease while a job runs. Defaults to true.
    #[serde(default = "default_lock_renewal")]
    pub lock_renewal: bool,

    /// Metrics emission settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_lock_ttl() -> u64 {
    30
}

fn default_lock_retry_delay() -> u64 {
    1000
}

fn default_max_lock_retries() -> u32 {
    3
}

fn default_job_timeout() -> u64 {
    600
}

fn default_lock_renewal() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            lock_ttl_secs: default_lock_ttl(),
            lock_retry_delay_ms: default_lock_retry_delay(),
            max_lock_retries: default_max_lock_retries(),
            default_job_timeout_secs: default_job_timeout(),
            lock_renewal: default_lock_renewal(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Parse the configured timezone string into a chrono_tz::Tz.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidTimezone` if the timezone string
    /// is not a valid IANA timezone identifier.
    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, SchedulerError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone(self.timezone.clone()))
    }

    /// Check option ranges and the timezone.
    ///
    /// A zero lease TTL would make every lease expire on creation, and zero
    /// lock attempts or a zero job timeout would skip or cancel every trigger.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        self.parse_timezone()?;
        if self.lock_ttl_secs == 0 {
            return Err(SchedulerError::InvalidConfig(
                "lock_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_lock_retries == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_lock_retries must be at least 1".to_string(),
            ));
        }
        if self.default_job_timeout_secs == 0 {
            return Err(SchedulerError::InvalidConfig(
                "default_job_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lock_retry_delay_ms)
    }

    pub fn default_job_timeout(&self) -> Duration {
        Duration::from_secs(self.default_job_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Metrics emission settings.
///
/// The scheduler only talks to the `metrics` facade; installing a recorder
/// or exporter is left to the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Prefix for every metric name. Defaults to "cronlock".
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

fn default_metrics_prefix() -> String {
    "cronlock".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prefix: default_metrics_prefix(),
        }
    }
}

/// Which lease backend to use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockBackend {
    /// In-process leases; only correct for a single scheduler process
    #[default]
    Memory,
    /// Leases in a shared redis instance
    Redis,
}

/// Configuration for the lock manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub backend: LockBackend,

    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix prepended to every lease key. Use a distinct value per
    /// deployment/environment sharing one redis.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Interval of the expired-lease sweep for the memory backend.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Use the memory backend if redis is unreachable at startup.
    #[serde(default = "default_fallback_to_memory")]
    pub fallback_to_memory: bool,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "cronlock:lock:".to_string()
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_fallback_to_memory() -> bool {
    true
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: LockBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            sweep_interval_secs: default_sweep_interval(),
            fallback_to_memory: default_fallback_to_memory(),
        }
    }
}

impl LockConfig {
    pub fn validate(&self) -> Result<(), LockError> {
        if self.sweep_interval_secs == 0 {
            return Err(LockError::InvalidConfig(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.backend == LockBackend::Redis && self.redis_url.trim().is_empty() {
            return Err(LockError::InvalidConfig(
                "redis_url is required for the redis backend".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.timezone, "UTC");
        assert_eq!(config.shutdown_timeout_secs, 30);
        assert_eq!(config.lock_ttl(), Duration::from_secs(30));
        assert_eq!(config.lock_retry_delay(), Duration::from_secs(1));
        assert_eq!(config.max_lock_retries, 3);
        assert_eq!(config.default_job_timeout(), Duration::from_secs(600));
        assert!(config.lock_renewal);
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.prefix, "cronlock");
    }

    #[test]
    fn test_parse_timezone_utc() {
        let config = SchedulerConfig::default();
        let tz = config.parse_timezone().unwrap();
        assert_eq!(tz.name(), "UTC");
    }

    #[test]
    fn test_parse_timezone_america_new_york() {
        let config = SchedulerConfig {
            timezone: "America/New_York".to_string(),
            ..Default::default()
        };
        let tz = config.parse_timezone().unwrap();
        assert_eq!(tz.name(), "America/New_York");
    }

    #[test]
    fn test_parse_invalid_timezone() {
        let config = SchedulerConfig {
            timezone: "Invalid/Zone".to_string(),
            ..Default::default()
        };
        match config.parse_timezone() {
            Err(SchedulerError::InvalidTimezone(tz)) => assert_eq!(tz, "Invalid/Zone"),
            other => panic!("Expected InvalidTimezone error, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"lock_ttl_secs": 5, "metrics": {"enabled": true}}"#)
                .unwrap();
        assert_eq!(config.lock_ttl_secs, 5);
        assert_eq!(config.max_lock_retries, 3);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.prefix, "cronlock");
    }

    #[test]
    fn test_lock_config_defaults() {
        let config = LockConfig::default();
        assert_eq!(config.backend, LockBackend::Memory);
        assert_eq!(config.key_prefix, "cronlock:lock:");
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        assert!(config.fallback_to_memory);
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(SchedulerConfig::default().validate().is_ok());
        assert!(LockConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_lock_ttl() {
        let config = SchedulerConfig {
            lock_ttl_secs: 0,
            ..Default::default()
        };
        match config.validate() {
            Err(SchedulerError::InvalidConfig(msg)) => assert!(msg.contains("lock_ttl_secs")),
            other => panic!("Expected InvalidConfig error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_zero_lock_attempts_and_timeout() {
        let config = SchedulerConfig {
            max_lock_retries: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SchedulerError::InvalidConfig(_))));

        let config = SchedulerConfig {
            default_job_timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SchedulerError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_bad_timezone() {
        let config = SchedulerConfig {
            timezone: "Mars/Olympus".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SchedulerError::InvalidTimezone(_))));
    }

    #[test]
    fn test_lock_config_rejects_zero_sweep_interval() {
        let config = LockConfig {
            sweep_interval_secs: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, LockError::InvalidConfig(_)));
        assert!(err.to_string().contains("sweep_interval_secs"));
    }

    #[test]
    fn test_lock_backend_serde() {
        let config: LockConfig = serde_json::from_str(r#"{"backend": "redis"}"#).unwrap();
        assert_eq!(config.backend, LockBackend::Redis);
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
    }
}
