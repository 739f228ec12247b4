//! Trigger metrics emitted through the `metrics` facade.

use std::time::Duration;

use metrics::{counter, histogram};

use crate::config::MetricsConfig;
use crate::registry::JobResult;

#[derive(Debug, Clone)]
pub(crate) struct SchedulerMetrics {
    enabled: bool,
    prefix: String,
}

impl SchedulerMetrics {
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            enabled: config.enabled,
            prefix: config.prefix.clone(),
        }
    }

    fn name(&self, suffix: &str) -> String {
        format!("{}_{}", self.prefix, suffix)
    }

    pub fn record_outcome(&self, job: &str, result: &JobResult, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        let label = match result {
            JobResult::Success => "success",
            JobResult::Failed(_) => "failed",
            JobResult::Cancelled(_) => "cancelled",
        };
        counter!(self.name("job_runs_total"), "job" => job.to_string(), "result" => label)
            .increment(1);
        histogram!(self.name("job_duration_seconds"), "job" => job.to_string())
            .record(elapsed.as_secs_f64());
    }

    pub fn record_skip(&self, job: &str) {
        if !self.enabled {
            return;
        }
        counter!(self.name("job_skipped_total"), "job" => job.to_string()).increment(1);
    }

    pub fn record_attempt_failure(&self, job: &str) {
        if !self.enabled {
            return;
        }
        counter!(self.name("job_attempt_failures_total"), "job" => job.to_string()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_use_prefix() {
        let metrics = SchedulerMetrics::new(&MetricsConfig {
            enabled: true,
            prefix: "billing".to_string(),
        });
        assert_eq!(metrics.name("job_runs_total"), "billing_job_runs_total");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        // No global recorder is installed in tests; calls must not panic.
        let metrics = SchedulerMetrics::new(&MetricsConfig {
            enabled: true,
            ..Default::default()
        });
        metrics.record_outcome("ping", &JobResult::Success, Duration::from_millis(5));
        metrics.record_skip("ping");
        metrics.record_attempt_failure("ping");

        let disabled = SchedulerMetrics::new(&MetricsConfig::default());
        disabled.record_skip("ping");
    }
}
