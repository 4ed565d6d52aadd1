//! Retry and timeout configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Launch retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of launch attempts per service.
    pub max_attempts: u32,

    /// Initial retry interval in milliseconds.
    pub initial_interval_ms: u64,

    /// Maximum retry interval in milliseconds.
    pub max_interval_ms: u64,

    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 1000,
            max_interval_ms: 30000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// `initial * multiplier^(attempt - 1)`, capped at `max_interval_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_interval_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_interval_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long a service may take to become ready, in seconds.
    pub readiness_seconds: u64,

    /// Interval between readiness probes in milliseconds.
    pub probe_interval_ms: u64,

    /// Upper bound for a single probe attempt in milliseconds.
    pub probe_attempt_ms: u64,

    /// Grace period given to a container on stop, in seconds.
    pub stop_seconds: u64,

    /// Timeout for runtime commands (`docker run`, `docker rm`, ...), in seconds.
    pub command_seconds: u64,

    /// Timeout for a single model pull, in seconds.
    pub model_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            readiness_seconds: 120,
            probe_interval_ms: 2000,
            probe_attempt_ms: 5000,
            stop_seconds: 10,
            command_seconds: 120,
            model_seconds: 3600,
        }
    }
}

impl TimeoutConfig {
    /// Readiness deadline as a duration.
    pub fn readiness(&self) -> Duration {
        Duration::from_secs(self.readiness_seconds)
    }

    /// Probe interval as a duration.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Single probe attempt bound as a duration.
    pub fn probe_attempt(&self) -> Duration {
        Duration::from_millis(self.probe_attempt_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_interval_ms, 1000);
        assert_eq!(config.max_interval_ms, 30000);
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_delay_grows_exponentially_and_is_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_interval_ms: 100,
            max_interval_ms: 1000,
            multiplier: 2.0,
        };
        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(400));
        assert_eq!(config.delay_for(4), Duration::from_millis(800));
        assert_eq!(config.delay_for(5), Duration::from_millis(1000));
        assert_eq!(config.delay_for(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_timeout_config_default() {
        let config = TimeoutConfig::default();
        assert_eq!(config.readiness_seconds, 120);
        assert_eq!(config.probe_interval(), Duration::from_secs(2));
        assert_eq!(config.probe_attempt(), Duration::from_secs(5));
        assert_eq!(config.stop_seconds, 10);
    }
}
