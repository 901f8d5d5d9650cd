//! Runtime configuration model.
//!
//! Configuration is loaded once at host construction, validated, and never
//! mutated after `start()`. All fields carry serde defaults so a partial
//! YAML file or environment overlay produces a complete config.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use super::content_type::ContentType;
use super::retry::RetryConfig;
use crate::domain::error::SyncError;

/// Main configuration structure for a sync service host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServiceConfig {
    /// Service name used as the notification source and log target
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Executor pool size (1-20)
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,

    /// Per-operation ceiling in seconds
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Periodic health check cadence in seconds
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Maximum wait for in-flight operations on stop, in seconds
    #[serde(default = "default_shutdown_grace_period_secs")]
    pub shutdown_grace_period_secs: u64,

    /// Capacity of the notification event ring buffer
    #[serde(default = "default_notification_ring_capacity")]
    pub notification_ring_capacity: usize,

    /// Per-channel per-event send timeout in seconds
    #[serde(default = "default_channel_send_timeout_secs")]
    pub channel_send_timeout_secs: u64,

    /// Per-channel retry attempts for a failed send
    #[serde(default = "default_channel_retry_attempts")]
    pub channel_retry_attempts: u32,

    /// Default per-probe ceiling in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Executor queue bound; absent means unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_queue_bound: Option<usize>,

    /// What `submit` does when the bounded queue is full
    #[serde(default)]
    pub queue_full_policy: QueueFullPolicy,

    /// Byte throttle applied to transfers; absent means unthrottled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_limit_bytes_per_sec: Option<u64>,

    /// Default retry policy for operations
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Configured content type buckets
    #[serde(default)]
    pub content_types: Vec<ContentType>,
}

fn default_service_name() -> String {
    "packmule".to_string()
}

const fn default_max_concurrent_operations() -> usize {
    5
}

const fn default_operation_timeout_secs() -> u64 {
    30 * 60
}

const fn default_health_check_interval_secs() -> u64 {
    5 * 60
}

const fn default_shutdown_grace_period_secs() -> u64 {
    30
}

const fn default_notification_ring_capacity() -> usize {
    1000
}

const fn default_channel_send_timeout_secs() -> u64 {
    10
}

const fn default_channel_retry_attempts() -> u32 {
    3
}

const fn default_probe_timeout_secs() -> u64 {
    5
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            max_concurrent_operations: default_max_concurrent_operations(),
            operation_timeout_secs: default_operation_timeout_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            shutdown_grace_period_secs: default_shutdown_grace_period_secs(),
            notification_ring_capacity: default_notification_ring_capacity(),
            channel_send_timeout_secs: default_channel_send_timeout_secs(),
            channel_retry_attempts: default_channel_retry_attempts(),
            probe_timeout_secs: default_probe_timeout_secs(),
            executor_queue_bound: None,
            queue_full_policy: QueueFullPolicy::default(),
            bandwidth_limit_bytes_per_sec: None,
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
            content_types: vec![],
        }
    }
}

impl ServiceConfig {
    /// Per-operation timeout as a [`Duration`].
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Health check cadence as a [`Duration`].
    pub const fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    /// Shutdown grace period as a [`Duration`].
    pub const fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }

    /// Per-channel send timeout as a [`Duration`].
    pub const fn channel_send_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_send_timeout_secs)
    }

    /// Per-probe timeout as a [`Duration`].
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Validate the whole configuration. Failures are fatal at service
    /// start.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.service_name.trim().is_empty() {
            return Err(SyncError::MissingField("service_name".to_string()));
        }
        if !(1..=20).contains(&self.max_concurrent_operations) {
            return Err(SyncError::InvalidConfig(format!(
                "max_concurrent_operations must be 1-20, got {}",
                self.max_concurrent_operations
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(SyncError::InvalidConfig(format!(
                "logging.level must be one of {valid_levels:?}, got '{}'",
                self.logging.level
            )));
        }
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(SyncError::InvalidConfig(format!(
                "logging.format must be one of {valid_formats:?}, got '{}'",
                self.logging.format
            )));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&self.logging.rotation.as_str()) {
            return Err(SyncError::InvalidConfig(format!(
                "logging.rotation must be one of {valid_rotations:?}, got '{}'",
                self.logging.rotation
            )));
        }

        self.retry.to_policy().validate()?;

        let mut seen = std::collections::HashSet::new();
        for content_type in &self.content_types {
            content_type.validate()?;
            if !seen.insert(content_type.name.as_str()) {
                return Err(SyncError::InvalidConfig(format!(
                    "duplicate content type name '{}'",
                    content_type.name
                )));
            }
            if let Some(schedule) = &content_type.schedule {
                let normalized = if schedule.split_whitespace().count() == 5 {
                    format!("0 {schedule}")
                } else {
                    schedule.clone()
                };
                cron::Schedule::from_str(&normalized).map_err(|parse_error| {
                    SyncError::InvalidCron {
                        expression: schedule.clone(),
                        reason: parse_error.to_string(),
                    }
                })?;
            }
        }
        Ok(())
    }
}

/// Behavior of `submit` when a bounded executor queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueFullPolicy {
    /// Suspend the caller until a queue slot frees
    #[default]
    Wait,
    /// Fail immediately with a queue-full error
    Reject,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; absent means stdout only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// File rotation policy: daily, hourly, never
    #[serde(default = "default_log_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_log_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_log_rotation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_documented_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.max_concurrent_operations, 5);
        assert_eq!(config.operation_timeout(), Duration::from_secs(1800));
        assert_eq!(config.health_check_interval(), Duration::from_secs(300));
        assert_eq!(config.shutdown_grace_period(), Duration::from_secs(30));
        assert_eq!(config.notification_ring_capacity, 1000);
        assert_eq!(config.channel_send_timeout(), Duration::from_secs(10));
        assert_eq!(config.channel_retry_attempts, 3);
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
        assert!(config.executor_queue_bound.is_none());
        assert_eq!(config.queue_full_policy, QueueFullPolicy::Wait);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: ServiceConfig =
            serde_yaml::from_str("max_concurrent_operations: 2\n").expect("parse");
        assert_eq!(config.max_concurrent_operations, 2);
        assert_eq!(config.notification_ring_capacity, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_queue_full_policy_snake_case() {
        let config: ServiceConfig =
            serde_yaml::from_str("queue_full_policy: reject\n").expect("parse");
        assert_eq!(config.queue_full_policy, QueueFullPolicy::Reject);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(ServiceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_pool_out_of_range() {
        for size in [0usize, 21] {
            let config = ServiceConfig {
                max_concurrent_operations: size,
                ..ServiceConfig::default()
            };
            assert!(config.validate().is_err(), "size {size} should be rejected");
        }
    }

    #[test]
    fn test_validate_rejects_duplicate_content_types() {
        let yaml = r"
content_types:
  - name: movies
    local_path: /data/movies
    max_size_bytes: 100
  - name: movies
    local_path: /data/other
    max_size_bytes: 100
";
        let config: ServiceConfig = serde_yaml::from_str(yaml).expect("parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_path_traversal() {
        let yaml = r"
content_types:
  - name: sneaky
    local_path: /data/../../etc
    max_size_bytes: 100
";
        let config: ServiceConfig = serde_yaml::from_str(yaml).expect("parse");
        assert!(matches!(
            config.validate(),
            Err(crate::domain::error::SyncError::PathTraversal(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_schedule() {
        let yaml = r"
content_types:
  - name: movies
    local_path: /data/movies
    max_size_bytes: 100
    schedule: 'every day at noon'
";
        let config: ServiceConfig = serde_yaml::from_str(yaml).expect("parse");
        assert!(matches!(
            config.validate(),
            Err(crate::domain::error::SyncError::InvalidCron { .. })
        ));
    }
}
