//! Health report model and the aggregation rule over component results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Aggregated service health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// All components up
    Healthy,
    /// A non-critical component is down, or any component is degraded
    Degraded,
    /// A critical component is down
    Unhealthy,
    /// No check has completed yet
    Unknown,
}

impl HealthStatus {
    /// Stable lowercase name for logs and notifications.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

/// Health of a single registered component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    /// Probe succeeded
    Up,
    /// Probe succeeded but reported reduced capability
    Degraded,
    /// Probe failed, timed out, or reported down
    Down,
}

/// What a probe reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// Component status
    pub status: ComponentStatus,
    /// Optional human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Optional structured detail, opaque to the runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ProbeOutcome {
    /// An `Up` outcome with no detail.
    pub const fn up() -> Self {
        Self {
            status: ComponentStatus::Up,
            message: None,
            details: None,
        }
    }

    /// A `Degraded` outcome with a reason.
    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message.into()),
            details: None,
        }
    }

    /// A `Down` outcome with a reason.
    pub fn down(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Down,
            message: Some(message.into()),
            details: None,
        }
    }
}

/// One component's entry in a health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Registered component name
    pub name: String,
    /// Probe result
    pub status: ComponentStatus,
    /// Whether this component alone can make the service unhealthy
    pub critical: bool,
    /// When the probe ran
    pub last_checked: DateTime<Utc>,
    /// How long the probe took, in milliseconds
    pub duration_ms: u64,
    /// Probe-supplied detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error text when the probe failed or timed out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A full health snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Aggregated status per the ordered rule
    pub overall: HealthStatus,
    /// Per-component results in registration order
    pub components: Vec<ComponentHealth>,
    /// Seconds since the aggregator was constructed
    pub uptime_secs: u64,
    /// When the report was generated
    pub generated_at: DateTime<Utc>,
    /// Errors from down components
    pub errors: Vec<String>,
    /// Messages from degraded components
    pub warnings: Vec<String>,
}

impl HealthReport {
    /// Apply the aggregation rule to per-component results.
    ///
    /// First match wins: critical down → unhealthy; any down → degraded;
    /// any degraded → degraded; otherwise healthy. Zero components is
    /// healthy.
    pub fn aggregate(components: &[ComponentHealth]) -> HealthStatus {
        if components
            .iter()
            .any(|c| c.critical && c.status == ComponentStatus::Down)
        {
            return HealthStatus::Unhealthy;
        }
        if components.iter().any(|c| c.status == ComponentStatus::Down) {
            return HealthStatus::Degraded;
        }
        if components
            .iter()
            .any(|c| c.status == ComponentStatus::Degraded)
        {
            return HealthStatus::Degraded;
        }
        HealthStatus::Healthy
    }
}

/// Rolling counters kept by the aggregator across checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// Checks performed since construction
    pub total_checks: u64,
    /// Checks whose overall was healthy
    pub healthy_checks: u64,
    /// Checks whose overall was degraded
    pub degraded_checks: u64,
    /// Checks whose overall was unhealthy
    pub unhealthy_checks: u64,
    /// Mean wall-clock duration of a full check, in milliseconds
    pub mean_duration_ms: f64,
    /// How many consecutive checks returned the current overall status
    pub consecutive_same_status: u64,
    /// When the overall status last changed
    pub last_status_change: Option<DateTime<Utc>>,
}

/// Convert a probe duration to the millisecond field used in reports.
pub fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
