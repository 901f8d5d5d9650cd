//! Notification event model and delivery bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Severity of a notification event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    /// Diagnostic chatter
    Debug,
    /// Routine lifecycle information
    Info,
    /// Something degraded but the service continues
    Warn,
    /// An operation or component failed
    Error,
    /// Data integrity is in question or the service cannot continue
    Critical,
}

impl std::fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Well-known event type tags emitted by the runtime itself.
///
/// Agents are free to emit their own tags; these are the ones the runtime
/// produces and tests assert on.
pub mod event_types {
    /// Host finished `start()`
    pub const SERVICE_STARTED: &str = "service_started";
    /// Host finished `stop()`
    pub const SERVICE_STOPPED: &str = "service_stopped";
    /// Host hit a fatal error during start or runtime
    pub const SERVICE_ERROR: &str = "service_error";
    /// Executor accepted an operation
    pub const OPERATION_STARTED: &str = "operation_started";
    /// Operation reached `completed`
    pub const OPERATION_COMPLETED: &str = "operation_completed";
    /// Operation reached `failed`
    pub const OPERATION_FAILED: &str = "operation_failed";
    /// Aggregated health status changed
    pub const HEALTH_STATUS_CHANGED: &str = "health_status_changed";
}

/// An immutable notification record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Unique event id
    pub id: Uuid,
    /// Type tag; see [`event_types`] for runtime-emitted values
    pub event_type: String,
    /// Severity
    pub level: NotificationLevel,
    /// Emitting component or agent name
    pub source: String,
    /// Human-readable message
    pub message: String,
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
    /// Free-form labels for filtering
    #[serde(default)]
    pub tags: Vec<String>,
    /// Error detail when the event reports a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Opaque caller-defined metadata; the runtime never inspects values
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

/// Delivery state of an event on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Not yet attempted
    Pending,
    /// Accepted by the channel
    Delivered,
    /// Gave up after retries or timeout
    Failed,
    /// Between failed attempts
    Retrying,
}

/// Outcome of delivering one event to one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDelivery {
    /// Channel name
    pub channel: String,
    /// Final state after all attempts settled
    pub state: DeliveryState,
    /// Send attempts made
    pub attempts: u32,
    /// Error from the last failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An emitted event together with its per-channel delivery results.
#[derive(Debug, Clone)]
pub struct EmitResult {
    /// The event as recorded in the ring buffer
    pub event: NotificationEvent,
    /// One entry per channel the emission targeted
    pub deliveries: Vec<ChannelDelivery>,
}

impl EmitResult {
    /// True when at least one channel accepted the event.
    pub fn delivered_anywhere(&self) -> bool {
        self.deliveries
            .iter()
            .any(|d| d.state == DeliveryState::Delivered)
    }
}

/// Criteria for querying recent events.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    /// Restrict to these type tags
    pub types: Option<Vec<String>>,
    /// Restrict to these levels
    pub levels: Option<Vec<NotificationLevel>>,
    /// Restrict to these sources
    pub sources: Option<Vec<String>>,
    /// Only events at or after this instant
    pub since: Option<DateTime<Utc>>,
}

impl NotificationFilter {
    /// Whether `event` satisfies every populated criterion.
    pub fn matches(&self, event: &NotificationEvent) -> bool {
        if let Some(types) = &self.types {
            if !types.iter().any(|t| t == &event.event_type) {
                return false;
            }
        }
        if let Some(levels) = &self.levels {
            if !levels.contains(&event.level) {
                return false;
            }
        }
        if let Some(sources) = &self.sources {
            if !sources.iter().any(|s| s == &event.source) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, level: NotificationLevel, source: &str) -> NotificationEvent {
        NotificationEvent {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            level,
            source: source.to_string(),
            message: "m".to_string(),
            timestamp: Utc::now(),
            tags: vec![],
            error: None,
            data: HashMap::new(),
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = NotificationFilter::default();
        assert!(filter.matches(&event("x", NotificationLevel::Debug, "s")));
    }

    #[test]
    fn test_filter_by_level_and_type() {
        let filter = NotificationFilter {
            types: Some(vec![event_types::OPERATION_FAILED.to_string()]),
            levels: Some(vec![NotificationLevel::Error, NotificationLevel::Critical]),
            ..NotificationFilter::default()
        };
        assert!(filter.matches(&event(
            event_types::OPERATION_FAILED,
            NotificationLevel::Error,
            "executor"
        )));
        assert!(!filter.matches(&event(
            event_types::OPERATION_FAILED,
            NotificationLevel::Info,
            "executor"
        )));
        assert!(!filter.matches(&event(
            event_types::OPERATION_COMPLETED,
            NotificationLevel::Error,
            "executor"
        )));
    }

    #[test]
    fn test_filter_since_boundary_is_inclusive() {
        let now = Utc::now();
        let mut e = event("x", NotificationLevel::Info, "s");
        e.timestamp = now;
        let filter = NotificationFilter {
            since: Some(now),
            ..NotificationFilter::default()
        };
        assert!(filter.matches(&e));
    }

    #[test]
    fn test_level_ordering() {
        assert!(NotificationLevel::Critical > NotificationLevel::Error);
        assert!(NotificationLevel::Error > NotificationLevel::Warn);
        assert!(NotificationLevel::Warn > NotificationLevel::Info);
        assert!(NotificationLevel::Info > NotificationLevel::Debug);
    }
}
