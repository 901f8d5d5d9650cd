//! Operation model: the unit of work run by the executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Category tag for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Moves bytes for one planned transfer
    Transfer,
    /// Enumerates and plans a content type
    Planning,
    /// Housekeeping work (cleanup, pruning, verification)
    Maintenance,
    /// Agent-defined work the runtime does not interpret
    Custom(String),
}

impl OperationKind {
    /// Stable lowercase name for logs and notifications.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Transfer => "transfer",
            Self::Planning => "planning",
            Self::Maintenance => "maintenance",
            Self::Custom(name) => name,
        }
    }
}

/// Lifecycle state of an operation, as tracked by the executor.
///
/// Terminal states are absorbing; the executor never transitions an
/// operation out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Accepted, waiting for a pool slot
    Queued,
    /// Holding a pool slot, runner in flight
    Running,
    /// Runner finished successfully
    Completed,
    /// Runner failed after retry exhaustion or a non-retryable error
    Failed,
    /// Canceled before completion
    Canceled,
}

impl OperationStatus {
    /// Whether this state is terminal.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

/// Descriptor for a unit of work submitted to the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Process-unique identifier, also the log correlation id
    pub id: Uuid,
    /// Human-readable name
    pub name: String,
    /// Category tag
    pub kind: OperationKind,
    /// Ordering hint; lower runs earlier when queued together
    pub priority: i32,
    /// Per-operation ceiling overriding the service default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Opaque agent payload; the runtime never inspects it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// When the descriptor was created
    pub created_at: DateTime<Utc>,
}

impl Operation {
    /// Create an operation descriptor with a fresh id.
    pub fn new(name: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            priority: 0,
            timeout_secs: None,
            payload: None,
            created_at: Utc::now(),
        }
    }

    /// Set the ordering priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set a per-operation timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Attach an opaque payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Per-operation timeout as a [`Duration`], if set.
    pub const fn timeout(&self) -> Option<Duration> {
        match self.timeout_secs {
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        }
    }
}
