//! Progress value types emitted by trackers to their listeners.
//!
//! Snapshots are owned copies; listeners must treat them as immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// Tracker constructed, `start` not yet called
    NotStarted,
    /// Between `start` and a terminal transition
    InProgress,
    /// Updates suspended; `resume` continues
    Paused,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Canceled before completion
    Canceled,
}

impl ProgressStatus {
    /// Whether this status is absorbing.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Stable lowercase name for logs and status output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

/// Counters and derived rates for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMetrics {
    /// Item total, 0 when unknown
    pub total_items: u64,
    /// Items finished so far
    pub completed_items: u64,
    /// Byte total, 0 when unknown
    pub total_bytes: u64,
    /// Bytes finished so far
    pub processed_bytes: u64,
    /// Short-window throughput (items/s, or bytes/s when only byte totals
    /// are known)
    pub instantaneous_rate: f64,
    /// Cumulative throughput since `start`
    pub average_rate: f64,
    /// Estimated seconds remaining; `None` until the average rate is
    /// positive
    pub eta_seconds: Option<f64>,
    /// Seconds since `start`, excluding nothing (pauses count)
    pub elapsed_seconds: f64,
    /// When `start` was called
    pub started_at: Option<DateTime<Utc>>,
    /// When the last accepted update happened
    pub last_update_at: Option<DateTime<Utc>>,
}

impl Default for ProgressMetrics {
    fn default() -> Self {
        Self {
            total_items: 0,
            completed_items: 0,
            total_bytes: 0,
            processed_bytes: 0,
            instantaneous_rate: 0.0,
            average_rate: 0.0,
            eta_seconds: None,
            elapsed_seconds: 0.0,
            started_at: None,
            last_update_at: None,
        }
    }
}

/// Point-in-time view of one operation's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Operation this snapshot belongs to
    pub operation_id: Uuid,
    /// Current status
    pub status: ProgressStatus,
    /// Overall completion in `[0, 100]`, monotone across accepted updates
    pub progress_percent: f64,
    /// Name of the active phase, when phases are configured
    pub current_phase: Option<String>,
    /// Counters and rates
    pub metrics: ProgressMetrics,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Free-form detail (current item, failure reason)
    pub message: Option<String>,
}

/// Status of a configured phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Not yet entered
    Pending,
    /// Currently active
    Active,
    /// Finished
    Completed,
}

/// A weighted sub-step of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Identifier used by `set_phase` / `update_phase_progress`
    pub id: String,
    /// Display name
    pub name: String,
    /// Relative weight in the overall percentage (> 0)
    pub weight: f64,
    /// Current status
    pub status: PhaseStatus,
    /// Phase-local completion in `[0, 100]`
    pub progress: f64,
    /// When the phase became active
    pub started_at: Option<DateTime<Utc>>,
    /// When the phase completed
    pub finished_at: Option<DateTime<Utc>>,
}

impl Phase {
    /// Define a phase with the given weight.
    pub fn new(id: impl Into<String>, name: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            weight,
            status: PhaseStatus::Pending,
            progress: 0.0,
            started_at: None,
            finished_at: None,
        }
    }
}
