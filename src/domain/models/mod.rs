//! Domain models for the packmule sync runtime.

pub mod config;
pub mod content_type;
pub mod health;
pub mod notification;
pub mod operation;
pub mod progress;
pub mod retry;
pub mod transfer;

pub use config::{LoggingConfig, QueueFullPolicy, ServiceConfig};
pub use content_type::{ContentType, FilterRule, PriorityRule, SyncDirection};
pub use health::{
    ComponentHealth, ComponentStatus, HealthMetrics, HealthReport, HealthStatus, ProbeOutcome,
};
pub use notification::{
    event_types, ChannelDelivery, DeliveryState, EmitResult, NotificationEvent,
    NotificationFilter, NotificationLevel,
};
pub use operation::{Operation, OperationKind, OperationStatus};
pub use progress::{Phase, PhaseStatus, ProgressMetrics, ProgressSnapshot, ProgressStatus};
pub use retry::{BackoffStrategy, Jitter, RetryConfig, RetryPolicy, RetryPredicate};
pub use transfer::{ItemMetadata, PlanWarning, PlannedTransfer, SourceItem, TransferPlan};
