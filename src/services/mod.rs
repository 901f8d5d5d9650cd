//! Runtime services: the components every sync agent runs on.

pub mod executor;
pub mod health;
pub mod host;
pub mod notification_hub;
pub mod planner;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod throttle;

pub use executor::{
    BatchItemResult, BatchOptions, ExecutorConfig, ExecutorStats, OperationContext,
    OperationExecutor, OperationFailure, OperationHandle, OperationOutcome, SubmitOptions,
};
pub use health::{HealthAggregator, HealthAggregatorConfig};
pub use host::{RuntimeHandle, ServiceState, SyncRunSummary, SyncServiceHost};
pub use notification_hub::{EmitOptions, NotificationHub, NotificationHubConfig};
pub use planner::TransferPlanner;
pub use progress::{ListenerId, ProgressConfig, ProgressListener, ProgressTracker};
pub use retry::{AttemptRecord, RetryEngine, RetryError, RetryOutcome};
pub use scheduler::{ScheduleOptions, Scheduler, SchedulerConfig, TaskFn, TaskStatus};
pub use throttle::ByteThrottle;
