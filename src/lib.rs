//! Packmule - sync service runtime
//!
//! The runtime behind a family of content synchronization agents (media
//! sync, removable-media sync, catalog downloads) on constrained
//! appliances:
//! - Service lifecycle and supervision with graceful shutdown
//! - Scheduled, retryable, progress-tracked operation execution
//! - Content-type-driven transfer planning under storage budgets
//! - Retry with backoff and jitter, cancellation, notification fan-out
//! - Health aggregation across agent-registered probes

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::error::{ErrorClass, SyncError, SyncResult};
pub use domain::models::config::ServiceConfig;
pub use domain::ports::sync_agent::SyncAgent;
pub use services::host::{ServiceState, SyncServiceHost};
