//! Sync agent port: what an application plugs into the host.

use async_trait::async_trait;
use std::sync::Arc;

use super::source_provider::SourceProvider;
use super::transferor::Transferor;
use crate::domain::error::SyncResult;
use crate::services::host::RuntimeHandle;

/// A sync application built on the runtime.
///
/// The host owns the executor, scheduler, notification hub, and health
/// aggregator; agents register their probes, channels, and extra scheduled
/// tasks through the [`RuntimeHandle`] during `initialize` instead of
/// creating their own.
#[async_trait]
pub trait SyncAgent: Send + Sync {
    /// Agent name, used as the notification source for agent events.
    fn name(&self) -> &str;

    /// The provider the planner enumerates from.
    fn source_provider(&self) -> Arc<dyn SourceProvider>;

    /// The transferor that executes planned transfers.
    fn transferor(&self) -> Arc<dyn Transferor>;

    /// Register probes, channels, and scheduled tasks. Called once during
    /// host `start()`; an error here fails startup.
    async fn initialize(&self, runtime: &RuntimeHandle) -> SyncResult<()>;

    /// Release agent resources. Called once during host `stop()`, after
    /// in-flight operations have drained or been canceled.
    async fn shutdown(&self) -> SyncResult<()> {
        Ok(())
    }
}
