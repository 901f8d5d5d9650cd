//! Notification channel port.

use async_trait::async_trait;

use crate::domain::error::SyncResult;
use crate::domain::models::notification::NotificationEvent;

/// Agent-supplied delivery channel for notification events.
///
/// The hub owns timeout and retry; a channel only needs to attempt one
/// send and report the result.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name, unique within the hub.
    fn name(&self) -> &str;

    /// Whether the channel can currently accept events.
    fn available(&self) -> bool;

    /// Deliver one event.
    async fn send(&self, event: &NotificationEvent) -> SyncResult<()>;

    /// Release channel resources; called once when the hub closes.
    async fn close(&self) -> SyncResult<()> {
        Ok(())
    }
}
