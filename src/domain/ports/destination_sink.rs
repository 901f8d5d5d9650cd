//! Destination sink port: where transferred bytes land.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::source_provider::ByteStream;
use crate::domain::error::SyncResult;

/// Agent-supplied capability that stores transferred items.
#[async_trait]
pub trait DestinationSink: Send + Sync {
    /// Write a byte stream under the given reference, returning bytes
    /// written. Implementations observe `cancel` before each write syscall.
    async fn write(
        &self,
        destination_ref: &str,
        stream: ByteStream,
        cancel: &CancellationToken,
    ) -> SyncResult<u64>;

    /// Whether an item already exists at the reference.
    async fn exists(&self, destination_ref: &str, cancel: &CancellationToken) -> SyncResult<bool>;

    /// Remove the item at the reference.
    async fn delete(&self, destination_ref: &str, cancel: &CancellationToken) -> SyncResult<()>;
}
