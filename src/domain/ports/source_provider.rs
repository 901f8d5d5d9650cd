//! Source provider port: enumerates and fetches items for a content type.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::domain::error::SyncResult;
use crate::domain::models::content_type::ContentType;
use crate::domain::models::transfer::SourceItem;

/// Chunked byte stream produced by `fetch`.
pub type ByteStream = BoxStream<'static, SyncResult<Vec<u8>>>;

/// Lazy item sequence produced by `enumerate`.
///
/// Finite and non-restartable per call; a mid-stream error terminates the
/// sequence and the planner records the enumeration as partial.
pub type ItemStream = BoxStream<'static, SyncResult<SourceItem>>;

/// Agent-supplied capability that enumerates and fetches source items.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Provider name for logs and warnings.
    fn name(&self) -> &str;

    /// Enumerate candidate items for one content type.
    ///
    /// Implementations observe `cancel` before each underlying I/O call and
    /// at the start of each batch iteration.
    async fn enumerate(
        &self,
        content_type: &ContentType,
        cancel: &CancellationToken,
    ) -> SyncResult<ItemStream>;

    /// Open a byte stream for a previously enumerated item.
    async fn fetch(&self, source_ref: &str, cancel: &CancellationToken)
        -> SyncResult<ByteStream>;
}
