//! Transferor port: moves the bytes for one planned transfer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::domain::error::SyncResult;
use crate::domain::models::transfer::PlannedTransfer;
use crate::services::progress::ProgressTracker;
use crate::services::throttle::ByteThrottle;

/// Everything the runtime hands a transferor for one planned transfer.
#[derive(Clone)]
pub struct TransferContext {
    /// Signal observed at every suspension point
    pub cancel: CancellationToken,
    /// Tracker the transferor must drive as bytes move
    pub tracker: Arc<ProgressTracker>,
    /// Byte throttle to acquire before each chunk, when bandwidth is capped
    pub throttle: Option<Arc<ByteThrottle>>,
}

/// What a completed transfer reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Bytes actually written to the destination
    pub bytes_written: u64,
    /// Content digest, when the transferor verified one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Agent-supplied capability composing a source and a destination into a
/// runnable unit for one planned transfer.
///
/// Implementations must drive `ctx.tracker` and honor `ctx.cancel` at every
/// suspension point; the runtime supplies retry, timeout, and notification
/// around the call.
#[async_trait]
pub trait Transferor: Send + Sync {
    /// Execute one planned transfer.
    async fn transfer(
        &self,
        planned: &PlannedTransfer,
        ctx: &TransferContext,
    ) -> SyncResult<TransferReceipt>;
}
