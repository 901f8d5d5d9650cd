//! Token bucket byte throttle for bandwidth-capped transfers.
//!
//! Tokens are bytes, refilled continuously from elapsed time. Transferors
//! acquire before each chunk; the wait is cancellable.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::domain::error::{SyncError, SyncResult};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Byte-rate limiter shared by the transfers of one host.
pub struct ByteThrottle {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64,
}

impl ByteThrottle {
    /// Create a throttle sustaining `bytes_per_sec`, with burst capacity
    /// equal to one second of traffic.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(bytes_per_sec: u64) -> Self {
        let rate = (bytes_per_sec.max(1)) as f64;
        Self {
            state: Mutex::new(BucketState {
                tokens: rate,
                last_refill: Instant::now(),
            }),
            capacity: rate,
            refill_rate: rate,
        }
    }

    /// Acquire permission to move `bytes`, waiting for refill as needed.
    ///
    /// Chunks larger than the burst capacity are admitted once the bucket
    /// is full. Returns [`SyncError::Canceled`] if `cancel` fires during
    /// the wait.
    #[allow(clippy::cast_precision_loss)]
    pub async fn acquire(&self, bytes: u64, cancel: &CancellationToken) -> SyncResult<()> {
        let needed = (bytes as f64).min(self.capacity);
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Canceled);
            }

            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= needed {
                    state.tokens -= needed;
                    return Ok(());
                }
                Duration::from_secs_f64((needed - state.tokens) / self.refill_rate)
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(SyncError::Canceled),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Currently available bytes, for monitoring.
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_then_wait() {
        let throttle = ByteThrottle::new(1000);
        let cancel = CancellationToken::new();

        // First acquisition drains the full bucket instantly.
        let started = Instant::now();
        throttle.acquire(1000, &cancel).await.expect("burst");
        assert!(started.elapsed() < Duration::from_millis(50));

        // The next chunk must wait for refill.
        let started = Instant::now();
        throttle.acquire(100, &cancel).await.expect("refill");
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_oversized_chunk_clamped_to_capacity() {
        let throttle = ByteThrottle::new(500);
        let cancel = CancellationToken::new();
        let started = Instant::now();
        throttle.acquire(50_000, &cancel).await.expect("oversized");
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "oversized chunk should only wait for one full bucket"
        );
    }

    #[tokio::test]
    async fn test_cancel_aborts_wait() {
        let throttle = ByteThrottle::new(10);
        let cancel = CancellationToken::new();
        throttle.acquire(10, &cancel).await.expect("drain");

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel_clone.cancel();
        });

        let err = throttle.acquire(10, &cancel).await.expect_err("canceled");
        assert_eq!(err, SyncError::Canceled);
    }
}
