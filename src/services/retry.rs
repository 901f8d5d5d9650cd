//! Retry engine: delay computation and retrying execution of operations.
//!
//! Delays grow per the policy's strategy, are capped, then jittered.
//! Decorrelated jitter carries the previous delay as state; that state is
//! reset at the start of every execution.

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::error::{SyncError, SyncResult};
use crate::domain::models::retry::{BackoffStrategy, Jitter, RetryPolicy};

/// Record of a single failed attempt.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// One-indexed attempt number
    pub attempt: u32,
    /// Error message from this attempt
    pub error: String,
    /// Delay applied before the next attempt; zero when none followed
    pub delay: Duration,
}

/// Result of a successful retry-enabled execution.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The successfully produced value
    pub value: T,
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Wall-clock time spanning all attempts
    pub total_elapsed: Duration,
    /// Records of each failed attempt that preceded success
    pub failed_attempts: Vec<AttemptRecord>,
}

/// Result of an exhausted or aborted retry-enabled execution.
#[derive(Debug)]
pub struct RetryError {
    /// The last error observed
    pub error: SyncError,
    /// Attempts made before giving up
    pub attempts: u32,
    /// Wall-clock time spanning all attempts
    pub total_elapsed: Duration,
    /// Records of every failed attempt
    pub failed_attempts: Vec<AttemptRecord>,
    /// True when the attempt budget ran out (as opposed to a
    /// non-retryable error, cancellation, or the wall-clock budget)
    pub exhausted: bool,
}

impl std::fmt::Display for RetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (after {} attempt(s) in {:?})",
            self.error, self.attempts, self.total_elapsed
        )
    }
}

impl std::error::Error for RetryError {}

/// Compute the delay after `attempt` failures under `policy`.
///
/// `attempt` is one-indexed; `previous` is the delay applied after the
/// prior failure, used only by decorrelated jitter. The result is rounded
/// to whole milliseconds and never exceeds the policy cap.
pub fn compute_delay(policy: &RetryPolicy, attempt: u32, previous: Option<Duration>) -> Duration {
    compute_delay_with(policy, attempt, previous, &mut rand::rng())
}

/// [`compute_delay`] with an injected RNG, for deterministic tests.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn compute_delay_with<R: Rng>(
    policy: &RetryPolicy,
    attempt: u32,
    previous: Option<Duration>,
    rng: &mut R,
) -> Duration {
    let base_ms = policy.base_delay.as_millis() as f64;
    let raw_ms = match policy.strategy {
        BackoffStrategy::Fixed => base_ms,
        BackoffStrategy::Linear => {
            base_ms * (1.0 + f64::from(attempt.saturating_sub(1)) * (policy.multiplier - 1.0))
        }
        BackoffStrategy::Exponential => {
            base_ms * policy.multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX) - 1)
        }
    };

    let cap_ms = policy.max_delay.map(|m| m.as_millis() as f64);
    let capped_ms = cap_ms.map_or(raw_ms, |cap| raw_ms.min(cap));

    let jittered_ms = match policy.jitter {
        Jitter::None => capped_ms,
        Jitter::Full => {
            if capped_ms > 0.0 {
                rng.random_range(0.0..=capped_ms)
            } else {
                0.0
            }
        }
        Jitter::Equal => {
            let half = capped_ms / 2.0;
            if half > 0.0 {
                half + rng.random_range(0.0..=half)
            } else {
                0.0
            }
        }
        Jitter::Decorrelated => {
            let drawn = previous.map_or(base_ms, |prev| {
                let hi = (3.0 * prev.as_millis() as f64).max(base_ms);
                if hi > base_ms {
                    rng.random_range(base_ms..=hi)
                } else {
                    base_ms
                }
            });
            // Decorrelated draws can exceed the growth cap; re-apply it.
            cap_ms.map_or(drawn, |cap| drawn.min(cap))
        }
    };

    Duration::from_millis(jittered_ms.round().max(0.0) as u64)
}

/// Callback invoked exactly once when the attempt budget is exhausted.
pub type ExhaustionCallback = Arc<dyn Fn(&SyncError, u32) + Send + Sync>;

/// Executes operations under a retry policy.
#[derive(Clone)]
pub struct RetryEngine {
    policy: RetryPolicy,
    on_exhausted: Option<ExhaustionCallback>,
}

impl RetryEngine {
    /// Create an engine for the given policy.
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            on_exhausted: None,
        }
    }

    /// Register a callback fired once when retries are exhausted.
    #[must_use]
    pub fn with_exhaustion_callback(
        mut self,
        callback: impl Fn(&SyncError, u32) + Send + Sync + 'static,
    ) -> Self {
        self.on_exhausted = Some(Arc::new(callback));
        self
    }

    /// The policy this engine runs under.
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Whether another attempt would follow `error` at one-indexed
    /// `attempt`.
    pub fn should_retry(&self, error: &SyncError, attempt: u32) -> bool {
        attempt < self.policy.max_attempts && self.policy.retryable(error)
    }

    /// Execute `operation` to success or exhaustion.
    ///
    /// The factory receives the one-indexed attempt number and produces the
    /// attempt future. Cancellation aborts both waits and the in-flight
    /// attempt and is returned as [`SyncError::Canceled`], never retried.
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<RetryOutcome<T>, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let started = Instant::now();
        let mut failed_attempts: Vec<AttemptRecord> = Vec::new();
        let mut previous_delay: Option<Duration> = None;

        // A zero-attempt policy is rejected by validation; degrade to one
        // attempt rather than panic if one slips through.
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(self.abort(SyncError::Canceled, attempt - 1, started, failed_attempts));
            }

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(SyncError::Canceled),
                result = operation(attempt) => result,
            };

            let error = match result {
                Ok(value) => {
                    return Ok(RetryOutcome {
                        value,
                        attempts: attempt,
                        total_elapsed: started.elapsed(),
                        failed_attempts,
                    });
                }
                Err(error) => error,
            };

            if matches!(error, SyncError::Canceled) {
                return Err(self.abort(error, attempt, started, failed_attempts));
            }

            if !self.policy.retryable(&error) {
                debug!(attempt, error = %error, "error not retryable, giving up");
                failed_attempts.push(AttemptRecord {
                    attempt,
                    error: error.to_string(),
                    delay: Duration::ZERO,
                });
                return Err(self.abort(error, attempt, started, failed_attempts));
            }

            if attempt == max_attempts {
                warn!(
                    attempts = attempt,
                    error = %error,
                    "retry attempts exhausted"
                );
                failed_attempts.push(AttemptRecord {
                    attempt,
                    error: error.to_string(),
                    delay: Duration::ZERO,
                });
                if let Some(callback) = &self.on_exhausted {
                    callback(&error, attempt);
                }
                return Err(RetryError {
                    error,
                    attempts: attempt,
                    total_elapsed: started.elapsed(),
                    failed_attempts,
                    exhausted: true,
                });
            }

            let delay = compute_delay(&self.policy, attempt, previous_delay);
            previous_delay = Some(delay);
            failed_attempts.push(AttemptRecord {
                attempt,
                error: error.to_string(),
                delay,
            });
            debug!(attempt, ?delay, error = %error, "retrying after delay");

            // The wall-clock budget trims or aborts the wait, never an
            // in-flight attempt.
            let wait = match self.policy.max_total_time {
                Some(budget) => {
                    let remaining = budget.saturating_sub(started.elapsed());
                    if remaining.is_zero() {
                        return Err(self.abort(error, attempt, started, failed_attempts));
                    }
                    if delay > remaining {
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => {
                                return Err(self.abort(
                                    SyncError::Canceled,
                                    attempt,
                                    started,
                                    failed_attempts,
                                ));
                            }
                            () = tokio::time::sleep(remaining) => {}
                        }
                        return Err(self.abort(error, attempt, started, failed_attempts));
                    }
                    delay
                }
                None => delay,
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(self.abort(SyncError::Canceled, attempt, started, failed_attempts));
                }
                () = tokio::time::sleep(wait) => {}
            }
        }

        unreachable!("loop returns on success, exhaustion, or abort")
    }

    fn abort(
        &self,
        error: SyncError,
        attempts: u32,
        started: Instant,
        failed_attempts: Vec<AttemptRecord>,
    ) -> RetryError {
        RetryError {
            error,
            attempts,
            total_elapsed: started.elapsed(),
            failed_attempts,
            exhausted: false,
        }
    }
}
