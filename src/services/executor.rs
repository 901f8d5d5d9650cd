//! Operation executor: a bounded-concurrency pool that wraps every runner
//! with retry, progress tracking, cancellation, and notifications.
//!
//! Submissions past pool capacity queue FIFO. With a bounded queue the
//! configured policy decides between suspending the caller and failing
//! fast with a queue-full error.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::error::{SyncError, SyncResult};
use crate::domain::models::config::QueueFullPolicy;
use crate::domain::models::notification::{event_types, NotificationLevel};
use crate::domain::models::operation::{Operation, OperationStatus};
use crate::domain::models::progress::ProgressSnapshot;
use crate::domain::models::retry::RetryPolicy;
use crate::services::notification_hub::{EmitOptions, NotificationHub};
use crate::services::progress::{ProgressConfig, ProgressTracker};
use crate::services::retry::RetryEngine;

/// Size of the rolling duration window behind the percentile stats.
const STATS_WINDOW: usize = 1000;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Pool size: maximum concurrently running runners
    pub max_concurrent: usize,
    /// Default per-operation ceiling; an [`Operation`] can override it
    pub default_timeout: Option<Duration>,
    /// Bound on admitted-but-unfinished operations beyond the pool;
    /// `None` means unbounded
    pub queue_bound: Option<usize>,
    /// What `submit` does when the bounded queue is full
    pub queue_full_policy: QueueFullPolicy,
    /// Retry policy used when a submission does not carry its own
    pub default_retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            default_timeout: Some(Duration::from_secs(30 * 60)),
            queue_bound: None,
            queue_full_policy: QueueFullPolicy::Wait,
            default_retry: RetryPolicy::default(),
        }
    }
}

/// Per-submission options.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Retry policy for this operation; falls back to the executor default
    pub retry_policy: Option<RetryPolicy>,
    /// Progress totals and phases for this operation
    pub progress: ProgressConfig,
}

/// Context handed to a runner on each attempt.
#[derive(Clone)]
pub struct OperationContext {
    /// Operation id, also the log correlation id
    pub operation_id: Uuid,
    /// One-indexed retry attempt
    pub attempt: u32,
    /// Cancellation signal; observe at every suspension point
    pub cancel: CancellationToken,
    /// Tracker the runner drives
    pub tracker: Arc<ProgressTracker>,
}

/// Success value of an awaited operation.
#[derive(Debug)]
pub struct OperationOutcome<T> {
    /// Runner return value
    pub value: T,
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Wall-clock time from first attempt to success
    pub elapsed: Duration,
}

/// Failure value of an awaited operation.
#[derive(Debug)]
pub struct OperationFailure {
    /// Operation that failed
    pub operation_id: Uuid,
    /// Final error, wrapped with attempt context by the executor
    pub error: SyncError,
    /// Attempts made
    pub attempts: u32,
    /// Wall-clock time spent
    pub elapsed: Duration,
}

impl std::fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "operation {} failed after {} attempt(s) in {:?}: {}",
            self.operation_id, self.attempts, self.elapsed, self.error
        )
    }
}

impl std::error::Error for OperationFailure {}

/// Handle to a submitted operation.
pub struct OperationHandle<T> {
    /// Operation id
    pub id: Uuid,
    cancel: CancellationToken,
    tracker: Arc<ProgressTracker>,
    result: oneshot::Receiver<Result<OperationOutcome<T>, OperationFailure>>,
}

impl<T> std::fmt::Debug for OperationHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle").field("id", &self.id).finish_non_exhaustive()
    }
}

impl<T> OperationHandle<T> {
    /// Signal cancellation; the runner observes it at its next suspension
    /// point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current progress snapshot.
    pub fn current_progress(&self) -> ProgressSnapshot {
        self.tracker.snapshot()
    }

    /// Wait for the operation to finish.
    pub async fn await_result(self) -> Result<OperationOutcome<T>, OperationFailure> {
        let id = self.id;
        self.result.await.unwrap_or_else(|_| {
            Err(OperationFailure {
                operation_id: id,
                error: SyncError::Canceled,
                attempts: 0,
                elapsed: Duration::ZERO,
            })
        })
    }
}

/// Options for `execute_batch`.
#[derive(Clone, Default)]
pub struct BatchOptions {
    /// Concurrent items; clamped to the pool size
    pub concurrency: Option<usize>,
    /// Listener attached to the batch-level progress tracker
    pub on_progress: Option<Arc<dyn crate::services::progress::ProgressListener>>,
}

/// Per-item result of `execute_batch`.
#[derive(Debug)]
pub struct BatchItemResult<T> {
    /// Index into the submitted items
    pub index: usize,
    /// Whether the item's runner eventually succeeded
    pub success: bool,
    /// Runner return value on success
    pub value: Option<T>,
    /// Final error on failure
    pub error: Option<SyncError>,
    /// Attempts made
    pub attempts: u32,
    /// Wall-clock time spent on this item
    pub duration: Duration,
}

/// Point-in-time executor statistics.
#[derive(Debug, Clone, Default)]
pub struct ExecutorStats {
    /// Operations admitted over the executor's lifetime
    pub total_operations: u64,
    /// Operations that completed
    pub completed: u64,
    /// Operations that failed
    pub failed: u64,
    /// Operations that were canceled
    pub canceled: u64,
    /// Runners currently holding a pool slot
    pub running: usize,
    /// Operations admitted but not yet running
    pub queued: usize,
    /// failed / (completed + failed) over the lifetime
    pub error_rate: f64,
    /// Mean duration over the rolling window, in milliseconds
    pub avg_duration_ms: f64,
    /// Minimum duration over the rolling window, in milliseconds
    pub min_duration_ms: u64,
    /// Maximum duration over the rolling window, in milliseconds
    pub max_duration_ms: u64,
    /// 95th percentile duration over the rolling window, in milliseconds
    pub p95_duration_ms: u64,
    /// 99th percentile duration over the rolling window, in milliseconds
    pub p99_duration_ms: u64,
}

struct StatsState {
    total: u64,
    completed: u64,
    failed: u64,
    canceled: u64,
    durations: VecDeque<Duration>,
}

struct OperationEntry {
    status: OperationStatus,
    tracker: Arc<ProgressTracker>,
    cancel: CancellationToken,
}

/// Bounded-concurrency operation pool.
pub struct OperationExecutor {
    config: ExecutorConfig,
    hub: Arc<NotificationHub>,
    shutdown: CancellationToken,
    pool: Arc<Semaphore>,
    admission: Option<Arc<Semaphore>>,
    operations: Arc<RwLock<HashMap<Uuid, OperationEntry>>>,
    stats: Arc<Mutex<StatsState>>,
    queued: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl OperationExecutor {
    /// Create an executor reporting through `hub`; `shutdown` is the host's
    /// root cancellation token.
    pub fn new(
        config: ExecutorConfig,
        hub: Arc<NotificationHub>,
        shutdown: CancellationToken,
    ) -> Self {
        let pool = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        let admission = config
            .queue_bound
            .map(|bound| Arc::new(Semaphore::new(bound + config.max_concurrent.max(1))));
        Self {
            config,
            hub,
            shutdown,
            pool,
            admission,
            operations: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(Mutex::new(StatsState {
                total: 0,
                completed: 0,
                failed: 0,
                canceled: 0,
                durations: VecDeque::with_capacity(STATS_WINDOW),
            })),
            queued: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Submit an operation.
    ///
    /// The runner is invoked once per retry attempt with a fresh
    /// [`OperationContext`]. Returns a handle exposing cancellation,
    /// progress, and the awaited result.
    pub async fn submit<T, F, Fut>(
        &self,
        operation: Operation,
        options: SubmitOptions,
        runner: F,
    ) -> SyncResult<OperationHandle<T>>
    where
        T: Send + Sync + 'static,
        F: Fn(OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<T>> + Send,
    {
        if self.shutdown.is_cancelled() {
            return Err(SyncError::NotRunning("stopping".to_string()));
        }

        // Queue admission, before any state is registered.
        let admission_permit = match &self.admission {
            Some(semaphore) => match self.config.queue_full_policy {
                QueueFullPolicy::Reject => Some(
                    Arc::clone(semaphore)
                        .try_acquire_owned()
                        .map_err(|_| SyncError::QueueFull)?,
                ),
                QueueFullPolicy::Wait => {
                    let permit = tokio::select! {
                        biased;
                        () = self.shutdown.cancelled() => {
                            return Err(SyncError::NotRunning("stopping".to_string()));
                        }
                        permit = Arc::clone(semaphore).acquire_owned() => permit,
                    };
                    Some(permit.map_err(|_| SyncError::NotRunning("stopping".to_string()))?)
                }
            },
            None => None,
        };

        let id = operation.id;
        let cancel = self.shutdown.child_token();
        let tracker = Arc::new(ProgressTracker::new(id, options.progress.clone()));
        let policy = options
            .retry_policy
            .unwrap_or_else(|| self.config.default_retry.clone());
        let timeout = operation.timeout().or(self.config.default_timeout);

        self.operations.write().await.insert(
            id,
            OperationEntry {
                status: OperationStatus::Queued,
                tracker: Arc::clone(&tracker),
                cancel: cancel.clone(),
            },
        );
        self.stats.lock().expect("stats lock poisoned").total += 1;
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);

        let (result_tx, result_rx) = oneshot::channel();
        let pool = Arc::clone(&self.pool);
        let hub = Arc::clone(&self.hub);
        let operations = Arc::clone(&self.operations);
        let stats = Arc::clone(&self.stats);
        let queued = Arc::clone(&self.queued);
        let active = Arc::clone(&self.active);
        let drained = Arc::clone(&self.drained);
        let worker_tracker = Arc::clone(&tracker);
        let worker_cancel = cancel.clone();
        let op_name = operation.name.clone();
        let op_kind = operation.kind.clone();

        tokio::spawn(async move {
            // Hold queue admission until the operation fully settles.
            let _admission_permit = admission_permit;
            let started = Instant::now();

            // FIFO pool slot; cancellation while queued resolves the
            // operation as canceled without running it.
            let permit = tokio::select! {
                biased;
                () = worker_cancel.cancelled() => None,
                permit = pool.acquire_owned() => permit.ok(),
            };
            queued.fetch_sub(1, Ordering::SeqCst);

            let outcome: Result<OperationOutcome<T>, OperationFailure> = match permit {
                None => Err(OperationFailure {
                    operation_id: id,
                    error: SyncError::Canceled,
                    attempts: 0,
                    elapsed: started.elapsed(),
                }),
                Some(_permit) => {
                    Self::set_status(&operations, id, OperationStatus::Running).await;
                    worker_tracker.start();
                    hub.emit(
                        event_types::OPERATION_STARTED,
                        format!("{op_name} started"),
                        EmitOptions {
                            level: Some(NotificationLevel::Info),
                            source: Some("executor".to_string()),
                            tags: vec![op_kind.as_str().to_string()],
                            data: operation_data(id),
                            ..EmitOptions::default()
                        },
                    )
                    .await;

                    let engine = RetryEngine::new(policy);
                    let run = engine.execute(&worker_cancel, |attempt| {
                        runner(OperationContext {
                            operation_id: id,
                            attempt,
                            cancel: worker_cancel.clone(),
                            tracker: Arc::clone(&worker_tracker),
                        })
                    });

                    let run_result = match timeout {
                        Some(ceiling) => match tokio::time::timeout(ceiling, run).await {
                            Ok(result) => result,
                            Err(_elapsed) => {
                                // Stop the in-flight runner before recording
                                // the timeout.
                                worker_cancel.cancel();
                                Err(crate::services::retry::RetryError {
                                    error: SyncError::OperationTimeout(ceiling),
                                    attempts: 0,
                                    total_elapsed: started.elapsed(),
                                    failed_attempts: vec![],
                                    exhausted: false,
                                })
                            }
                        },
                        None => run.await,
                    };

                    match run_result {
                        Ok(retry_outcome) => Ok(OperationOutcome {
                            value: retry_outcome.value,
                            attempts: retry_outcome.attempts,
                            elapsed: retry_outcome.total_elapsed,
                        }),
                        Err(retry_error) => Err(OperationFailure {
                            operation_id: id,
                            error: retry_error.error,
                            attempts: retry_error.attempts,
                            elapsed: retry_error.total_elapsed,
                        }),
                    }
                }
            };

            let duration = started.elapsed();
            match &outcome {
                Ok(success) => {
                    worker_tracker.complete();
                    Self::set_status(&operations, id, OperationStatus::Completed).await;
                    {
                        let mut s = stats.lock().expect("stats lock poisoned");
                        s.completed += 1;
                        push_duration(&mut s.durations, duration);
                    }
                    hub.emit(
                        event_types::OPERATION_COMPLETED,
                        format!("{op_name} completed in {duration:?}"),
                        EmitOptions {
                            level: Some(NotificationLevel::Info),
                            source: Some("executor".to_string()),
                            tags: vec![op_kind.as_str().to_string()],
                            data: operation_data_with_attempts(id, success.attempts),
                            ..EmitOptions::default()
                        },
                    )
                    .await;
                }
                Err(failure) => {
                    let canceled = matches!(failure.error, SyncError::Canceled);
                    if canceled {
                        worker_tracker.cancel();
                        Self::set_status(&operations, id, OperationStatus::Canceled).await;
                        stats.lock().expect("stats lock poisoned").canceled += 1;
                        debug!(operation_id = %id, "operation canceled");
                    } else {
                        worker_tracker.fail(Some(failure.error.to_string()));
                        Self::set_status(&operations, id, OperationStatus::Failed).await;
                        {
                            let mut s = stats.lock().expect("stats lock poisoned");
                            s.failed += 1;
                            push_duration(&mut s.durations, duration);
                        }
                        warn!(operation_id = %id, error = %failure.error,
                              attempts = failure.attempts, "operation failed");
                    }
                    let level = if failure.error.class()
                        == crate::domain::error::ErrorClass::Integrity
                    {
                        NotificationLevel::Critical
                    } else {
                        NotificationLevel::Error
                    };
                    let mut tags = vec![op_kind.as_str().to_string()];
                    if canceled {
                        tags.push("canceled".to_string());
                    }
                    hub.emit(
                        event_types::OPERATION_FAILED,
                        format!("{op_name} failed: {}", failure.error),
                        EmitOptions {
                            level: Some(level),
                            source: Some("executor".to_string()),
                            tags,
                            error: Some(failure.error.to_string()),
                            data: operation_data_with_attempts(id, failure.attempts),
                            ..EmitOptions::default()
                        },
                    )
                    .await;
                }
            }

            active.fetch_sub(1, Ordering::SeqCst);
            drained.notify_waiters();
            let _ = result_tx.send(outcome);
        });

        Ok(OperationHandle {
            id,
            cancel,
            tracker,
            result: result_rx,
        })
    }

    /// Run one runner per item, bounded by `concurrency`, returning
    /// per-item results in input order.
    ///
    /// The batch occupies pool slots like any other work, so the pool
    /// bound holds across everything the executor runs.
    pub async fn execute_batch<I, T, F, Fut>(
        &self,
        operation_name: &str,
        items: Vec<I>,
        options: BatchOptions,
        runner: F,
    ) -> Vec<BatchItemResult<T>>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(I, OperationContext) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = SyncResult<T>> + Send,
    {
        use futures::stream::{self, StreamExt};

        let bound = options
            .concurrency
            .unwrap_or(self.config.max_concurrent)
            .clamp(1, self.config.max_concurrent.max(1));

        let batch_id = Uuid::new_v4();
        let tracker = Arc::new(ProgressTracker::new(
            batch_id,
            ProgressConfig {
                total_items: items.len() as u64,
                ..ProgressConfig::default()
            },
        ));
        if let Some(listener) = options.on_progress {
            tracker.add_listener(listener);
        }
        tracker.start();
        let done = Arc::new(AtomicUsize::new(0));

        let results: Vec<BatchItemResult<T>> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| {
                let runner = runner.clone();
                let pool = Arc::clone(&self.pool);
                let cancel = self.shutdown.child_token();
                let tracker = Arc::clone(&tracker);
                let done = Arc::clone(&done);
                let policy = self.config.default_retry.clone();
                async move {
                    let started = Instant::now();
                    let permit = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        permit = pool.acquire_owned() => permit.ok(),
                    };
                    let result = match permit {
                        None => Err(crate::services::retry::RetryError {
                            error: SyncError::Canceled,
                            attempts: 0,
                            total_elapsed: started.elapsed(),
                            failed_attempts: vec![],
                            exhausted: false,
                        }),
                        Some(_permit) => {
                            let engine = RetryEngine::new(policy);
                            engine
                                .execute(&cancel, |attempt| {
                                    runner(
                                        item.clone(),
                                        item_context(batch_id, attempt, &cancel, &tracker),
                                    )
                                })
                                .await
                        }
                    };
                    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                    #[allow(clippy::cast_possible_truncation)]
                    tracker.update(finished as u64, None, None);
                    (index, started.elapsed(), result)
                }
            })
            .buffered(bound)
            .map(|(index, duration, result)| match result {
                Ok(outcome) => BatchItemResult {
                    index,
                    success: true,
                    value: Some(outcome.value),
                    error: None,
                    attempts: outcome.attempts,
                    duration,
                },
                Err(failure) => BatchItemResult {
                    index,
                    success: false,
                    value: None,
                    error: Some(failure.error),
                    attempts: failure.attempts,
                    duration,
                },
            })
            .collect()
            .await;

        let failures = results.iter().filter(|r| !r.success).count();
        tracker.complete();
        debug!(
            operation = operation_name,
            items = results.len(),
            failures,
            "batch finished"
        );
        results
    }

    /// Cancel one operation by id.
    pub async fn cancel(&self, id: Uuid) -> SyncResult<()> {
        let operations = self.operations.read().await;
        let entry = operations
            .get(&id)
            .ok_or(SyncError::UnknownOperation(id))?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Progress snapshot for one operation by id.
    pub async fn progress(&self, id: Uuid) -> SyncResult<ProgressSnapshot> {
        let operations = self.operations.read().await;
        let entry = operations
            .get(&id)
            .ok_or(SyncError::UnknownOperation(id))?;
        Ok(entry.tracker.snapshot())
    }

    /// Status for one operation by id.
    pub async fn status(&self, id: Uuid) -> SyncResult<OperationStatus> {
        let operations = self.operations.read().await;
        let entry = operations
            .get(&id)
            .ok_or(SyncError::UnknownOperation(id))?;
        Ok(entry.status)
    }

    /// Number of operations admitted and not yet terminal.
    pub fn in_flight(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Wait for in-flight operations to settle, up to `grace`.
    ///
    /// Returns true when everything drained within the grace period.
    pub async fn drain(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        while self.active.load(Ordering::SeqCst) > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let notified = self.drained.notified();
            tokio::select! {
                () = notified => {}
                () = tokio::time::sleep(remaining.min(Duration::from_millis(50))) => {}
            }
        }
        true
    }

    /// Rolling statistics for this executor instance.
    pub fn stats(&self) -> ExecutorStats {
        let s = self.stats.lock().expect("stats lock poisoned");
        let mut window_ms: Vec<u64> = s
            .durations
            .iter()
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .collect();
        window_ms.sort_unstable();

        let resolved = s.completed + s.failed;
        #[allow(clippy::cast_precision_loss)]
        let error_rate = if resolved > 0 {
            s.failed as f64 / resolved as f64
        } else {
            0.0
        };
        #[allow(clippy::cast_precision_loss)]
        let avg = if window_ms.is_empty() {
            0.0
        } else {
            window_ms.iter().sum::<u64>() as f64 / window_ms.len() as f64
        };

        let running = self
            .config
            .max_concurrent
            .saturating_sub(self.pool.available_permits());

        ExecutorStats {
            total_operations: s.total,
            completed: s.completed,
            failed: s.failed,
            canceled: s.canceled,
            running,
            queued: self.queued.load(Ordering::SeqCst),
            error_rate,
            avg_duration_ms: avg,
            min_duration_ms: window_ms.first().copied().unwrap_or(0),
            max_duration_ms: window_ms.last().copied().unwrap_or(0),
            p95_duration_ms: percentile(&window_ms, 95),
            p99_duration_ms: percentile(&window_ms, 99),
        }
    }

    async fn set_status(
        operations: &Arc<RwLock<HashMap<Uuid, OperationEntry>>>,
        id: Uuid,
        status: OperationStatus,
    ) {
        if let Some(entry) = operations.write().await.get_mut(&id) {
            entry.status = status;
        }
    }
}

fn item_context(
    batch_id: Uuid,
    attempt: u32,
    cancel: &CancellationToken,
    tracker: &Arc<ProgressTracker>,
) -> OperationContext {
    OperationContext {
        operation_id: batch_id,
        attempt,
        cancel: cancel.clone(),
        tracker: Arc::clone(tracker),
    }
}

fn operation_data(id: Uuid) -> HashMap<String, serde_json::Value> {
    let mut data = HashMap::new();
    data.insert("operation_id".to_string(), serde_json::json!(id));
    data
}

fn operation_data_with_attempts(id: Uuid, attempts: u32) -> HashMap<String, serde_json::Value> {
    let mut data = operation_data(id);
    data.insert("attempts".to_string(), serde_json::json!(attempts));
    data
}

fn push_duration(window: &mut VecDeque<Duration>, duration: Duration) {
    window.push_back(duration);
    while window.len() > STATS_WINDOW {
        window.pop_front();
    }
}

/// Nearest-rank percentile over a sorted window; zero when empty.
fn percentile(sorted_ms: &[u64], pct: u32) -> u64 {
    if sorted_ms.is_empty() {
        return 0;
    }
    let rank = (usize::try_from(pct).unwrap_or(100) * sorted_ms.len()).div_ceil(100);
    sorted_ms[rank.clamp(1, sorted_ms.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::operation::OperationKind;
    use crate::domain::models::retry::{BackoffStrategy, Jitter};
    use crate::services::notification_hub::NotificationHubConfig;

    fn executor(config: ExecutorConfig) -> (OperationExecutor, Arc<NotificationHub>, CancellationToken) {
        let hub = Arc::new(NotificationHub::new(NotificationHubConfig::default()));
        let shutdown = CancellationToken::new();
        (
            OperationExecutor::new(config, Arc::clone(&hub), shutdown.clone()),
            hub,
            shutdown,
        )
    }

    fn no_retry() -> RetryPolicy {
        RetryPolicy::no_retry()
    }

    fn op(name: &str) -> Operation {
        Operation::new(name, OperationKind::Custom("test".to_string()))
    }

    #[tokio::test]
    async fn test_submit_and_await_success() {
        let (exec, hub, _token) = executor(ExecutorConfig::default());
        let handle = exec
            .submit(op("double"), SubmitOptions::default(), |_ctx| async {
                Ok(21 * 2)
            })
            .await
            .expect("submit");

        let outcome = handle.await_result().await.expect("success");
        assert_eq!(outcome.value, 42);
        assert_eq!(outcome.attempts, 1);

        let events: Vec<String> = hub
            .recent(None)
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert!(events.contains(&event_types::OPERATION_STARTED.to_string()));
        assert!(events.contains(&event_types::OPERATION_COMPLETED.to_string()));
    }

    #[tokio::test]
    async fn test_failure_wrapped_with_attempts() {
        let (exec, hub, _token) = executor(ExecutorConfig {
            default_retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(5),
                max_delay: Some(Duration::from_millis(10)),
                strategy: BackoffStrategy::Fixed,
                multiplier: 1.0,
                jitter: Jitter::None,
                max_total_time: None,
                predicate: None,
            },
            ..ExecutorConfig::default()
        });
        let handle = exec
            .submit::<(), _, _>(op("flaky"), SubmitOptions::default(), |_ctx| async {
                Err(SyncError::RateLimited)
            })
            .await
            .expect("submit");

        let failure = handle.await_result().await.expect_err("failure");
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.error, SyncError::RateLimited);

        let failed: Vec<_> = hub
            .recent(None)
            .into_iter()
            .filter(|e| e.event_type == event_types::OPERATION_FAILED)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].data["attempts"], serde_json::json!(3));
    }

    #[tokio::test]
    async fn test_pool_bound_holds() {
        let (exec, _hub, _token) = executor(ExecutorConfig {
            max_concurrent: 2,
            default_retry: no_retry(),
            ..ExecutorConfig::default()
        });

        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for i in 0..6 {
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            let handle = exec
                .submit(op(&format!("op-{i}")), SubmitOptions::default(), move |_ctx| {
                    let concurrent = Arc::clone(&concurrent);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(40)).await;
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await
                .expect("submit");
            handles.push(handle);
        }

        for handle in handles {
            handle.await_result().await.expect("all succeed");
        }
        assert!(
            peak.load(Ordering::SeqCst) <= 2,
            "pool bound exceeded: {}",
            peak.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_bounded_queue_rejects_when_full() {
        let (exec, _hub, _token) = executor(ExecutorConfig {
            max_concurrent: 1,
            queue_bound: Some(1),
            queue_full_policy: QueueFullPolicy::Reject,
            default_retry: no_retry(),
            ..ExecutorConfig::default()
        });

        // Occupy the pool slot and the single queue slot.
        let h1 = exec
            .submit(op("slow-1"), SubmitOptions::default(), |_ctx| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(())
            })
            .await
            .expect("first admitted");
        let h2 = exec
            .submit(op("slow-2"), SubmitOptions::default(), |_ctx| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(())
            })
            .await
            .expect("second admitted");

        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = exec
            .submit::<(), _, _>(op("overflow"), SubmitOptions::default(), |_ctx| async {
                Ok(())
            })
            .await
            .expect_err("queue full");
        assert_eq!(err, SyncError::QueueFull);

        h1.await_result().await.expect("h1");
        h2.await_result().await.expect("h2");
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_runner() {
        let (exec, hub, _token) = executor(ExecutorConfig {
            default_retry: no_retry(),
            ..ExecutorConfig::default()
        });

        let handle = exec
            .submit::<(), _, _>(op("long"), SubmitOptions::default(), |ctx| async move {
                tokio::select! {
                    () = ctx.cancel.cancelled() => Err(SyncError::Canceled),
                    () = tokio::time::sleep(Duration::from_secs(30)) => Ok(()),
                }
            })
            .await
            .expect("submit");

        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.cancel();
        let failure = handle.await_result().await.expect_err("canceled");
        assert_eq!(failure.error, SyncError::Canceled);

        let completed = hub
            .recent(None)
            .into_iter()
            .filter(|e| e.event_type == event_types::OPERATION_COMPLETED)
            .count();
        assert_eq!(completed, 0, "canceled operations must not complete");
        assert_eq!(exec.stats().canceled, 1);
    }

    #[tokio::test]
    async fn test_operation_timeout_fails_with_timeout_error() {
        let (exec, _hub, _token) = executor(ExecutorConfig {
            default_retry: no_retry(),
            ..ExecutorConfig::default()
        });

        let operation = op("stuck").with_timeout(Duration::from_millis(50));
        let handle = exec
            .submit::<(), _, _>(operation, SubmitOptions::default(), |ctx| async move {
                tokio::select! {
                    () = ctx.cancel.cancelled() => Err(SyncError::Canceled),
                    () = tokio::time::sleep(Duration::from_secs(30)) => Ok(()),
                }
            })
            .await
            .expect("submit");

        let failure = handle.await_result().await.expect_err("timeout");
        assert!(matches!(failure.error, SyncError::OperationTimeout(_)));
        assert_eq!(exec.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_progress_visible_through_handle_and_registry() {
        let (exec, _hub, _token) = executor(ExecutorConfig {
            default_retry: no_retry(),
            ..ExecutorConfig::default()
        });

        let handle = exec
            .submit(
                op("tracked"),
                SubmitOptions {
                    progress: ProgressConfig {
                        total_items: 4,
                        ..ProgressConfig::default()
                    },
                    ..SubmitOptions::default()
                },
                |ctx| async move {
                    ctx.tracker.update(2, None, None);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(())
                },
            )
            .await
            .expect("submit");

        tokio::time::sleep(Duration::from_millis(50)).await;
        let snapshot = handle.current_progress();
        assert!((snapshot.progress_percent - 50.0).abs() < 1e-9);
        let via_registry = exec.progress(handle.id).await.expect("by id");
        assert_eq!(via_registry.metrics.completed_items, 2);

        handle.await_result().await.expect("done");
        assert!(matches!(
            exec.progress(Uuid::new_v4()).await,
            Err(SyncError::UnknownOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight() {
        let (exec, _hub, _token) = executor(ExecutorConfig {
            default_retry: no_retry(),
            ..ExecutorConfig::default()
        });

        let _handle = exec
            .submit(op("short"), SubmitOptions::default(), |_ctx| async {
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok(())
            })
            .await
            .expect("submit");

        assert_eq!(exec.in_flight(), 1);
        assert!(exec.drain(Duration::from_secs(2)).await);
        assert_eq!(exec.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drain_times_out_on_stuck_operation() {
        let (exec, _hub, _token) = executor(ExecutorConfig {
            default_retry: no_retry(),
            default_timeout: None,
            ..ExecutorConfig::default()
        });

        let handle = exec
            .submit(op("stuck"), SubmitOptions::default(), |_ctx| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
            .expect("submit");

        assert!(!exec.drain(Duration::from_millis(100)).await);
        handle.cancel();
    }

    #[tokio::test]
    async fn test_execute_batch_returns_per_item_results_in_order() {
        let (exec, _hub, _token) = executor(ExecutorConfig {
            max_concurrent: 3,
            default_retry: no_retry(),
            ..ExecutorConfig::default()
        });

        let results = exec
            .execute_batch(
                "square",
                vec![1u64, 2, 3, 4, 5],
                BatchOptions {
                    concurrency: Some(2),
                    ..BatchOptions::default()
                },
                |item, _ctx| async move {
                    if item == 4 {
                        Err(SyncError::Other("four is cursed".to_string()))
                    } else {
                        Ok(item * item)
                    }
                },
            )
            .await;

        assert_eq!(results.len(), 5);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.index, i);
        }
        assert_eq!(results[0].value, Some(1));
        assert_eq!(results[2].value, Some(9));
        assert!(!results[3].success);
        assert!(matches!(results[3].error, Some(SyncError::Other(_))));
        assert_eq!(results[4].value, Some(25));
    }

    #[tokio::test]
    async fn test_stats_percentiles_over_window() {
        let (exec, _hub, _token) = executor(ExecutorConfig {
            max_concurrent: 1,
            default_retry: no_retry(),
            ..ExecutorConfig::default()
        });

        for i in 0..5u64 {
            let handle = exec
                .submit(op(&format!("timed-{i}")), SubmitOptions::default(), move |_ctx| async move {
                    tokio::time::sleep(Duration::from_millis(10 + i * 5)).await;
                    Ok(())
                })
                .await
                .expect("submit");
            handle.await_result().await.expect("done");
        }

        let stats = exec.stats();
        assert_eq!(stats.total_operations, 5);
        assert_eq!(stats.completed, 5);
        assert!(stats.error_rate.abs() < f64::EPSILON);
        assert!(stats.min_duration_ms >= 10);
        assert!(stats.max_duration_ms >= stats.min_duration_ms);
        assert!(stats.p95_duration_ms >= stats.min_duration_ms);
        assert!(stats.p99_duration_ms >= stats.p95_duration_ms);
    }

    #[tokio::test]
    async fn test_submit_rejected_after_shutdown() {
        let (exec, _hub, token) = executor(ExecutorConfig::default());
        token.cancel();
        let err = exec
            .submit::<(), _, _>(op("late"), SubmitOptions::default(), |_ctx| async { Ok(()) })
            .await
            .expect_err("rejected");
        assert!(matches!(err, SyncError::NotRunning(_)));
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let window: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&window, 95), 95);
        assert_eq!(percentile(&window, 99), 99);
        assert_eq!(percentile(&[42], 95), 42);
        assert_eq!(percentile(&[], 95), 0);
    }
}
