//! Cron scheduler for named recurring tasks.
//!
//! A single tick loop scans the registry and fires due tasks as
//! fire-and-forget invocations. If a previous invocation of the same task
//! is still running the new fire is dropped, not queued; drops are counted
//! and visible in task status.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::error::{SyncError, SyncResult};

/// Body of a scheduled task.
pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Options accepted by `schedule`.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    /// Display name; defaults to the task id
    pub name: Option<String>,
    /// IANA timezone the cron expression is evaluated in; UTC by default
    pub timezone: Option<String>,
    /// Fire once immediately after scheduling, in addition to cron fires
    pub start_now: bool,
}

/// Status row for one scheduled task.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    /// Registry key
    pub id: String,
    /// Display name
    pub name: String,
    /// Cron expression as supplied by the caller
    pub cron: String,
    /// Whether the task fires
    pub active: bool,
    /// Next fire instant, when the task is active
    pub next_fire_time: Option<DateTime<Utc>>,
    /// Completed fire-and-forget invocations
    pub fire_count: u64,
    /// Fires dropped because the previous invocation was still running
    pub dropped_fires: u64,
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Tick cadence of the scan loop
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

struct ScheduledTask {
    id: String,
    name: String,
    cron_display: String,
    schedule: cron::Schedule,
    timezone: Tz,
    task_fn: TaskFn,
    active: bool,
    created_at: DateTime<Utc>,
    last_fired: Option<DateTime<Utc>>,
    fire_count: u64,
    dropped_fires: Arc<AtomicU64>,
    in_flight: Arc<AtomicBool>,
}

impl ScheduledTask {
    fn next_fire_after(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&reference.with_timezone(&self.timezone))
            .next()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Named task registry driven by a single tick loop.
pub struct Scheduler {
    config: SchedulerConfig,
    tasks: Arc<RwLock<Vec<ScheduledTask>>>,
    running: Arc<AtomicBool>,
    destroyed: AtomicBool,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler; the tick loop starts with [`Scheduler::run`].
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            tasks: Arc::new(RwLock::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            destroyed: AtomicBool::new(false),
            tick_handle: Mutex::new(None),
        }
    }

    /// Normalize a 5-field expression to the 6-field form the parser
    /// expects by pinning seconds to zero; 6- and 7-field forms pass
    /// through.
    fn normalize_cron(expression: &str) -> String {
        if expression.split_whitespace().count() == 5 {
            format!("0 {expression}")
        } else {
            expression.to_string()
        }
    }

    /// Register a named task.
    ///
    /// Rejects invalid cron expressions, unknown timezones, duplicate ids,
    /// and registration after `destroy_all`. The task is active
    /// immediately.
    pub async fn schedule(
        &self,
        id: impl Into<String>,
        expression: &str,
        task_fn: TaskFn,
        options: ScheduleOptions,
    ) -> SyncResult<()> {
        let id = id.into();
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(SyncError::NotRunning("scheduler destroyed".to_string()));
        }

        let schedule = cron::Schedule::from_str(&Self::normalize_cron(expression)).map_err(
            |parse_error| SyncError::InvalidCron {
                expression: expression.to_string(),
                reason: parse_error.to_string(),
            },
        )?;

        let timezone = match &options.timezone {
            Some(tz_name) => Tz::from_str(tz_name).map_err(|_| {
                SyncError::InvalidConfig(format!("unknown timezone: {tz_name}"))
            })?,
            None => Tz::UTC,
        };

        let mut tasks = self.tasks.write().await;
        if tasks.iter().any(|t| t.id == id) {
            return Err(SyncError::DuplicateTask(id));
        }

        let task = ScheduledTask {
            name: options.name.unwrap_or_else(|| id.clone()),
            id: id.clone(),
            cron_display: expression.to_string(),
            schedule,
            timezone,
            task_fn: Arc::clone(&task_fn),
            active: true,
            created_at: Utc::now(),
            last_fired: None,
            fire_count: 0,
            dropped_fires: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicBool::new(false)),
        };
        let fire_now = options.start_now;
        let in_flight = Arc::clone(&task.in_flight);
        let dropped = Arc::clone(&task.dropped_fires);
        tasks.push(task);
        drop(tasks);

        debug!(task_id = %id, cron = expression, "scheduled task registered");

        if fire_now {
            Self::fire(&id, &task_fn, &in_flight, &dropped);
            let mut tasks = self.tasks.write().await;
            if let Some(task) = tasks.iter_mut().find(|t| t.id == id) {
                task.last_fired = Some(Utc::now());
                task.fire_count += 1;
            }
        }
        Ok(())
    }

    /// Activate one task.
    pub async fn start(&self, id: &str) -> SyncResult<()> {
        self.set_active(id, true).await
    }

    /// Deactivate one task; an in-flight invocation is left to finish.
    pub async fn stop(&self, id: &str) -> SyncResult<()> {
        self.set_active(id, false).await
    }

    /// Remove one task from the registry.
    pub async fn remove(&self, id: &str) -> SyncResult<()> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() == before {
            return Err(SyncError::UnknownTask(id.to_string()));
        }
        Ok(())
    }

    /// Activate every task.
    pub async fn start_all(&self) {
        for task in self.tasks.write().await.iter_mut() {
            task.active = true;
        }
    }

    /// Deactivate every task.
    pub async fn stop_all(&self) {
        for task in self.tasks.write().await.iter_mut() {
            task.active = false;
        }
    }

    /// Stop every task, clear the registry, halt the tick loop, and reject
    /// all future registrations.
    pub async fn destroy_all(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.tasks.write().await.clear();
        if let Some(handle) = self.tick_handle.lock().await.take() {
            handle.abort();
        }
        info!("scheduler destroyed");
    }

    /// Status of every registered task.
    pub async fn status(&self) -> Vec<TaskStatus> {
        let now = Utc::now();
        self.tasks
            .read()
            .await
            .iter()
            .map(|task| TaskStatus {
                id: task.id.clone(),
                name: task.name.clone(),
                cron: task.cron_display.clone(),
                active: task.active,
                next_fire_time: if task.active {
                    task.next_fire_after(now)
                } else {
                    None
                },
                fire_count: task.fire_count,
                dropped_fires: task.dropped_fires.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Whether the tick loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the tick loop. Idempotent.
    pub async fn run(&self) {
        if self.destroyed.load(Ordering::SeqCst)
            || self.running.swap(true, Ordering::SeqCst)
        {
            return;
        }

        let tasks = Arc::clone(&self.tasks);
        let running = Arc::clone(&self.running);
        let tick_interval = self.config.tick_interval;

        let handle = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::time::sleep(tick_interval).await;
                let now = Utc::now();

                // Collect due tasks under the read lock, fire outside it.
                let mut due: Vec<(String, TaskFn, Arc<AtomicBool>, Arc<AtomicU64>)> = Vec::new();
                {
                    let registry = tasks.read().await;
                    for task in registry.iter() {
                        if !task.active {
                            continue;
                        }
                        let reference = task.last_fired.unwrap_or(task.created_at);
                        let is_due = task
                            .next_fire_after(reference)
                            .is_some_and(|next| now >= next);
                        if is_due {
                            due.push((
                                task.id.clone(),
                                Arc::clone(&task.task_fn),
                                Arc::clone(&task.in_flight),
                                Arc::clone(&task.dropped_fires),
                            ));
                        }
                    }
                }

                if due.is_empty() {
                    continue;
                }

                let mut registry = tasks.write().await;
                for (id, task_fn, in_flight, dropped) in due {
                    let fired = Self::fire(&id, &task_fn, &in_flight, &dropped);
                    if let Some(task) = registry.iter_mut().find(|t| t.id == id) {
                        // Advance the reference either way so a busy task
                        // does not re-trigger on every subsequent tick.
                        task.last_fired = Some(now);
                        if fired {
                            task.fire_count += 1;
                        }
                    }
                }
            }
        });
        *self.tick_handle.lock().await = Some(handle);
    }

    /// Halt the tick loop without touching the registry.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.tick_handle.lock().await.take() {
            handle.abort();
        }
    }

    /// Launch one fire-and-forget invocation, or drop it if the previous
    /// one has not finished. Returns whether the invocation launched.
    fn fire(
        id: &str,
        task_fn: &TaskFn,
        in_flight: &Arc<AtomicBool>,
        dropped: &Arc<AtomicU64>,
    ) -> bool {
        if in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            dropped.fetch_add(1, Ordering::Relaxed);
            debug!(task_id = %id, "fire dropped, previous invocation still running");
            return false;
        }

        let id = id.to_string();
        let task_fn = Arc::clone(task_fn);
        let in_flight = Arc::clone(in_flight);
        tokio::spawn(async move {
            let result = std::panic::AssertUnwindSafe(task_fn()).catch_unwind().await;
            in_flight.store(false, Ordering::SeqCst);
            match result {
                Ok(Ok(())) => {}
                Ok(Err(task_error)) => {
                    error!(task_id = %id, error = %task_error, "scheduled task failed");
                }
                Err(_) => {
                    error!(task_id = %id, "scheduled task panicked");
                }
            }
        });
        true
    }

    async fn set_active(&self, id: &str, active: bool) -> SyncResult<()> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
            return Err(SyncError::UnknownTask(id.to_string()));
        };
        if task.active != active {
            task.active = active;
        } else {
            warn!(task_id = %id, active, "task already in requested state");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting_task(counter: Arc<AtomicU32>) -> TaskFn {
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    fn fast_scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig {
            tick_interval: Duration::from_millis(50),
        })
    }

    #[tokio::test]
    async fn test_schedule_rejects_invalid_cron() {
        let scheduler = fast_scheduler();
        let err = scheduler
            .schedule(
                "bad",
                "not a cron",
                counting_task(Arc::new(AtomicU32::new(0))),
                ScheduleOptions::default(),
            )
            .await
            .expect_err("invalid cron must be rejected");
        assert!(matches!(err, SyncError::InvalidCron { .. }));
    }

    #[tokio::test]
    async fn test_schedule_rejects_duplicate_id() {
        let scheduler = fast_scheduler();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler
            .schedule("t", "* * * * *", counting_task(counter.clone()), ScheduleOptions::default())
            .await
            .expect("first registration");
        let err = scheduler
            .schedule("t", "* * * * *", counting_task(counter), ScheduleOptions::default())
            .await
            .expect_err("duplicate id");
        assert!(matches!(err, SyncError::DuplicateTask(id) if id == "t"));
    }

    #[tokio::test]
    async fn test_schedule_rejects_unknown_timezone() {
        let scheduler = fast_scheduler();
        let err = scheduler
            .schedule(
                "tz",
                "* * * * *",
                counting_task(Arc::new(AtomicU32::new(0))),
                ScheduleOptions {
                    timezone: Some("Mars/Olympus".to_string()),
                    ..ScheduleOptions::default()
                },
            )
            .await
            .expect_err("unknown timezone");
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_five_field_expression_accepted() {
        let scheduler = fast_scheduler();
        scheduler
            .schedule(
                "five",
                "*/5 * * * *",
                counting_task(Arc::new(AtomicU32::new(0))),
                ScheduleOptions::default(),
            )
            .await
            .expect("5-field cron accepted");
        let status = scheduler.status().await;
        assert_eq!(status[0].cron, "*/5 * * * *");
        assert!(status[0].next_fire_time.is_some());
    }

    #[tokio::test]
    async fn test_every_second_task_fires() {
        let scheduler = fast_scheduler();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler
            .schedule(
                "tick",
                "* * * * * *",
                counting_task(counter.clone()),
                ScheduleOptions::default(),
            )
            .await
            .expect("schedule");
        scheduler.run().await;

        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.shutdown().await;

        let fires = counter.load(Ordering::SeqCst);
        assert!(
            (1..=3).contains(&fires),
            "expected 1-3 fires in 2.5s, got {fires}"
        );
    }

    #[tokio::test]
    async fn test_drop_if_running_never_queues() {
        let scheduler = fast_scheduler();
        let invocations = Arc::new(AtomicU32::new(0));
        let invocations_clone = Arc::clone(&invocations);

        let slow_task: TaskFn = Arc::new(move || {
            let invocations = Arc::clone(&invocations_clone);
            async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok(())
            }
            .boxed()
        });

        scheduler
            .schedule("slow", "* * * * * *", slow_task, ScheduleOptions::default())
            .await
            .expect("schedule");
        scheduler.run().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        scheduler.shutdown().await;

        let ran = invocations.load(Ordering::SeqCst);
        assert!(
            (1..=2).contains(&ran),
            "drop-if-running should cap a 3s body at 1-2 runs in 5s, got {ran}"
        );

        let status = scheduler.status().await;
        assert!(
            status[0].dropped_fires > 0,
            "overlapping fires should be counted as dropped"
        );
    }

    #[tokio::test]
    async fn test_task_error_does_not_stop_future_fires() {
        let scheduler = fast_scheduler();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let failing: TaskFn = Arc::new(move || {
            let counter = Arc::clone(&counter_clone);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("boom")
            }
            .boxed()
        });

        scheduler
            .schedule("flaky", "* * * * * *", failing, ScheduleOptions::default())
            .await
            .expect("schedule");
        scheduler.run().await;

        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.shutdown().await;

        assert!(counter.load(Ordering::SeqCst) >= 2, "errors must not stop firing");
    }

    #[tokio::test]
    async fn test_stop_suspends_and_start_resumes() {
        let scheduler = fast_scheduler();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler
            .schedule(
                "toggled",
                "* * * * * *",
                counting_task(counter.clone()),
                ScheduleOptions::default(),
            )
            .await
            .expect("schedule");
        scheduler.stop("toggled").await.expect("stop");
        scheduler.run().await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0, "stopped task must not fire");

        scheduler.start("toggled").await.expect("start");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        scheduler.shutdown().await;
        assert!(counter.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_schedule_then_remove_restores_state() {
        let scheduler = fast_scheduler();
        assert!(scheduler.status().await.is_empty());
        scheduler
            .schedule(
                "ephemeral",
                "* * * * *",
                counting_task(Arc::new(AtomicU32::new(0))),
                ScheduleOptions::default(),
            )
            .await
            .expect("schedule");
        scheduler.remove("ephemeral").await.expect("remove");
        assert!(scheduler.status().await.is_empty());
        assert!(matches!(
            scheduler.remove("ephemeral").await,
            Err(SyncError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn test_destroy_all_rejects_new_schedules() {
        let scheduler = fast_scheduler();
        scheduler.destroy_all().await;
        let err = scheduler
            .schedule(
                "late",
                "* * * * *",
                counting_task(Arc::new(AtomicU32::new(0))),
                ScheduleOptions::default(),
            )
            .await
            .expect_err("destroyed scheduler rejects registrations");
        assert!(matches!(err, SyncError::NotRunning(_)));
    }

    #[tokio::test]
    async fn test_start_now_fires_immediately() {
        let scheduler = fast_scheduler();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler
            .schedule(
                "eager",
                "0 0 1 1 *",
                counting_task(counter.clone()),
                ScheduleOptions {
                    start_now: true,
                    ..ScheduleOptions::default()
                },
            )
            .await
            .expect("schedule");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
