//! Sync service host: lifecycle state machine that owns the scheduler,
//! executor, notification hub, and health aggregator, and wires a plugged
//! in agent to all of them.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::error::{SyncError, SyncResult};
use crate::domain::models::config::ServiceConfig;
use crate::domain::models::content_type::ContentType;
use crate::domain::models::health::HealthReport;
use crate::domain::models::notification::{
    NotificationEvent, NotificationFilter, NotificationLevel,
};
use crate::domain::models::operation::{Operation, OperationKind};
use crate::domain::models::progress::ProgressSnapshot;
use crate::domain::ports::health_probe::HealthProbe;
use crate::domain::ports::notification_channel::NotificationChannel;
use crate::domain::ports::sync_agent::SyncAgent;
use crate::domain::ports::transferor::TransferContext;
use crate::services::executor::{
    ExecutorConfig, ExecutorStats, OperationContext, OperationExecutor, OperationHandle,
    SubmitOptions,
};
use crate::services::health::{HealthAggregator, HealthAggregatorConfig};
use crate::services::notification_hub::{EmitOptions, NotificationHub, NotificationHubConfig};
use crate::services::planner::TransferPlanner;
use crate::services::progress::ProgressConfig;
use crate::services::scheduler::{ScheduleOptions, Scheduler, SchedulerConfig, TaskFn, TaskStatus};
use crate::services::throttle::ByteThrottle;

/// Lifecycle state of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Constructed, not yet started
    Created,
    /// Inside `start()`
    Initializing,
    /// Accepting work
    Running,
    /// Inside `stop()`
    Stopping,
    /// Stopped cleanly; terminal
    Stopped,
    /// Startup or runtime failure; terminal
    Failed,
}

impl ServiceState {
    /// Stable lowercase name for logs and errors.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

/// Summary of one sync run over one or more content types.
#[derive(Debug, Clone, Default)]
pub struct SyncRunSummary {
    /// Transfers the planner emitted
    pub planned: usize,
    /// Transfers that completed
    pub completed: usize,
    /// Transfers that failed
    pub failed: usize,
    /// Transfers canceled before completion
    pub canceled: usize,
    /// Bytes the plan charged across content types
    pub planned_bytes: u64,
    /// Planner warnings surfaced during the run
    pub warnings: usize,
}

/// Registration surface handed to an agent during `initialize`.
///
/// Agents register components into the host-owned hub, aggregator, and
/// scheduler; they do not create their own.
pub struct RuntimeHandle {
    hub: Arc<NotificationHub>,
    health: Arc<HealthAggregator>,
    scheduler: Arc<Scheduler>,
    throttle: Option<Arc<ByteThrottle>>,
}

impl RuntimeHandle {
    /// Register a health probe for one component.
    pub async fn register_probe(
        &self,
        name: impl Into<String>,
        critical: bool,
        probe: Arc<dyn HealthProbe>,
        timeout: Option<Duration>,
    ) {
        self.health.register(name, critical, probe, timeout).await;
    }

    /// Register a notification channel.
    pub async fn add_channel(&self, channel: Arc<dyn NotificationChannel>) {
        self.hub.add_channel(channel).await;
    }

    /// Register an agent-owned scheduled task.
    pub async fn schedule_task(
        &self,
        id: impl Into<String>,
        cron: &str,
        task_fn: TaskFn,
        options: ScheduleOptions,
    ) -> SyncResult<()> {
        self.scheduler.schedule(id, cron, task_fn, options).await
    }

    /// The notification hub, for emitting agent events.
    pub fn notifications(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    /// The shared byte throttle, when bandwidth is capped.
    pub fn throttle(&self) -> Option<&Arc<ByteThrottle>> {
        self.throttle.as_ref()
    }
}

/// Runs planner-driven sync passes; shared between scheduled triggers and
/// on-demand calls.
struct SyncRunner {
    agent: Arc<dyn SyncAgent>,
    planner: TransferPlanner,
    executor: Arc<OperationExecutor>,
    hub: Arc<NotificationHub>,
    throttle: Option<Arc<ByteThrottle>>,
    content_types: Arc<Vec<ContentType>>,
    shutdown: CancellationToken,
}

impl SyncRunner {
    /// Plan and execute transfers for the named content type, or all of
    /// them when `only` is `None`.
    async fn run(&self, only: Option<&str>) -> SyncResult<SyncRunSummary> {
        let selection: Vec<ContentType> = self
            .content_types
            .iter()
            .filter(|ct| only.is_none_or(|name| ct.name == name))
            .cloned()
            .collect();
        if selection.is_empty() {
            return Ok(SyncRunSummary::default());
        }

        let provider = self.agent.source_provider();
        let plan = self
            .planner
            .plan(&selection, provider.as_ref(), &self.shutdown)
            .await?;

        for warning in &plan.warnings {
            self.hub
                .emit(
                    "plan_warning",
                    warning.to_string(),
                    EmitOptions {
                        level: Some(NotificationLevel::Warn),
                        source: Some("planner".to_string()),
                        ..EmitOptions::default()
                    },
                )
                .await;
        }

        let mut summary = SyncRunSummary {
            planned: plan.transfers.len(),
            planned_bytes: plan.total_estimated_bytes(),
            warnings: plan.warnings.len(),
            ..SyncRunSummary::default()
        };

        let transferor = self.agent.transferor();
        let mut handles = Vec::with_capacity(plan.transfers.len());
        for planned in plan.transfers {
            let transferor = Arc::clone(&transferor);
            let throttle = self.throttle.clone();
            let operation = Operation::new(
                format!("transfer {}", planned.destination_ref),
                OperationKind::Transfer,
            );
            let progress = ProgressConfig {
                total_bytes: planned.estimated_bytes,
                ..ProgressConfig::default()
            };
            let handle = self
                .executor
                .submit(
                    operation,
                    SubmitOptions {
                        progress,
                        ..SubmitOptions::default()
                    },
                    move |ctx: OperationContext| {
                        let transferor = Arc::clone(&transferor);
                        let throttle = throttle.clone();
                        let planned = planned.clone();
                        async move {
                            let transfer_ctx = TransferContext {
                                cancel: ctx.cancel.clone(),
                                tracker: Arc::clone(&ctx.tracker),
                                throttle,
                            };
                            transferor.transfer(&planned, &transfer_ctx).await
                        }
                    },
                )
                .await;
            match handle {
                Ok(handle) => handles.push(handle),
                Err(submit_error) => {
                    warn!(error = %submit_error, "transfer submission rejected");
                    summary.failed += 1;
                }
            }
        }

        for handle in handles {
            match handle.await_result().await {
                Ok(_) => summary.completed += 1,
                Err(failure) if matches!(failure.error, SyncError::Canceled) => {
                    summary.canceled += 1;
                }
                Err(_) => summary.failed += 1,
            }
        }

        info!(
            planned = summary.planned,
            completed = summary.completed,
            failed = summary.failed,
            canceled = summary.canceled,
            "sync run finished"
        );
        Ok(summary)
    }
}

/// Lifecycle owner wiring one agent to the runtime subsystems.
pub struct SyncServiceHost {
    config: ServiceConfig,
    agent: Arc<dyn SyncAgent>,
    state: Arc<RwLock<ServiceState>>,
    hub: Arc<NotificationHub>,
    scheduler: Arc<Scheduler>,
    health: Arc<HealthAggregator>,
    executor: Arc<OperationExecutor>,
    runner: Arc<SyncRunner>,
    shutdown: CancellationToken,
    health_loop: Mutex<Option<JoinHandle<()>>>,
}

impl SyncServiceHost {
    /// Build a host from validated configuration and an agent.
    pub fn new(config: ServiceConfig, agent: Arc<dyn SyncAgent>) -> Self {
        let shutdown = CancellationToken::new();
        let hub = Arc::new(NotificationHub::new(NotificationHubConfig {
            ring_capacity: config.notification_ring_capacity,
            send_timeout: config.channel_send_timeout(),
            retry_attempts: config.channel_retry_attempts,
            default_source: config.service_name.clone(),
        }));
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default()));
        let health = Arc::new(HealthAggregator::new(
            HealthAggregatorConfig {
                default_probe_timeout: config.probe_timeout(),
            },
            Arc::clone(&hub),
        ));
        let executor = Arc::new(OperationExecutor::new(
            ExecutorConfig {
                max_concurrent: config.max_concurrent_operations,
                default_timeout: Some(config.operation_timeout()),
                queue_bound: config.executor_queue_bound,
                queue_full_policy: config.queue_full_policy,
                default_retry: config.retry.to_policy(),
            },
            Arc::clone(&hub),
            shutdown.clone(),
        ));
        let throttle = config
            .bandwidth_limit_bytes_per_sec
            .map(|rate| Arc::new(ByteThrottle::new(rate)));
        let runner = Arc::new(SyncRunner {
            agent: Arc::clone(&agent),
            planner: TransferPlanner::new(),
            executor: Arc::clone(&executor),
            hub: Arc::clone(&hub),
            throttle,
            content_types: Arc::new(config.content_types.clone()),
            shutdown: shutdown.clone(),
        });

        Self {
            config,
            agent,
            state: Arc::new(RwLock::new(ServiceState::Created)),
            hub,
            scheduler,
            health,
            executor,
            runner,
            shutdown,
            health_loop: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ServiceState {
        *self.state.read().await
    }

    /// Start the service: validate configuration, initialize the agent,
    /// register triggers, and begin periodic health checks.
    ///
    /// Any failure emits a `service_error` notification, tears down what
    /// was partially initialized, and leaves the host in `failed`.
    pub async fn start(&self) -> SyncResult<()> {
        {
            let mut state = self.state.write().await;
            if *state != ServiceState::Created {
                return Err(SyncError::NotRunning(state.as_str().to_string()));
            }
            *state = ServiceState::Initializing;
        }

        match self.start_inner().await {
            Ok(()) => {
                *self.state.write().await = ServiceState::Running;
                self.hub.service_started(&self.config.service_name).await;
                info!(service = %self.config.service_name, "service running");
                Ok(())
            }
            Err(start_error) => {
                error!(service = %self.config.service_name, error = %start_error,
                       "startup failed");
                self.hub
                    .service_error(&self.config.service_name, &start_error)
                    .await;
                self.teardown().await;
                *self.state.write().await = ServiceState::Failed;
                Err(start_error)
            }
        }
    }

    async fn start_inner(&self) -> SyncResult<()> {
        self.config.validate()?;

        let handle = RuntimeHandle {
            hub: Arc::clone(&self.hub),
            health: Arc::clone(&self.health),
            scheduler: Arc::clone(&self.scheduler),
            throttle: self.runner.throttle.clone(),
        };
        self.agent.initialize(&handle).await?;

        // One cron trigger per scheduled content type.
        for content_type in &self.config.content_types {
            let Some(schedule) = &content_type.schedule else {
                continue;
            };
            let runner = Arc::clone(&self.runner);
            let name = content_type.name.clone();
            let task: TaskFn = Arc::new(move || {
                let runner = Arc::clone(&runner);
                let name = name.clone();
                Box::pin(async move {
                    runner.run(Some(&name)).await?;
                    Ok(())
                })
            });
            self.scheduler
                .schedule(
                    format!("sync:{}", content_type.name),
                    schedule,
                    task,
                    ScheduleOptions {
                        name: Some(format!("sync {}", content_type.name)),
                        ..ScheduleOptions::default()
                    },
                )
                .await?;
        }
        self.scheduler.run().await;

        let health_handle = self
            .health
            .run_periodic(self.config.health_check_interval(), self.shutdown.child_token());
        *self.health_loop.lock().await = Some(health_handle);

        Ok(())
    }

    /// Stop the service: suspend the scheduler, cancel in-flight
    /// operations, wait up to the shutdown grace period for them to drain,
    /// and close channels.
    pub async fn stop(&self) -> SyncResult<()> {
        {
            let mut state = self.state.write().await;
            if *state != ServiceState::Running {
                return Err(SyncError::NotRunning(state.as_str().to_string()));
            }
            *state = ServiceState::Stopping;
        }
        info!(service = %self.config.service_name, "stopping");

        // New fires and submissions are rejected from here on.
        self.scheduler.stop_all().await;
        self.scheduler.shutdown().await;
        self.shutdown.cancel();

        let grace = self.config.shutdown_grace_period();
        if !self.executor.drain(grace).await {
            warn!(
                grace_secs = grace.as_secs(),
                remaining = self.executor.in_flight(),
                "operations still in flight after grace period"
            );
        }

        if let Some(handle) = self.health_loop.lock().await.take() {
            handle.abort();
        }

        if let Err(agent_error) = self.agent.shutdown().await {
            warn!(error = %agent_error, "agent shutdown reported an error");
        }

        self.hub.service_stopped(&self.config.service_name).await;
        self.hub.close().await;
        *self.state.write().await = ServiceState::Stopped;
        info!(service = %self.config.service_name, "stopped");
        Ok(())
    }

    async fn teardown(&self) {
        self.shutdown.cancel();
        self.scheduler.destroy_all().await;
        if let Some(handle) = self.health_loop.lock().await.take() {
            handle.abort();
        }
        self.executor.drain(Duration::from_secs(1)).await;
        self.hub.close().await;
    }

    /// Run a sync pass now for one content type, outside its schedule.
    pub async fn sync_now(&self, content_type: &str) -> SyncResult<SyncRunSummary> {
        self.ensure_running().await?;
        self.runner.run(Some(content_type)).await
    }

    /// Run a sync pass now for every configured content type.
    pub async fn sync_all(&self) -> SyncResult<SyncRunSummary> {
        self.ensure_running().await?;
        self.runner.run(None).await
    }

    /// Submit an agent-defined operation. Rejected unless running.
    pub async fn submit<T, F, Fut>(
        &self,
        operation: Operation,
        options: SubmitOptions,
        runner: F,
    ) -> SyncResult<OperationHandle<T>>
    where
        T: Send + Sync + 'static,
        F: Fn(OperationContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = SyncResult<T>> + Send,
    {
        self.ensure_running().await?;
        self.executor.submit(operation, options, runner).await
    }

    /// Current health report (runs the probes).
    pub async fn health_report(&self) -> HealthReport {
        self.health.check().await
    }

    /// Recent notification events matching `filter`.
    pub fn recent_events(&self, filter: &NotificationFilter) -> Vec<NotificationEvent> {
        self.hub.recent_filtered(filter)
    }

    /// Status of every scheduled task.
    pub async fn scheduler_status(&self) -> Vec<TaskStatus> {
        self.scheduler.status().await
    }

    /// Executor statistics.
    pub fn executor_stats(&self) -> ExecutorStats {
        self.executor.stats()
    }

    /// Progress snapshot for one operation.
    pub async fn operation_progress(&self, id: Uuid) -> SyncResult<ProgressSnapshot> {
        self.executor.progress(id).await
    }

    async fn ensure_running(&self) -> SyncResult<()> {
        let state = *self.state.read().await;
        if state == ServiceState::Running {
            Ok(())
        } else {
            Err(SyncError::NotRunning(state.as_str().to_string()))
        }
    }
}
