//! Health aggregation: concurrent probes, an ordered status rule, and
//! status-change notifications.

use chrono::Utc;
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::models::health::{
    duration_to_ms, ComponentHealth, ComponentStatus, HealthMetrics, HealthReport, HealthStatus,
};
use crate::domain::models::notification::{event_types, NotificationLevel};
use crate::domain::ports::health_probe::HealthProbe;
use crate::services::notification_hub::{EmitOptions, NotificationHub};

/// Aggregator configuration.
#[derive(Debug, Clone)]
pub struct HealthAggregatorConfig {
    /// Ceiling for probes that do not declare their own
    pub default_probe_timeout: Duration,
}

impl Default for HealthAggregatorConfig {
    fn default() -> Self {
        Self {
            default_probe_timeout: Duration::from_secs(5),
        }
    }
}

struct RegisteredComponent {
    name: String,
    critical: bool,
    probe: Arc<dyn HealthProbe>,
    timeout: Option<Duration>,
}

struct AggregatorState {
    previous_overall: Option<HealthStatus>,
    metrics: HealthMetrics,
    total_duration_ms: f64,
}

/// Registers component probes and aggregates their results.
pub struct HealthAggregator {
    config: HealthAggregatorConfig,
    hub: Arc<NotificationHub>,
    components: RwLock<Vec<RegisteredComponent>>,
    state: Mutex<AggregatorState>,
    started_at: Instant,
}

impl HealthAggregator {
    /// Create an aggregator that reports status changes through `hub`.
    pub fn new(config: HealthAggregatorConfig, hub: Arc<NotificationHub>) -> Self {
        Self {
            config,
            hub,
            components: RwLock::new(Vec::new()),
            state: Mutex::new(AggregatorState {
                previous_overall: None,
                metrics: HealthMetrics::default(),
                total_duration_ms: 0.0,
            }),
            started_at: Instant::now(),
        }
    }

    /// Register a component probe. A component with the same name is
    /// replaced.
    pub async fn register(
        &self,
        name: impl Into<String>,
        critical: bool,
        probe: Arc<dyn HealthProbe>,
        timeout: Option<Duration>,
    ) {
        let name = name.into();
        let mut components = self.components.write().await;
        let registration = RegisteredComponent {
            name: name.clone(),
            critical,
            probe,
            timeout,
        };
        if let Some(existing) = components.iter_mut().find(|c| c.name == name) {
            warn!(component = %name, "replacing existing health probe");
            *existing = registration;
        } else {
            components.push(registration);
        }
    }

    /// Remove a component probe; returns whether one was removed.
    pub async fn unregister(&self, name: &str) -> bool {
        let mut components = self.components.write().await;
        let before = components.len();
        components.retain(|c| c.name != name);
        components.len() != before
    }

    /// Run every probe concurrently and aggregate the results.
    ///
    /// A timed-out or failing probe marks its component down without
    /// affecting the others. When the overall status changes between
    /// checks, a `health_status_changed` notification is emitted.
    pub async fn check(&self) -> HealthReport {
        let check_started = Instant::now();
        let probes: Vec<(String, bool, Arc<dyn HealthProbe>, Duration)> = {
            let components = self.components.read().await;
            components
                .iter()
                .map(|c| {
                    (
                        c.name.clone(),
                        c.critical,
                        Arc::clone(&c.probe),
                        c.timeout.unwrap_or(self.config.default_probe_timeout),
                    )
                })
                .collect()
        };

        let results = join_all(probes.into_iter().map(
            |(name, critical, probe, timeout)| async move {
                let probe_started = Instant::now();
                let outcome = tokio::time::timeout(timeout, probe.check()).await;
                let duration_ms = duration_to_ms(probe_started.elapsed());
                let checked_at = Utc::now();
                match outcome {
                    Ok(Ok(result)) => ComponentHealth {
                        name,
                        status: result.status,
                        critical,
                        last_checked: checked_at,
                        duration_ms,
                        message: result.message,
                        error: None,
                    },
                    Ok(Err(probe_error)) => ComponentHealth {
                        name,
                        status: ComponentStatus::Down,
                        critical,
                        last_checked: checked_at,
                        duration_ms,
                        message: None,
                        error: Some(probe_error.to_string()),
                    },
                    Err(_elapsed) => ComponentHealth {
                        name,
                        status: ComponentStatus::Down,
                        critical,
                        last_checked: checked_at,
                        duration_ms,
                        message: None,
                        error: Some("timeout".to_string()),
                    },
                }
            },
        ))
        .await;

        let overall = HealthReport::aggregate(&results);
        let errors: Vec<String> = results
            .iter()
            .filter(|c| c.status == ComponentStatus::Down)
            .map(|c| {
                format!(
                    "{}: {}",
                    c.name,
                    c.error.as_deref().or(c.message.as_deref()).unwrap_or("down")
                )
            })
            .collect();
        let warnings: Vec<String> = results
            .iter()
            .filter(|c| c.status == ComponentStatus::Degraded)
            .map(|c| {
                format!(
                    "{}: {}",
                    c.name,
                    c.message.as_deref().unwrap_or("degraded")
                )
            })
            .collect();

        let report = HealthReport {
            overall,
            components: results,
            uptime_secs: self.started_at.elapsed().as_secs(),
            generated_at: Utc::now(),
            errors,
            warnings,
        };

        let status_change = {
            let mut state = self.state.lock().expect("health state lock poisoned");
            let check_ms = duration_to_ms(check_started.elapsed());
            state.metrics.total_checks += 1;
            #[allow(clippy::cast_precision_loss)]
            {
                state.total_duration_ms += check_ms as f64;
                state.metrics.mean_duration_ms =
                    state.total_duration_ms / state.metrics.total_checks as f64;
            }
            match overall {
                HealthStatus::Healthy => state.metrics.healthy_checks += 1,
                HealthStatus::Degraded => state.metrics.degraded_checks += 1,
                HealthStatus::Unhealthy => state.metrics.unhealthy_checks += 1,
                HealthStatus::Unknown => {}
            }

            let previous = state.previous_overall;
            if previous == Some(overall) {
                state.metrics.consecutive_same_status += 1;
                None
            } else {
                state.metrics.consecutive_same_status = 1;
                if previous.is_some() {
                    state.metrics.last_status_change = Some(Utc::now());
                }
                state.previous_overall = Some(overall);
                previous.map(|p| (p, overall))
            }
        };

        if let Some((from, to)) = status_change {
            self.emit_status_change(from, to, &report).await;
        } else {
            debug!(overall = overall.as_str(), "health check completed");
        }

        report
    }

    /// Aggregator counters across checks.
    pub fn metrics(&self) -> HealthMetrics {
        self.state
            .lock()
            .expect("health state lock poisoned")
            .metrics
            .clone()
    }

    /// Seconds since the aggregator was constructed.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Run `check` on a fixed cadence until canceled.
    pub fn run_periodic(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let aggregator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("health check loop stopped");
                        break;
                    }
                    () = tokio::time::sleep(interval) => {
                        aggregator.check().await;
                    }
                }
            }
        })
    }

    async fn emit_status_change(&self, from: HealthStatus, to: HealthStatus, report: &HealthReport) {
        let level = match to {
            HealthStatus::Healthy => NotificationLevel::Info,
            HealthStatus::Degraded | HealthStatus::Unknown => NotificationLevel::Warn,
            HealthStatus::Unhealthy => NotificationLevel::Error,
        };
        let failing: Vec<serde_json::Value> = report
            .components
            .iter()
            .filter(|c| c.status != ComponentStatus::Up)
            .map(|c| serde_json::json!(c.name))
            .collect();
        let mut data = std::collections::HashMap::new();
        data.insert("from".to_string(), serde_json::json!(from.as_str()));
        data.insert("to".to_string(), serde_json::json!(to.as_str()));
        data.insert("components".to_string(), serde_json::Value::Array(failing));

        info!(from = from.as_str(), to = to.as_str(), "overall health changed");
        self.hub
            .emit(
                event_types::HEALTH_STATUS_CHANGED,
                format!("health changed from {} to {}", from.as_str(), to.as_str()),
                EmitOptions {
                    level: Some(level),
                    source: Some("health".to_string()),
                    data,
                    ..EmitOptions::default()
                },
            )
            .await;
    }
}
