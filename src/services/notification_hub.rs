//! Notification hub: typed events fanned out to channels, with a bounded
//! ring buffer of recent events.
//!
//! Delivery is best-effort and at-most-once per channel per event. Channels
//! are delivered concurrently; one failing or slow channel never blocks the
//! others, and every send is bounded by the configured timeout and retry
//! ladder.

use chrono::Utc;
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::error::SyncError;
use crate::domain::models::notification::{
    event_types, ChannelDelivery, DeliveryState, EmitResult, NotificationEvent,
    NotificationFilter, NotificationLevel,
};
use crate::domain::ports::notification_channel::NotificationChannel;

/// First delay of the per-channel retry ladder.
const RETRY_BASE: Duration = Duration::from_secs(1);
/// Ceiling of the per-channel retry ladder.
const RETRY_CAP: Duration = Duration::from_secs(32);

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct NotificationHubConfig {
    /// Ring buffer capacity; oldest events are dropped on overflow
    pub ring_capacity: usize,
    /// Per-channel per-event send timeout
    pub send_timeout: Duration,
    /// Retries after a failed send, per channel
    pub retry_attempts: u32,
    /// Source recorded on events that do not specify one
    pub default_source: String,
}

impl Default for NotificationHubConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 1000,
            send_timeout: Duration::from_secs(10),
            retry_attempts: 3,
            default_source: "packmule".to_string(),
        }
    }
}

/// Options accepted by `emit`.
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Severity; defaults to info
    pub level: Option<NotificationLevel>,
    /// Source component; defaults to the hub's configured source
    pub source: Option<String>,
    /// Free-form labels
    pub tags: Vec<String>,
    /// Error detail for failure events
    pub error: Option<String>,
    /// Opaque caller metadata
    pub data: HashMap<String, serde_json::Value>,
    /// Restrict fan-out to these channel names
    pub channels: Option<Vec<String>>,
}

/// Typed event fan-out with a ring buffer of recent events.
pub struct NotificationHub {
    config: NotificationHubConfig,
    channels: RwLock<Vec<Arc<dyn NotificationChannel>>>,
    ring: Mutex<VecDeque<NotificationEvent>>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl NotificationHub {
    /// Create a hub with no channels.
    pub fn new(config: NotificationHubConfig) -> Self {
        let capacity = config.ring_capacity;
        Self {
            config,
            channels: RwLock::new(Vec::new()),
            ring: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a channel. A channel with the same name is replaced.
    pub async fn add_channel(&self, channel: Arc<dyn NotificationChannel>) {
        let mut channels = self.channels.write().await;
        if let Some(existing) = channels.iter_mut().find(|c| c.name() == channel.name()) {
            warn!(channel = channel.name(), "replacing existing notification channel");
            *existing = channel;
        } else {
            channels.push(channel);
        }
    }

    /// Remove a channel by name; returns whether one was removed.
    pub async fn remove_channel(&self, name: &str) -> bool {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|c| c.name() != name);
        channels.len() != before
    }

    /// Whether any registered channel reports itself available.
    pub async fn has_available_channel(&self) -> bool {
        self.channels.read().await.iter().any(|c| c.available())
    }

    /// Emit an event: record it in the ring buffer, fan out to channels
    /// concurrently, and wait for every delivery to settle.
    pub async fn emit(
        &self,
        event_type: impl Into<String>,
        message: impl Into<String>,
        options: EmitOptions,
    ) -> EmitResult {
        let event = NotificationEvent {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            level: options.level.unwrap_or(NotificationLevel::Info),
            source: options
                .source
                .unwrap_or_else(|| self.config.default_source.clone()),
            message: message.into(),
            timestamp: Utc::now(),
            tags: options.tags,
            error: options.error,
            data: options.data,
        };

        self.record(event.clone());

        if self.closed.load(Ordering::SeqCst) {
            return EmitResult {
                event,
                deliveries: vec![],
            };
        }

        let targets: Vec<Arc<dyn NotificationChannel>> = {
            let channels = self.channels.read().await;
            match &options.channels {
                Some(names) => channels
                    .iter()
                    .filter(|c| names.iter().any(|n| n == c.name()))
                    .cloned()
                    .collect(),
                None => channels.clone(),
            }
        };

        let deliveries = join_all(targets.iter().map(|channel| {
            self.deliver(Arc::clone(channel), &event)
        }))
        .await;

        EmitResult { event, deliveries }
    }

    /// Deliver one event to one channel under the timeout and retry ladder.
    async fn deliver(
        &self,
        channel: Arc<dyn NotificationChannel>,
        event: &NotificationEvent,
    ) -> ChannelDelivery {
        let name = channel.name().to_string();

        if !channel.available() {
            return ChannelDelivery {
                channel: name,
                state: DeliveryState::Failed,
                attempts: 0,
                error: Some("channel not available".to_string()),
            };
        }

        let max_attempts = self.config.retry_attempts + 1;
        let mut backoff = RETRY_BASE;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let send = tokio::time::timeout(self.config.send_timeout, channel.send(event));
            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return ChannelDelivery {
                        channel: name,
                        state: DeliveryState::Failed,
                        attempts: attempt,
                        error: Some(SyncError::Canceled.to_string()),
                    };
                }
                outcome = send => outcome,
            };

            match outcome {
                Ok(Ok(())) => {
                    debug!(channel = %name, event_id = %event.id, attempt, "event delivered");
                    return ChannelDelivery {
                        channel: name,
                        state: DeliveryState::Delivered,
                        attempts: attempt,
                        error: None,
                    };
                }
                Ok(Err(send_error)) => {
                    last_error = send_error.to_string();
                }
                Err(_elapsed) => {
                    last_error = format!(
                        "send timed out after {:?}",
                        self.config.send_timeout
                    );
                }
            }

            if attempt < max_attempts {
                warn!(channel = %name, event_id = %event.id, attempt, error = %last_error,
                      "channel send failed, retrying");
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => break,
                    () = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(RETRY_CAP);
            }
        }

        warn!(channel = %name, event_id = %event.id, error = %last_error,
              "event delivery failed");
        ChannelDelivery {
            channel: name,
            state: DeliveryState::Failed,
            attempts: max_attempts,
            error: Some(last_error),
        }
    }

    fn record(&self, event: NotificationEvent) {
        let mut ring = self.ring.lock().expect("ring lock poisoned");
        ring.push_back(event);
        while ring.len() > self.config.ring_capacity {
            ring.pop_front();
        }
    }

    /// The most recent events, oldest first, capped at `limit`.
    pub fn recent(&self, limit: Option<usize>) -> Vec<NotificationEvent> {
        let ring = self.ring.lock().expect("ring lock poisoned");
        let limit = limit.unwrap_or(ring.len());
        ring.iter()
            .skip(ring.len().saturating_sub(limit))
            .cloned()
            .collect()
    }

    /// Recent events matching a filter, oldest first.
    pub fn recent_filtered(&self, filter: &NotificationFilter) -> Vec<NotificationEvent> {
        let ring = self.ring.lock().expect("ring lock poisoned");
        ring.iter().filter(|e| filter.matches(e)).cloned().collect()
    }

    /// Number of events currently buffered.
    pub fn buffered(&self) -> usize {
        self.ring.lock().expect("ring lock poisoned").len()
    }

    /// Stop deliveries, cancel in-flight sends, and close every channel.
    /// Events emitted afterwards are still recorded in the ring buffer.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let channels = self.channels.read().await;
        for channel in channels.iter() {
            if let Err(close_error) = channel.close().await {
                warn!(channel = channel.name(), error = %close_error,
                      "channel close failed");
            }
        }
    }

    /// Sugar: info-level event.
    pub async fn info(&self, event_type: &str, message: impl Into<String>) -> EmitResult {
        self.emit(
            event_type,
            message,
            EmitOptions {
                level: Some(NotificationLevel::Info),
                ..EmitOptions::default()
            },
        )
        .await
    }

    /// Sugar: warn-level event.
    pub async fn warn(&self, event_type: &str, message: impl Into<String>) -> EmitResult {
        self.emit(
            event_type,
            message,
            EmitOptions {
                level: Some(NotificationLevel::Warn),
                ..EmitOptions::default()
            },
        )
        .await
    }

    /// Sugar: error-level event.
    pub async fn error(&self, event_type: &str, message: impl Into<String>) -> EmitResult {
        self.emit(
            event_type,
            message,
            EmitOptions {
                level: Some(NotificationLevel::Error),
                ..EmitOptions::default()
            },
        )
        .await
    }

    /// Sugar: critical-level event.
    pub async fn critical(&self, event_type: &str, message: impl Into<String>) -> EmitResult {
        self.emit(
            event_type,
            message,
            EmitOptions {
                level: Some(NotificationLevel::Critical),
                ..EmitOptions::default()
            },
        )
        .await
    }

    /// Sugar: the service finished starting.
    pub async fn service_started(&self, service: &str) -> EmitResult {
        self.info(
            event_types::SERVICE_STARTED,
            format!("{service} started"),
        )
        .await
    }

    /// Sugar: the service finished stopping.
    pub async fn service_stopped(&self, service: &str) -> EmitResult {
        self.info(
            event_types::SERVICE_STOPPED,
            format!("{service} stopped"),
        )
        .await
    }

    /// Sugar: the service hit a fatal error.
    pub async fn service_error(&self, service: &str, error: &SyncError) -> EmitResult {
        self.emit(
            event_types::SERVICE_ERROR,
            format!("{service} error: {error}"),
            EmitOptions {
                level: Some(NotificationLevel::Error),
                error: Some(error.to_string()),
                ..EmitOptions::default()
            },
        )
        .await
    }
}
