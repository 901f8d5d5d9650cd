//! Progress tracking for a single operation.
//!
//! One tracker per operation. Listeners receive owned snapshots in
//! registration order on every accepted update; a failing listener is
//! logged and does not block the others. Terminal states are absorbing.

use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::domain::models::progress::{
    Phase, PhaseStatus, ProgressMetrics, ProgressSnapshot, ProgressStatus,
};

/// Window used for the short-horizon instantaneous rate estimate.
const RATE_WINDOW: Duration = Duration::from_secs(5);

/// Receives progress snapshots from one tracker.
pub trait ProgressListener: Send + Sync {
    /// Called for every accepted update and status transition. Errors are
    /// logged by the tracker and do not abort other listeners.
    fn on_update(&self, snapshot: &ProgressSnapshot) -> anyhow::Result<()>;
}

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Construction parameters for a tracker.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Item total; 0 when unknown
    pub total_items: u64,
    /// Byte total; 0 when unknown
    pub total_bytes: u64,
    /// Weighted phases; used for the overall percent when item totals are
    /// absent
    pub phases: Vec<Phase>,
    /// Cadence for periodic listener emission while in progress; `None`
    /// emits only on explicit updates
    pub update_interval: Option<Duration>,
    /// Whether to derive rates and ETA; when false the metrics carry only
    /// raw counters
    pub track_rates: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            total_items: 0,
            total_bytes: 0,
            phases: vec![],
            update_interval: None,
            track_rates: true,
        }
    }
}

struct TrackerState {
    status: ProgressStatus,
    completed_items: u64,
    processed_bytes: u64,
    phases: Vec<Phase>,
    current_phase: Option<usize>,
    started_wall: Option<chrono::DateTime<Utc>>,
    started_instant: Option<Instant>,
    last_update_at: Option<chrono::DateTime<Utc>>,
    max_percent: f64,
    message: Option<String>,
    /// (instant, units-completed) samples for the instantaneous rate
    window: VecDeque<(Instant, u64)>,
}

/// Per-operation progress state with listener fan-out.
pub struct ProgressTracker {
    operation_id: Uuid,
    config: ProgressConfig,
    state: Mutex<TrackerState>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn ProgressListener>)>>,
    next_listener_id: AtomicU64,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl ProgressTracker {
    /// Create a tracker for the given operation.
    pub fn new(operation_id: Uuid, config: ProgressConfig) -> Self {
        let phases = config.phases.clone();
        Self {
            operation_id,
            config,
            state: Mutex::new(TrackerState {
                status: ProgressStatus::NotStarted,
                completed_items: 0,
                processed_bytes: 0,
                phases,
                current_phase: None,
                started_wall: None,
                started_instant: None,
                last_update_at: None,
                max_percent: 0.0,
                message: None,
                window: VecDeque::new(),
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
            ticker: Mutex::new(None),
        }
    }

    /// The operation this tracker belongs to.
    pub const fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    /// Register a listener; returns a handle for removal.
    pub fn add_listener(&self, listener: Arc<dyn ProgressListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .push((id, listener));
        id
    }

    /// Remove a previously registered listener.
    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .retain(|(lid, _)| *lid != id);
    }

    /// Transition to in-progress and start periodic emission if configured.
    ///
    /// No-op unless the tracker is in `not_started`.
    pub fn start(self: &Arc<Self>) {
        {
            let mut state = self.lock_state();
            if state.status != ProgressStatus::NotStarted {
                warn!(operation_id = %self.operation_id, status = state.status.as_str(),
                      "ignoring start on already-started tracker");
                return;
            }
            state.status = ProgressStatus::InProgress;
            state.started_wall = Some(Utc::now());
            state.started_instant = Some(Instant::now());
            state.window.push_back((Instant::now(), 0));
        }
        self.emit();

        if let Some(interval) = self.config.update_interval {
            if !interval.is_zero() {
                let weak: Weak<Self> = Arc::downgrade(self);
                let handle = tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(interval).await;
                        let Some(tracker) = weak.upgrade() else { break };
                        let status = tracker.lock_state().status;
                        if status.is_terminal() {
                            break;
                        }
                        if status == ProgressStatus::InProgress {
                            tracker.emit();
                        }
                    }
                });
                *self.ticker.lock().expect("ticker lock poisoned") = Some(handle);
            }
        }
    }

    /// Suspend updates. Paused trackers ignore `update` calls entirely.
    pub fn pause(&self) {
        let changed = {
            let mut state = self.lock_state();
            if state.status == ProgressStatus::InProgress {
                state.status = ProgressStatus::Paused;
                true
            } else {
                false
            }
        };
        if changed {
            self.emit();
        }
    }

    /// Resume from pause.
    pub fn resume(&self) {
        let changed = {
            let mut state = self.lock_state();
            if state.status == ProgressStatus::Paused {
                state.status = ProgressStatus::InProgress;
                true
            } else {
                false
            }
        };
        if changed {
            self.emit();
        }
    }

    /// Record progress. Ignored while paused; a no-op after a terminal
    /// transition. Inputs are clamped to the configured totals.
    pub fn update(
        &self,
        completed_items: u64,
        processed_bytes: Option<u64>,
        current_item: Option<&str>,
    ) {
        let accepted = {
            let mut state = self.lock_state();
            match state.status {
                ProgressStatus::Paused => false,
                status if status.is_terminal() => {
                    warn!(operation_id = %self.operation_id, status = status.as_str(),
                          "ignoring update on terminal tracker");
                    false
                }
                ProgressStatus::NotStarted => false,
                _ => {
                    state.completed_items = if self.config.total_items > 0 {
                        completed_items.min(self.config.total_items)
                    } else {
                        completed_items
                    };
                    if let Some(bytes) = processed_bytes {
                        state.processed_bytes = if self.config.total_bytes > 0 {
                            bytes.min(self.config.total_bytes)
                        } else {
                            bytes
                        };
                    }
                    if let Some(item) = current_item {
                        state.message = Some(item.to_string());
                    }
                    state.last_update_at = Some(Utc::now());

                    let units = rate_units(&self.config, &state);
                    let now = Instant::now();
                    state.window.push_back((now, units));
                    while let Some((t, _)) = state.window.front() {
                        if now.duration_since(*t) > RATE_WINDOW && state.window.len() > 2 {
                            state.window.pop_front();
                        } else {
                            break;
                        }
                    }
                    true
                }
            }
        };
        if accepted {
            self.emit();
        }
    }

    /// Enter the named phase, completing the previous one.
    pub fn set_phase(&self, phase_id: &str) {
        let changed = {
            let mut state = self.lock_state();
            if state.status.is_terminal() {
                return;
            }
            let Some(idx) = state.phases.iter().position(|p| p.id == phase_id) else {
                warn!(operation_id = %self.operation_id, phase_id, "unknown phase");
                return;
            };
            if let Some(prev) = state.current_phase {
                if prev != idx {
                    let phase = &mut state.phases[prev];
                    phase.status = PhaseStatus::Completed;
                    phase.progress = 100.0;
                    phase.finished_at = Some(Utc::now());
                }
            }
            let phase = &mut state.phases[idx];
            if phase.status == PhaseStatus::Pending {
                phase.status = PhaseStatus::Active;
                phase.started_at = Some(Utc::now());
            }
            state.current_phase = Some(idx);
            true
        };
        if changed {
            self.emit();
        }
    }

    /// Set the named phase's local progress, clamped to `[0, 100]`.
    pub fn update_phase_progress(&self, phase_id: &str, percent: f64) {
        let changed = {
            let mut state = self.lock_state();
            if state.status.is_terminal() || state.status == ProgressStatus::Paused {
                return;
            }
            let Some(idx) = state.phases.iter().position(|p| p.id == phase_id) else {
                warn!(operation_id = %self.operation_id, phase_id, "unknown phase");
                return;
            };
            state.phases[idx].progress = percent.clamp(0.0, 100.0);
            state.last_update_at = Some(Utc::now());
            true
        };
        if changed {
            self.emit();
        }
    }

    /// Transition to `completed`; the overall percent becomes 100.
    pub fn complete(&self) {
        self.finish(ProgressStatus::Completed, None);
    }

    /// Transition to `failed` with an optional reason.
    pub fn fail(&self, error: Option<String>) {
        self.finish(ProgressStatus::Failed, error);
    }

    /// Transition to `canceled`.
    pub fn cancel(&self) {
        self.finish(ProgressStatus::Canceled, None);
    }

    fn finish(&self, terminal: ProgressStatus, message: Option<String>) {
        debug_assert!(terminal.is_terminal());
        let changed = {
            let mut state = self.lock_state();
            if state.status.is_terminal() {
                warn!(operation_id = %self.operation_id,
                      from = state.status.as_str(), to = terminal.as_str(),
                      "ignoring transition on terminal tracker");
                false
            } else {
                state.status = terminal;
                if terminal == ProgressStatus::Completed {
                    state.max_percent = 100.0;
                    if self.config.total_items > 0 {
                        state.completed_items = self.config.total_items;
                    }
                }
                if message.is_some() {
                    state.message = message;
                }
                state.last_update_at = Some(Utc::now());
                true
            }
        };
        if changed {
            if let Some(handle) = self.ticker.lock().expect("ticker lock poisoned").take() {
                handle.abort();
            }
            self.emit();
        }
    }

    /// Take a point-in-time snapshot.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let mut state = self.lock_state();
        self.snapshot_locked(&mut state)
    }

    fn snapshot_locked(&self, state: &mut TrackerState) -> ProgressSnapshot {
        let elapsed = state
            .started_instant
            .map_or(0.0, |t| t.elapsed().as_secs_f64());

        let computed_percent = self.percent(state);
        if computed_percent > state.max_percent {
            state.max_percent = computed_percent;
        }

        let units_done = rate_units(&self.config, state);
        let average_rate = if self.config.track_rates && elapsed > 0.0 {
            #[allow(clippy::cast_precision_loss)]
            let done = units_done as f64;
            done / elapsed
        } else {
            0.0
        };
        let instantaneous_rate = if self.config.track_rates {
            instantaneous(&state.window).unwrap_or(average_rate)
        } else {
            0.0
        };

        let total_units = if self.config.total_items > 0 {
            self.config.total_items
        } else {
            self.config.total_bytes
        };
        let eta_seconds = if average_rate > 0.0 && total_units > 0 {
            #[allow(clippy::cast_precision_loss)]
            let remaining = total_units.saturating_sub(units_done) as f64;
            Some(remaining / average_rate)
        } else {
            None
        };

        let current_phase = state
            .current_phase
            .and_then(|idx| state.phases.get(idx))
            .map(|p| p.name.clone());

        ProgressSnapshot {
            operation_id: self.operation_id,
            status: state.status,
            progress_percent: state.max_percent,
            current_phase,
            metrics: ProgressMetrics {
                total_items: self.config.total_items,
                completed_items: state.completed_items,
                total_bytes: self.config.total_bytes,
                processed_bytes: state.processed_bytes,
                instantaneous_rate,
                average_rate,
                eta_seconds,
                elapsed_seconds: elapsed,
                started_at: state.started_wall,
                last_update_at: state.last_update_at,
            },
            timestamp: Utc::now(),
            message: state.message.clone(),
        }
    }

    /// Percent from items, then phases, then bytes, in that order of
    /// preference.
    #[allow(clippy::cast_precision_loss)]
    fn percent(&self, state: &TrackerState) -> f64 {
        if self.config.total_items > 0 {
            return state.completed_items as f64 / self.config.total_items as f64 * 100.0;
        }
        if !state.phases.is_empty() {
            let total_weight: f64 = state.phases.iter().map(|p| p.weight).sum();
            if total_weight > 0.0 {
                let weighted: f64 = state.phases.iter().map(|p| p.progress * p.weight).sum();
                return (weighted / total_weight).clamp(0.0, 100.0);
            }
        }
        if self.config.total_bytes > 0 {
            return state.processed_bytes as f64 / self.config.total_bytes as f64 * 100.0;
        }
        0.0
    }

    fn emit(&self) {
        let snapshot = self.snapshot();
        let listeners: Vec<(ListenerId, Arc<dyn ProgressListener>)> = self
            .listeners
            .lock()
            .expect("listener lock poisoned")
            .clone();
        for (id, listener) in listeners {
            if let Err(error) = listener.on_update(&snapshot) {
                warn!(operation_id = %self.operation_id, listener_id = id.0, %error,
                      "progress listener failed");
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().expect("tracker state lock poisoned")
    }
}

fn rate_units(config: &ProgressConfig, state: &TrackerState) -> u64 {
    if config.total_items > 0 || state.completed_items > 0 {
        state.completed_items
    } else {
        state.processed_bytes
    }
}

/// Short-window rate: units between the oldest and newest samples divided
/// by their time span. `None` until two samples exist.
fn instantaneous(window: &VecDeque<(Instant, u64)>) -> Option<f64> {
    let (first_t, first_u) = window.front()?;
    let (last_t, last_u) = window.back()?;
    let span = last_t.duration_since(*first_t).as_secs_f64();
    if span <= 0.0 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let delta = last_u.saturating_sub(*first_u) as f64;
    Some(delta / span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct CollectingListener {
        snapshots: StdMutex<Vec<ProgressSnapshot>>,
    }

    impl CollectingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                snapshots: StdMutex::new(Vec::new()),
            })
        }

        fn statuses(&self) -> Vec<ProgressStatus> {
            self.snapshots
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.status)
                .collect()
        }

        fn percents(&self) -> Vec<f64> {
            self.snapshots
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.progress_percent)
                .collect()
        }
    }

    impl ProgressListener for CollectingListener {
        fn on_update(&self, snapshot: &ProgressSnapshot) -> anyhow::Result<()> {
            self.snapshots.lock().unwrap().push(snapshot.clone());
            Ok(())
        }
    }

    fn tracker(config: ProgressConfig) -> Arc<ProgressTracker> {
        Arc::new(ProgressTracker::new(Uuid::new_v4(), config))
    }

    #[tokio::test]
    async fn test_item_progress_and_percent() {
        let t = tracker(ProgressConfig {
            total_items: 4,
            ..ProgressConfig::default()
        });
        t.start();
        t.update(2, None, Some("ep-02.mkv"));
        let snap = t.snapshot();
        assert_eq!(snap.status, ProgressStatus::InProgress);
        assert!((snap.progress_percent - 50.0).abs() < 1e-9);
        assert_eq!(snap.metrics.completed_items, 2);
        assert_eq!(snap.message.as_deref(), Some("ep-02.mkv"));
    }

    #[tokio::test]
    async fn test_update_clamps_to_totals() {
        let t = tracker(ProgressConfig {
            total_items: 3,
            total_bytes: 100,
            ..ProgressConfig::default()
        });
        t.start();
        t.update(99, Some(5000), None);
        let snap = t.snapshot();
        assert_eq!(snap.metrics.completed_items, 3);
        assert_eq!(snap.metrics.processed_bytes, 100);
        assert!((snap.progress_percent - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_percent_is_monotone_across_updates() {
        let t = tracker(ProgressConfig {
            total_items: 10,
            ..ProgressConfig::default()
        });
        let listener = CollectingListener::new();
        t.add_listener(listener.clone());
        t.start();
        t.update(5, None, None);
        t.update(3, None, None); // regression attempt
        t.update(7, None, None);
        t.complete();

        let percents = listener.percents();
        for pair in percents.windows(2) {
            assert!(
                pair[1] >= pair[0] - 1e-9,
                "percent went backwards: {pair:?}"
            );
        }
        assert!((percents.last().unwrap() - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_paused_tracker_ignores_updates() {
        let t = tracker(ProgressConfig {
            total_items: 10,
            ..ProgressConfig::default()
        });
        t.start();
        t.update(4, None, None);
        t.pause();
        t.update(9, None, None);
        let snap = t.snapshot();
        assert_eq!(snap.status, ProgressStatus::Paused);
        assert_eq!(snap.metrics.completed_items, 4);

        t.resume();
        t.update(9, None, None);
        assert_eq!(t.snapshot().metrics.completed_items, 9);
    }

    #[tokio::test]
    async fn test_terminal_states_are_absorbing() {
        let t = tracker(ProgressConfig {
            total_items: 2,
            ..ProgressConfig::default()
        });
        t.start();
        t.complete();
        t.fail(Some("late".into()));
        t.cancel();
        t.update(1, None, None);
        assert_eq!(t.snapshot().status, ProgressStatus::Completed);
    }

    #[tokio::test]
    async fn test_zero_totals_complete_jumps_to_hundred() {
        let t = tracker(ProgressConfig::default());
        t.start();
        assert!((t.snapshot().progress_percent - 0.0).abs() < 1e-9);
        t.complete();
        let snap = t.snapshot();
        assert_eq!(snap.status, ProgressStatus::Completed);
        assert!((snap.progress_percent - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_phase_weighted_percent() {
        let t = tracker(ProgressConfig {
            phases: vec![
                Phase::new("scan", "Scanning", 1.0),
                Phase::new("copy", "Copying", 3.0),
            ],
            ..ProgressConfig::default()
        });
        t.start();
        t.set_phase("scan");
        t.update_phase_progress("scan", 100.0);
        // scan fully done: 1/4 of total weight.
        assert!((t.snapshot().progress_percent - 25.0).abs() < 1e-9);

        t.set_phase("copy");
        t.update_phase_progress("copy", 50.0);
        // 25 + 0.5 × 75 = 62.5
        assert!((t.snapshot().progress_percent - 62.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_item_percent_wins_over_phases() {
        let t = tracker(ProgressConfig {
            total_items: 2,
            phases: vec![Phase::new("only", "Only", 1.0)],
            ..ProgressConfig::default()
        });
        t.start();
        t.set_phase("only");
        t.update_phase_progress("only", 90.0);
        t.update(1, None, None);
        assert!((t.snapshot().progress_percent - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_listener_error_does_not_abort_others() {
        struct FailingListener;
        impl ProgressListener for FailingListener {
            fn on_update(&self, _: &ProgressSnapshot) -> anyhow::Result<()> {
                anyhow::bail!("listener exploded")
            }
        }

        let t = tracker(ProgressConfig {
            total_items: 1,
            ..ProgressConfig::default()
        });
        let collector = CollectingListener::new();
        t.add_listener(Arc::new(FailingListener));
        t.add_listener(collector.clone());
        t.start();
        t.update(1, None, None);
        assert!(collector.snapshots.lock().unwrap().len() >= 2);
    }

    #[tokio::test]
    async fn test_remove_listener_stops_emission() {
        let t = tracker(ProgressConfig {
            total_items: 2,
            ..ProgressConfig::default()
        });
        let listener = CollectingListener::new();
        let id = t.add_listener(listener.clone());
        t.start();
        let before = listener.snapshots.lock().unwrap().len();
        t.remove_listener(id);
        t.update(1, None, None);
        assert_eq!(listener.snapshots.lock().unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_periodic_emission_while_in_progress() {
        let t = tracker(ProgressConfig {
            total_items: 100,
            update_interval: Some(Duration::from_millis(20)),
            ..ProgressConfig::default()
        });
        let listener = CollectingListener::new();
        t.add_listener(listener.clone());
        t.start();
        tokio::time::sleep(Duration::from_millis(120)).await;
        t.complete();
        let count = listener.snapshots.lock().unwrap().len();
        assert!(count >= 3, "expected periodic emissions, got {count}");
        assert!(listener.statuses().contains(&ProgressStatus::Completed));
    }

    #[tokio::test]
    async fn test_eta_derived_from_average_rate() {
        let t = tracker(ProgressConfig {
            total_items: 10,
            ..ProgressConfig::default()
        });
        t.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        t.update(5, None, None);
        let snap = t.snapshot();
        let avg = snap.metrics.average_rate;
        assert!(avg > 0.0);
        let eta = snap.metrics.eta_seconds.expect("eta once rate is known");
        assert!((eta - 5.0 / avg).abs() < 0.5, "eta {eta} vs rate {avg}");
    }
}
