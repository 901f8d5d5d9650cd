//! Retry policy model: backoff strategy, jitter mode, and attempt limits.
//!
//! A policy is immutable configuration. The delay schedule it describes is
//! computed by the retry engine; this module only carries the knobs and
//! their validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::error::SyncError;

/// How the base delay grows across attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Every delay equals the base delay
    Fixed,
    /// Delay grows by `base × (multiplier - 1)` per attempt
    Linear,
    /// Delay multiplies by `multiplier` per attempt
    #[default]
    Exponential,
}

/// Randomization applied to a computed, capped delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jitter {
    /// Use the computed delay unchanged
    None,
    /// Uniform in `[0, delay]`
    Full,
    /// `delay/2` plus uniform in `[0, delay/2]`
    #[default]
    Equal,
    /// Uniform in `[base, max(base, 3 × previous delay)]`
    Decorrelated,
}

/// Serializable retry settings, as they appear in service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Total attempts including the first (>= 1)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Delay cap in milliseconds; absent means uncapped
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: Option<u64>,

    /// Growth strategy
    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Growth factor for linear/exponential strategies (> 0)
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter mode
    #[serde(default)]
    pub jitter: Jitter,

    /// Wall-clock budget across all attempts, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_time_secs: Option<u64>,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1000
}

const fn default_max_delay_ms() -> Option<u64> {
    Some(30_000)
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            strategy: BackoffStrategy::default(),
            multiplier: default_multiplier(),
            jitter: Jitter::default(),
            max_total_time_secs: None,
        }
    }
}

impl RetryConfig {
    /// Build the runtime policy this configuration describes.
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: self.max_delay_ms.map(Duration::from_millis),
            strategy: self.strategy,
            multiplier: self.multiplier,
            jitter: self.jitter,
            max_total_time: self.max_total_time_secs.map(Duration::from_secs),
            predicate: None,
        }
    }
}

/// Predicate deciding retryability for a specific error, overriding the
/// error's own classification.
pub type RetryPredicate = Arc<dyn Fn(&SyncError) -> bool + Send + Sync>;

/// Immutable retry policy consumed by the retry engine.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1)
    pub max_attempts: u32,
    /// Base delay before growth and jitter
    pub base_delay: Duration,
    /// Cap applied to computed delays; `None` means uncapped
    pub max_delay: Option<Duration>,
    /// Growth strategy
    pub strategy: BackoffStrategy,
    /// Growth factor for linear/exponential strategies
    pub multiplier: f64,
    /// Jitter mode
    pub jitter: Jitter,
    /// Wall-clock budget across all attempts
    pub max_total_time: Option<Duration>,
    /// Optional retryability override
    pub predicate: Option<RetryPredicate>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().to_policy()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("strategy", &self.strategy)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .field("max_total_time", &self.max_total_time)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Attach a retryability predicate.
    #[must_use]
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&SyncError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Check structural invariants: at least one attempt, a cap no smaller
    /// than the base, and a positive growth factor.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(max) = self.max_delay {
            if max < self.base_delay {
                return Err(SyncError::InvalidConfig(format!(
                    "retry.max_delay ({max:?}) must be >= base_delay ({:?})",
                    self.base_delay
                )));
            }
        }
        if self.multiplier <= 0.0 {
            return Err(SyncError::InvalidConfig(format!(
                "retry.multiplier must be positive, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// Decide whether `error` is retryable under this policy.
    pub fn retryable(&self, error: &SyncError) -> bool {
        // Cancellation is never retryable, predicate or not.
        if matches!(error, SyncError::Canceled) {
            return false;
        }
        match &self.predicate {
            Some(predicate) => predicate(error),
            None => error.is_retryable(),
        }
    }
}
