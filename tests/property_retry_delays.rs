//! Property tests for retry delay computation and attempt accounting.

use proptest::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use packmule::domain::error::SyncError;
use packmule::domain::models::retry::{BackoffStrategy, Jitter, RetryPolicy};
use packmule::services::retry::{compute_delay, RetryEngine};

fn strategy() -> impl Strategy<Value = BackoffStrategy> {
    prop_oneof![
        Just(BackoffStrategy::Fixed),
        Just(BackoffStrategy::Linear),
        Just(BackoffStrategy::Exponential),
    ]
}

fn jitter() -> impl Strategy<Value = Jitter> {
    prop_oneof![
        Just(Jitter::None),
        Just(Jitter::Full),
        Just(Jitter::Equal),
        Just(Jitter::Decorrelated),
    ]
}

proptest! {
    /// Property: every computed delay respects the configured cap.
    #[test]
    fn prop_delay_never_exceeds_cap(
        base_ms in 0u64..5_000,
        cap_extra_ms in 0u64..10_000,
        multiplier in 1.0f64..4.0,
        attempt in 1u32..12,
        prev_ms in 0u64..60_000,
        strategy in strategy(),
        jitter in jitter(),
    ) {
        let cap = Duration::from_millis(base_ms + cap_extra_ms);
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Some(cap),
            strategy,
            multiplier,
            jitter,
            max_total_time: None,
            predicate: None,
        };
        let delay = compute_delay(&policy, attempt, Some(Duration::from_millis(prev_ms)));
        prop_assert!(
            delay <= cap + Duration::from_millis(1),
            "delay {delay:?} exceeds cap {cap:?}"
        );
    }

    /// Property: without jitter, delays are monotone non-decreasing in the
    /// attempt number for every growth strategy with multiplier >= 1.
    #[test]
    fn prop_raw_delays_monotone(
        base_ms in 1u64..2_000,
        multiplier in 1.0f64..3.0,
        strategy in strategy(),
    ) {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(base_ms),
            max_delay: None,
            strategy,
            multiplier,
            jitter: Jitter::None,
            max_total_time: None,
            predicate: None,
        };
        let mut previous = Duration::ZERO;
        for attempt in 1..8 {
            let delay = compute_delay(&policy, attempt, None);
            prop_assert!(delay >= previous, "attempt {attempt}: {delay:?} < {previous:?}");
            previous = delay;
        }
    }

    /// Property: an always-failing runner under `max_attempts = k` is
    /// invoked exactly k times and records exactly k-1 timed delays.
    #[test]
    fn prop_exhaustion_runs_k_attempts(k in 1u32..6) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let policy = RetryPolicy {
                max_attempts: k,
                base_delay: Duration::from_millis(1),
                max_delay: Some(Duration::from_millis(2)),
                strategy: BackoffStrategy::Fixed,
                multiplier: 1.0,
                jitter: Jitter::None,
                max_total_time: None,
                predicate: None,
            };
            let engine = RetryEngine::new(policy);
            let calls = Arc::new(AtomicU32::new(0));
            let calls_clone = Arc::clone(&calls);

            let err = engine
                .execute::<_, _, ()>(&CancellationToken::new(), move |_| {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                    async { Err(SyncError::RateLimited) }
                })
                .await
                .expect_err("always fails");

            assert_eq!(calls.load(Ordering::SeqCst), k);
            assert_eq!(err.attempts, k);
            let timed = err
                .failed_attempts
                .iter()
                .filter(|a| !a.delay.is_zero())
                .count() as u32;
            assert_eq!(timed, k - 1);
        });
    }

    /// Property: decorrelated draws stay inside
    /// `[base, max(base, 3 × previous)]` before the cap is applied.
    #[test]
    fn prop_decorrelated_window(
        base_ms in 1u64..2_000,
        prev_ms in 0u64..10_000,
    ) {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(base_ms),
            max_delay: None,
            strategy: BackoffStrategy::Exponential,
            multiplier: 2.0,
            jitter: Jitter::Decorrelated,
            max_total_time: None,
            predicate: None,
        };
        let delay = compute_delay(&policy, 2, Some(Duration::from_millis(prev_ms)));
        let hi = Duration::from_millis((3 * prev_ms).max(base_ms));
        let lo = Duration::from_millis(base_ms).min(hi);
        prop_assert!(delay >= lo, "{delay:?} < {lo:?}");
        prop_assert!(delay <= hi + Duration::from_millis(1), "{delay:?} > {hi:?}");
    }
}

/// Seed scenario: 1000 decorrelated draws all stay within the moving
/// window and under the cap, and attempt-2 draws average near 2× base.
#[test]
fn decorrelated_jitter_statistics() {
    let policy = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_secs(1),
        max_delay: Some(Duration::from_secs(60)),
        strategy: BackoffStrategy::Exponential,
        multiplier: 2.0,
        jitter: Jitter::Decorrelated,
        max_total_time: None,
        predicate: None,
    };

    let mut attempt2_total_ms: u64 = 0;
    const RUNS: u64 = 1000;
    for _ in 0..RUNS {
        // First delay is exactly the base.
        let d1 = compute_delay(&policy, 1, None);
        assert_eq!(d1, Duration::from_secs(1));

        let d2 = compute_delay(&policy, 2, Some(d1));
        assert!(d2 >= Duration::from_secs(1));
        assert!(d2 <= Duration::from_secs(3));
        assert!(d2 <= Duration::from_secs(60));
        attempt2_total_ms += u64::try_from(d2.as_millis()).unwrap();
    }

    // Uniform over [1s, 3s]: mean 2s, generous statistical slack.
    let mean_ms = attempt2_total_ms / RUNS;
    assert!(
        (1800..=2200).contains(&mean_ms),
        "attempt-2 mean {mean_ms}ms outside 2s ± 200ms"
    );
}
