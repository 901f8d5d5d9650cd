//! Health probe port.

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::domain::error::SyncResult;
use crate::domain::models::health::ProbeOutcome;

/// Agent-supplied health check for one component.
///
/// Probes are deterministic and side-effect free except for measurement.
/// The aggregator enforces the timeout; a probe only reports.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Measure the component's current health.
    async fn check(&self) -> SyncResult<ProbeOutcome>;
}

/// Adapter turning an async closure into a [`HealthProbe`].
pub struct FnProbe<F> {
    f: F,
}

impl<F> FnProbe<F>
where
    F: Fn() -> BoxFuture<'static, SyncResult<ProbeOutcome>> + Send + Sync,
{
    /// Wrap a closure returning a boxed probe future.
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> HealthProbe for FnProbe<F>
where
    F: Fn() -> BoxFuture<'static, SyncResult<ProbeOutcome>> + Send + Sync,
{
    async fn check(&self) -> SyncResult<ProbeOutcome> {
        (self.f)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::health::ComponentStatus;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_fn_probe_adapts_closure() {
        let probe = FnProbe::new(|| async { Ok(ProbeOutcome::up()) }.boxed());
        let outcome = probe.check().await.expect("probe");
        assert_eq!(outcome.status, ComponentStatus::Up);
    }
}
