//! The health-check collaborator: an external boundary
//! the engine calls with a phase's asset set and a timeout, getting back a
//! per-asset pass/fail verdict plus an aggregate failure rate.

use async_trait::async_trait;
use fleet_proto::AssetId;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HealthCheckReport {
    pub passed: HashMap<AssetId, bool>,
    pub failure_rate: f64,
}

impl HealthCheckReport {
    pub fn all_passed(assets: &[AssetId]) -> Self {
        Self { passed: assets.iter().map(|id| (*id, true)).collect(), failure_rate: 0.0 }
    }
}

#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, asset_ids: &[AssetId], timeout: Duration) -> HealthCheckReport;
}

/// Used when `healthCheckEnabled=false` — every phase reports a clean bill
/// of health so the execution loop's health-check step is a no-op.
pub struct AlwaysHealthy;

#[async_trait]
impl HealthChecker for AlwaysHealthy {
    async fn check(&self, asset_ids: &[AssetId], _timeout: Duration) -> HealthCheckReport {
        HealthCheckReport::all_passed(asset_ids)
    }
}

/// Polls each asset's owning driver via [`crate::dispatch::ConnectorResolver`]
/// and [`fleet_connectors::Driver::health`] as the liveness signal, bounded by
/// `timeout`. A driver that errors (or that the resolver can't place) counts
/// as a failed asset rather than aborting the whole check.
pub struct DriverHealthChecker<R> {
    resolver: R,
}

impl<R: crate::dispatch::ConnectorResolver> DriverHealthChecker<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl<R: crate::dispatch::ConnectorResolver + Send + Sync> HealthChecker for DriverHealthChecker<R> {
    async fn check(&self, asset_ids: &[AssetId], timeout: Duration) -> HealthCheckReport {
        let mut passed = HashMap::with_capacity(asset_ids.len());
        let mut failures = 0usize;

        for asset_id in asset_ids {
            let ok = match tokio::time::timeout(timeout, self.resolver.health_check_one(*asset_id)).await {
                Ok(Ok(())) => true,
                _ => false,
            };
            if !ok {
                failures += 1;
            }
            passed.insert(*asset_id, ok);
        }

        let failure_rate = if asset_ids.is_empty() { 0.0 } else { failures as f64 / asset_ids.len() as f64 };
        HealthCheckReport { passed, failure_rate }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_healthy_reports_zero_failure_rate() {
        let ids = vec![uuid::Uuid::new_v4(), uuid::Uuid::new_v4()];
        let report = AlwaysHealthy.check(&ids, Duration::from_secs(5)).await;
        assert_eq!(report.failure_rate, 0.0);
        assert!(report.passed.values().all(|&p| p));
    }
}
