//! The rollback contract: `Rollback(campaignId, phaseId?, scope,
//! assetIds, reason) -> {success, rolledBackCount, failedAssetIds}`. The
//! engine calls this synchronously and records exactly one `RollbackRecord`
//! per invocation. A rollback must never recursively trigger another.

use async_trait::async_trait;
use fleet_proto::AssetId;
use std::sync::Arc;

use crate::dispatch::ConnectorResolver;

pub struct RollbackOutcome {
    pub success: bool,
    pub rolled_back_count: u32,
    pub failed_asset_ids: Vec<AssetId>,
}

#[async_trait]
pub trait RollbackExecutor: Send + Sync {
    async fn rollback(&self, asset_ids: &[AssetId], reason: &str) -> RollbackOutcome;
}

/// Re-dispatches each asset's prior patch state through its driver via
/// `apply_patches` with a `{"rollback": true}` marker — the same command
/// channel used for forward patches (spec gives rollback no separate wire
/// contract beyond "through the Connector Driver").
pub struct DriverRollbackExecutor<R> {
    resolver: Arc<R>,
}

impl<R: ConnectorResolver> DriverRollbackExecutor<R> {
    pub fn new(resolver: Arc<R>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl<R: ConnectorResolver> RollbackExecutor for DriverRollbackExecutor<R> {
    async fn rollback(&self, asset_ids: &[AssetId], reason: &str) -> RollbackOutcome {
        let mut rolled_back = 0u32;
        let mut failed = Vec::new();

        for asset_id in asset_ids {
            let outcome = self.rollback_one(*asset_id, reason).await;
            match outcome {
                Ok(()) => rolled_back += 1,
                Err(_) => failed.push(*asset_id),
            }
        }

        RollbackOutcome { success: failed.is_empty(), rolled_back_count: rolled_back, failed_asset_ids: failed }
    }
}

impl<R: ConnectorResolver> DriverRollbackExecutor<R> {
    async fn rollback_one(&self, asset_id: AssetId, reason: &str) -> Result<(), String> {
        let (connector, asset) = self.resolver.resolve_asset(asset_id).await?.ok_or_else(|| "asset not found".to_string())?;
        let mut driver = fleet_connectors::build_driver(connector.platform, &connector.config_blob).map_err(|e| e.to_string())?;
        driver.connect().await.map_err(|e| e.to_string())?;
        let result = driver
            .apply_patches(&asset.instance_ref, serde_json::json!({"rollback": true, "reason": reason}))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string());
        let _ = driver.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_success_reflects_empty_failure_list() {
        let outcome = RollbackOutcome { success: true, rolled_back_count: 3, failed_asset_ids: vec![] };
        assert!(outcome.success);
        assert_eq!(outcome.rolled_back_count, 3);
    }
}
