//! Resolves which connector/driver owns a target asset, and issues the
//! platform-specific patch command through it.
//!
//! The data model has no direct asset→connector foreign key.
//! [`ConnectorResolver`] is the resolution rule this engine uses: find the
//! asset's `(org_id, platform)`, then pick the first enabled connector for
//! that pair — see `DESIGN.md` for why this is the simplest reading
//! consistent with issuing the command through the connector driver.

use async_trait::async_trait;
use fleet_connectors::with_retry;
use fleet_proto::{Asset, AssetId, Connector, PhaseAssetResult, PhaseAssetStatus, PhaseId};
use fleet_persist::PgPool;
use std::sync::Arc;

#[async_trait]
pub trait ConnectorResolver: Send + Sync {
    async fn resolve_asset(&self, asset_id: AssetId) -> Result<Option<(Connector, Asset)>, String>;
    async fn health_check_one(&self, asset_id: AssetId) -> Result<(), String>;
}

pub struct PgConnectorResolver {
    pool: PgPool,
}

impl PgConnectorResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectorResolver for PgConnectorResolver {
    async fn resolve_asset(&self, asset_id: AssetId) -> Result<Option<(Connector, Asset)>, String> {
        let assets = fleet_persist::assets::fetch_by_ids(&self.pool, &[asset_id]).await.map_err(|e| e.to_string())?;
        let Some(asset) = assets.into_iter().next() else {
            return Ok(None);
        };
        let connector = fleet_persist::connectors::fetch_by_org_and_platform(&self.pool, asset.org_id, asset.platform)
            .await
            .map_err(|e| e.to_string())?;
        Ok(connector.map(|c| (c, asset)))
    }

    async fn health_check_one(&self, asset_id: AssetId) -> Result<(), String> {
        let (connector, _asset) = self.resolve_asset(asset_id).await?.ok_or_else(|| "no connector owns this asset".to_string())?;
        let mut driver = fleet_connectors::build_driver(connector.platform, &connector.config_blob).map_err(|e| e.to_string())?;
        driver.connect().await.map_err(|e| e.to_string())?;
        let outcome = driver.health().await.map_err(|e| e.to_string());
        let _ = driver.close().await;
        outcome
    }
}

/// Issues one patch command per asset. Implementations should not retry at
/// this level beyond what `apply_patches` itself does internally via
/// [`fleet_connectors::with_retry`] — a failed dispatch becomes a `failed`
/// [`PhaseAssetResult`], not a retried one — exactly one
/// result is recorded per asset per execution attempt.
#[async_trait]
pub trait PatchDispatcher: Send + Sync {
    async fn dispatch(&self, phase_id: PhaseId, asset_id: AssetId, params: serde_json::Value) -> PhaseAssetResult;
}

pub struct DriverPatchDispatcher<R> {
    resolver: Arc<R>,
}

impl<R: ConnectorResolver> DriverPatchDispatcher<R> {
    pub fn new(resolver: Arc<R>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl<R: ConnectorResolver> PatchDispatcher for DriverPatchDispatcher<R> {
    async fn dispatch(&self, phase_id: PhaseId, asset_id: AssetId, params: serde_json::Value) -> PhaseAssetResult {
        let failed = |error_message: String, before: Option<String>| PhaseAssetResult {
            phase_id,
            asset_id,
            status: PhaseAssetStatus::Failed,
            before_version: before,
            after_version: None,
            executor: "driver".to_string(),
            error_message: Some(error_message),
        };

        let (connector, asset) = match self.resolver.resolve_asset(asset_id).await {
            Ok(Some(pair)) => pair,
            Ok(None) => return failed("asset not found".to_string(), None),
            Err(e) => return failed(e, None),
        };

        let before_version = asset.image_version.clone();
        let mut driver = match fleet_connectors::build_driver(connector.platform, &connector.config_blob) {
            Ok(d) => d,
            Err(e) => return failed(e.to_string(), Some(before_version)),
        };

        if let Err(e) = driver.connect().await {
            return failed(e.to_string(), Some(before_version));
        }

        let op = with_retry("apply_patches", || {
            let asset_ref = asset.instance_ref.clone();
            let params = params.clone();
            let driver = &driver;
            async move { driver.apply_patches(&asset_ref, params).await }
        })
        .await;
        let _ = driver.close().await;

        match op {
            Ok(_op) => PhaseAssetResult {
                phase_id,
                asset_id,
                status: PhaseAssetStatus::Completed,
                before_version: Some(before_version),
                after_version: None,
                executor: connector.name.clone(),
                error_message: None,
            },
            Err(e) => failed(e.to_string(), Some(before_version)),
        }
    }
}
