//! The per-sync worker body: `Connect → DiscoverAssets → Reconcile`, closed
//! out by exactly one `SyncHistory` row and one connector bookkeeping write.
//! Never retried from inside the worker — a failure just lets
//! the next poll tick reconsider the connector.

use std::time::Duration;

use chrono::Utc;
use fleet_observe::FleetMetrics;
use fleet_persist::PgPool;
use fleet_proto::{Connector, SyncStatus, TriggerType};
use tracing::{error, info, warn};

use crate::error::SchedulerResult;

pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(300);

pub async fn run_sync(
    pool: &PgPool,
    connector: &Connector,
    trigger: TriggerType,
    timeout: Duration,
    metrics: &FleetMetrics,
) -> SchedulerResult<()> {
    let started_at = Utc::now();
    metrics.sync_total.inc();
    let history_id = fleet_persist::sync_history::start(pool, connector.id, started_at, trigger).await?;

    let outcome = tokio::time::timeout(timeout, run_discovery_and_reconcile(pool, connector)).await;

    let completed_at = Utc::now();
    let duration_ms = (completed_at - started_at).num_milliseconds().max(0);
    let schedule_interval = fleet_config::parse_schedule(&connector.sync_schedule);
    let next_sync_at = completed_at + chrono::Duration::from_std(schedule_interval).unwrap_or(chrono::Duration::hours(1));

    match outcome {
        Ok(Ok(result)) => {
            fleet_persist::sync_history::complete(
                pool,
                history_id,
                completed_at,
                duration_ms,
                fleet_proto::SyncCounts {
                    discovered: result.assets_found,
                    created: result.assets_new,
                    updated: result.assets_updated,
                    removed: result.assets_removed,
                },
            )
            .await?;
            fleet_persist::connectors::update_sync_result(pool, connector.id, SyncStatus::Completed, completed_at, next_sync_at).await?;
            metrics.reconcile_assets_created.add(result.assets_new as u64);
            metrics.reconcile_assets_updated.add(result.assets_updated as u64);
            metrics.reconcile_assets_removed.add(result.assets_removed as u64);
            info!(connector_id = %connector.id, found = result.assets_found, new = result.assets_new, "sync completed");
        }
        Ok(Err(e)) => {
            warn!(connector_id = %connector.id, error = %e, "sync failed");
            fleet_persist::sync_history::fail(pool, history_id, completed_at, duration_ms, &e).await?;
            fleet_persist::connectors::update_sync_result(pool, connector.id, SyncStatus::Failed, completed_at, next_sync_at).await?;
            metrics.sync_failed.inc();
        }
        Err(_elapsed) => {
            error!(connector_id = %connector.id, "sync exceeded deadline of {:?}", timeout);
            fleet_persist::sync_history::fail(pool, history_id, completed_at, duration_ms, "sync exceeded per-job deadline").await?;
            fleet_persist::connectors::update_sync_result(pool, connector.id, SyncStatus::Failed, completed_at, next_sync_at).await?;
            metrics.sync_failed.inc();
        }
    }
    Ok(())
}

/// The part of the worker that can time out: connect, discover, reconcile.
/// Returns `Err(String)` rather than a typed error since the caller only
/// needs a diagnostic message for `SyncHistory.error_message`.
async fn run_discovery_and_reconcile(pool: &PgPool, connector: &Connector) -> Result<fleet_reconcile::SyncResult, String> {
    let mut driver = fleet_connectors::build_driver(connector.platform, &connector.config_blob).map_err(|e| e.to_string())?;
    driver.connect().await.map_err(|e| e.to_string())?;
    let discovered = driver.discover_assets(connector.org_id).await.map_err(|e| e.to_string());
    let _ = driver.close().await;
    let discovered = discovered?;

    let schedule_interval = fleet_config::parse_schedule(&connector.sync_schedule);
    fleet_reconcile::reconcile(pool, connector.org_id, connector.platform, schedule_interval, discovered, Utc::now())
        .await
        .map_err(|e| e.to_string())
}
