//! Asset Reconciler (spec §4.3): merges a connector's freshly discovered
//! assets into stored inventory by natural key, inside one transaction per
//! sync so a crash mid-reconciliation leaves inventory unchanged.

#![forbid(unsafe_code)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use fleet_proto::{Asset, NormalizedAsset, OrgId, Platform};
use fleet_persist::PersistResult;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

/// Stale assets are soft-deleted only after going unseen for this long, or
/// `2 * schedule_interval`, whichever is larger (spec §4.3).
pub const MIN_GRACE_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Counts produced by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SyncResult {
    pub assets_found: u32,
    pub assets_new: u32,
    pub assets_updated: u32,
    pub assets_removed: u32,
}

pub fn grace_window(schedule_interval: Duration) -> Duration {
    std::cmp::max(schedule_interval.saturating_mul(2), MIN_GRACE_WINDOW)
}

/// Merges `discovered` into the stored inventory for `(org_id, platform)`.
///
/// Discovered assets are upserted by natural key (account, region,
/// instance_ref). Stored assets not present in `discovered` are left alone
/// until they have gone unseen for at least the grace window, at which
/// point they are soft-deleted.
pub async fn reconcile(
    pool: &PgPool,
    org_id: OrgId,
    platform: Platform,
    schedule_interval: Duration,
    discovered: Vec<NormalizedAsset>,
    now: DateTime<Utc>,
) -> PersistResult<SyncResult> {
    let mut tx = pool.begin().await?;
    let mut current = fleet_persist::assets::load_current_assets(&mut tx, org_id, platform).await?;

    let mut result = SyncResult { assets_found: discovered.len() as u32, ..Default::default() };

    for n in discovered {
        let key = n.natural_key();
        match current.remove(&key) {
            Some(mut existing) => {
                existing.apply_discovered(&n, now);
                fleet_persist::assets::upsert_asset(&mut tx, &existing).await?;
                result.assets_updated += 1;
            }
            None => {
                let asset = Asset::from_normalized(Uuid::new_v4(), org_id, n, now);
                fleet_persist::assets::upsert_asset(&mut tx, &asset).await?;
                result.assets_new += 1;
            }
        }
    }

    let window = grace_window(schedule_interval);
    let cutoff = now - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::seconds(30 * 60));
    let stale_ids: Vec<_> = current
        .values()
        .filter(|a| a.last_seen_at < cutoff)
        .map(|a| a.id)
        .collect();
    if !stale_ids.is_empty() {
        fleet_persist::assets::soft_delete_stale(&mut tx, org_id, platform, &stale_ids, cutoff).await?;
        result.assets_removed = stale_ids.len() as u32;
    }

    tx.commit().await?;
    info!(
        org_id = %org_id, platform = %platform,
        found = result.assets_found, new = result.assets_new,
        updated = result.assets_updated, removed = result.assets_removed,
        "reconciliation complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_window_enforces_minimum() {
        assert_eq!(grace_window(Duration::from_secs(60)), MIN_GRACE_WINDOW);
    }

    #[test]
    fn grace_window_scales_with_schedule() {
        assert_eq!(grace_window(Duration::from_secs(3600)), Duration::from_secs(7200));
    }
}
