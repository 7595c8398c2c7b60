//! Asset inventory storage. Every reconciliation runs inside one transaction
//! so a crash mid-reconciliation leaves inventory unchanged.

use crate::error::PersistResult;
use chrono::{DateTime, Utc};
use fleet_proto::{Asset, AssetId, AssetNaturalKey, AssetState, OrgId, Platform};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;

fn platform_str(p: Platform) -> &'static str {
    p.as_str()
}

fn asset_state_str(s: AssetState) -> &'static str {
    match s {
        AssetState::Running => "running",
        AssetState::Stopped => "stopped",
        AssetState::Terminated => "terminated",
        AssetState::Pending => "pending",
        AssetState::Unknown => "unknown",
    }
}

fn asset_state_from_str(s: &str) -> AssetState {
    match s {
        "running" => AssetState::Running,
        "stopped" => AssetState::Stopped,
        "terminated" => AssetState::Terminated,
        "pending" => AssetState::Pending,
        _ => AssetState::Unknown,
    }
}

fn row_to_asset(row: &sqlx::postgres::PgRow) -> Result<Asset, sqlx::Error> {
    let tags_json: serde_json::Value = row.try_get("tags")?;
    let tags: HashMap<String, String> = serde_json::from_value(tags_json).unwrap_or_default();
    Ok(Asset {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        platform: match row.try_get::<String, _>("platform")?.as_str() {
            "aws" => Platform::Aws,
            "azure" => Platform::Azure,
            "gcp" => Platform::Gcp,
            "vsphere" => Platform::VSphere,
            _ => Platform::K8s,
        },
        account: row.try_get("account")?,
        region: row.try_get("region")?,
        instance_ref: row.try_get("instance_ref")?,
        name: row.try_get("name")?,
        image_ref: row.try_get("image_ref")?,
        image_version: row.try_get("image_version")?,
        state: asset_state_from_str(row.try_get::<String, _>("state")?.as_str()),
        tags,
        last_seen_at: row.try_get("last_seen_at")?,
        is_deleted: row.try_get("is_deleted")?,
    })
}

/// Loads the current non-deleted asset set for `(org_id, platform)`, keyed by
/// natural key, within the caller's transaction.
pub async fn load_current_assets(
    tx: &mut Transaction<'_, Postgres>,
    org_id: OrgId,
    platform: Platform,
) -> PersistResult<HashMap<AssetNaturalKey, Asset>> {
    let rows = sqlx::query(
        r#"
        select id, org_id, platform, account, region, instance_ref, name,
               image_ref, image_version, state, tags, last_seen_at, is_deleted
        from assets
        where org_id = $1 and platform = $2 and not is_deleted
        "#,
    )
    .bind(org_id)
    .bind(platform_str(platform))
    .fetch_all(&mut **tx)
    .await?;

    let mut out = HashMap::with_capacity(rows.len());
    for row in &rows {
        let asset = row_to_asset(row)?;
        out.insert(asset.natural_key(), asset);
    }
    Ok(out)
}

pub async fn upsert_asset(tx: &mut Transaction<'_, Postgres>, asset: &Asset) -> PersistResult<()> {
    let tags_json = serde_json::to_value(&asset.tags)?;
    sqlx::query(
        r#"
        insert into assets
            (id, org_id, platform, account, region, instance_ref, name,
             image_ref, image_version, state, tags, last_seen_at, is_deleted)
        values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
        on conflict (org_id, platform, account, region, instance_ref) do update set
            name = excluded.name,
            image_ref = excluded.image_ref,
            image_version = excluded.image_version,
            state = excluded.state,
            tags = excluded.tags,
            last_seen_at = excluded.last_seen_at,
            is_deleted = excluded.is_deleted
        "#,
    )
    .bind(asset.id)
    .bind(asset.org_id)
    .bind(platform_str(asset.platform))
    .bind(&asset.account)
    .bind(&asset.region)
    .bind(&asset.instance_ref)
    .bind(&asset.name)
    .bind(&asset.image_ref)
    .bind(&asset.image_version)
    .bind(asset_state_str(asset.state))
    .bind(tags_json)
    .bind(asset.last_seen_at)
    .bind(asset.is_deleted)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Loads a fixed set of assets by id, outside any reconciliation transaction —
/// used by the campaign engine to resolve `(platform, account)` for dispatch.
pub async fn fetch_by_ids(pool: &PgPool, ids: &[AssetId]) -> PersistResult<Vec<Asset>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query(
        r#"
        select id, org_id, platform, account, region, instance_ref, name,
               image_ref, image_version, state, tags, last_seen_at, is_deleted
        from assets
        where id = any($1)
        "#,
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(row_to_asset(row)?);
    }
    Ok(out)
}

/// Soft-deletes assets whose `last_seen_at` is older than `cutoff`.
pub async fn soft_delete_stale(
    tx: &mut Transaction<'_, Postgres>,
    org_id: OrgId,
    platform: Platform,
    ids: &[fleet_proto::AssetId],
    _cutoff: DateTime<Utc>,
) -> PersistResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        r#"
        update assets set is_deleted = true
        where org_id = $1 and platform = $2 and id = any($3)
        "#,
    )
    .bind(org_id)
    .bind(platform_str(platform))
    .bind(ids)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
