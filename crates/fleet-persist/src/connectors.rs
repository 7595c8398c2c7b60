//! Connector storage: the claim query at the heart of the sync scheduler's
//! cross-instance mutual exclusion, plus the post-sync bookkeeping writes.

use crate::error::PersistResult;
use chrono::{DateTime, Utc};
use fleet_proto::{Connector, ConnectorId, Platform, SyncStatus};
use sqlx::{PgPool, Row};

fn platform_from_str(s: &str) -> Platform {
    match s {
        "aws" => Platform::Aws,
        "azure" => Platform::Azure,
        "gcp" => Platform::Gcp,
        "vsphere" => Platform::VSphere,
        "k8s" => Platform::K8s,
        other => {
            tracing::warn!(platform = other, "unrecognized platform in storage, defaulting to aws");
            Platform::Aws
        }
    }
}

fn sync_status_from_str(s: Option<&str>) -> Option<SyncStatus> {
    match s {
        Some("completed") => Some(SyncStatus::Completed),
        Some("failed") => Some(SyncStatus::Failed),
        Some("running") => Some(SyncStatus::Running),
        _ => None,
    }
}

fn row_to_connector(row: &sqlx::postgres::PgRow) -> Result<Connector, sqlx::Error> {
    Ok(Connector {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        name: row.try_get("name")?,
        platform: platform_from_str(row.try_get::<String, _>("platform")?.as_str()),
        enabled: row.try_get("enabled")?,
        config_blob: row.try_get("config_blob")?,
        sync_schedule: row.try_get("sync_schedule")?,
        sync_enabled: row.try_get("sync_enabled")?,
        next_sync_at: row.try_get("next_sync_at")?,
        last_sync_at: row.try_get("last_sync_at")?,
        last_sync_status: sync_status_from_str(row.try_get::<Option<String>, _>("last_sync_status")?.as_deref()),
    })
}

/// How long a claimed row is held as "not due" before a crashed worker's
/// claim is eligible for reclaim by another instance. Comfortably longer
/// than `fleet_scheduler::DEFAULT_SYNC_TIMEOUT` (300s) so a healthy worker's
/// own `update_sync_result` always overwrites the lease before it expires.
const CLAIM_LEASE_SECONDS: f64 = 900.0;

/// Atomically claims up to `limit` due connectors for exclusive sync dispatch.
///
/// `enabled AND sync_enabled AND (next_sync_at IS NULL OR next_sync_at <= now)`,
/// ordered by `next_sync_at` ascending with NULLs first, selected with
/// `FOR UPDATE SKIP LOCKED` so concurrent scheduler instances never select the
/// same row — and, in the same statement, stamped with a claim lease
/// (`next_sync_at = now() + lease`) via an `UPDATE ... FROM` so the row stops
/// being "due" the instant this transaction commits, not just while its lock
/// is held. Without that stamp a second scheduler polling a moment later
/// would see the same rows as due again despite the row lock having already
/// released. `update_sync_result` overwrites this lease with the real
/// schedule-derived `next_sync_at` once the worker finishes.
pub async fn claim_due_connectors(pool: &PgPool, limit: i64) -> PersistResult<Vec<Connector>> {
    let rows = sqlx::query(
        r#"
        with due as (
            select id
            from connectors
            where enabled
              and sync_enabled
              and (next_sync_at is null or next_sync_at <= now())
            order by next_sync_at asc nulls first
            limit $1
            for update skip locked
        )
        update connectors
           set next_sync_at = now() + make_interval(secs => $2)
          from due
         where connectors.id = due.id
        returning connectors.id, connectors.org_id, connectors.name, connectors.platform,
                  connectors.enabled, connectors.config_blob, connectors.sync_schedule,
                  connectors.sync_enabled, connectors.next_sync_at, connectors.last_sync_at,
                  connectors.last_sync_status
        "#,
    )
    .bind(limit)
    .bind(CLAIM_LEASE_SECONDS)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(row_to_connector(row)?);
    }
    Ok(out)
}

pub async fn fetch_connector(pool: &PgPool, id: ConnectorId) -> PersistResult<Option<Connector>> {
    let row = sqlx::query(
        r#"
        select id, org_id, name, platform, enabled, config_blob, sync_schedule,
               sync_enabled, next_sync_at, last_sync_at, last_sync_status
        from connectors where id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_connector).transpose().map_err(Into::into)
}

/// Finds the first enabled connector for `(org_id, platform)`. The data model
/// has no direct asset-to-connector foreign key; this is the
/// resolution rule the campaign engine uses to pick the driver that owns a
/// given asset at patch-dispatch time.
pub async fn fetch_by_org_and_platform(pool: &PgPool, org_id: fleet_proto::OrgId, platform: Platform) -> PersistResult<Option<Connector>> {
    let row = sqlx::query(
        r#"
        select id, org_id, name, platform, enabled, config_blob, sync_schedule,
               sync_enabled, next_sync_at, last_sync_at, last_sync_status
        from connectors
        where org_id = $1 and platform = $2 and enabled
        order by name asc
        limit 1
        "#,
    )
    .bind(org_id)
    .bind(platform.as_str())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_connector).transpose().map_err(Into::into)
}

/// Writes the post-sync bookkeeping fields: `lastSyncStatus`, `lastSyncAt`,
/// and the next `nextSyncAt` computed by the caller from the schedule.
pub async fn update_sync_result(
    pool: &PgPool,
    id: ConnectorId,
    status: SyncStatus,
    last_sync_at: DateTime<Utc>,
    next_sync_at: DateTime<Utc>,
) -> PersistResult<()> {
    let status_str = match status {
        SyncStatus::Completed => "completed",
        SyncStatus::Failed => "failed",
        SyncStatus::Running => "running",
    };
    sqlx::query(
        r#"
        update connectors
           set last_sync_status = $2, last_sync_at = $3, next_sync_at = $4
         where id = $1
        "#,
    )
    .bind(id)
    .bind(status_str)
    .bind(last_sync_at)
    .bind(next_sync_at)
    .execute(pool)
    .await?;
    Ok(())
}
