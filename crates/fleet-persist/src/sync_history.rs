//! `SyncHistory` storage. A row is opened `running` at the start of a
//! worker's attempt and closed exactly once, `completed` or `failed`, never
//! mutated again.

use crate::error::PersistResult;
use chrono::{DateTime, Utc};
use fleet_proto::{ConnectorId, SyncCounts, SyncHistory, SyncHistoryId, SyncStatus, TriggerType};
use sqlx::{PgPool, Row};
use uuid::Uuid;

fn trigger_str(t: TriggerType) -> &'static str {
    match t {
        TriggerType::Scheduled => "scheduled",
        TriggerType::Manual => "manual",
    }
}

fn status_str(s: SyncStatus) -> &'static str {
    match s {
        SyncStatus::Running => "running",
        SyncStatus::Completed => "completed",
        SyncStatus::Failed => "failed",
    }
}

/// Opens a new history row with `status=running`. The id is generated by the
/// caller so it can be referenced before the insert returns.
pub async fn start(
    pool: &PgPool,
    connector_id: ConnectorId,
    started_at: DateTime<Utc>,
    trigger_type: TriggerType,
) -> PersistResult<SyncHistoryId> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        insert into sync_history (id, connector_id, started_at, status, trigger_type)
        values ($1, $2, $3, 'running', $4)
        "#,
    )
    .bind(id)
    .bind(connector_id)
    .bind(started_at)
    .bind(trigger_str(trigger_type))
    .execute(pool)
    .await?;
    Ok(id)
}

/// Closes a history row as `completed` with the reconciliation counts.
pub async fn complete(
    pool: &PgPool,
    id: SyncHistoryId,
    completed_at: DateTime<Utc>,
    duration_ms: i64,
    counts: SyncCounts,
) -> PersistResult<()> {
    sqlx::query(
        r#"
        update sync_history
           set completed_at = $2, duration_ms = $3, status = 'completed',
               discovered = $4, created = $5, updated = $6, removed = $7
         where id = $1
        "#,
    )
    .bind(id)
    .bind(completed_at)
    .bind(duration_ms)
    .bind(counts.discovered as i32)
    .bind(counts.created as i32)
    .bind(counts.updated as i32)
    .bind(counts.removed as i32)
    .execute(pool)
    .await?;
    Ok(())
}

/// Closes a history row as `failed` with a diagnostic message.
pub async fn fail(
    pool: &PgPool,
    id: SyncHistoryId,
    completed_at: DateTime<Utc>,
    duration_ms: i64,
    error_message: &str,
) -> PersistResult<()> {
    sqlx::query(
        r#"
        update sync_history
           set completed_at = $2, duration_ms = $3, status = 'failed', error_message = $4
         where id = $1
        "#,
    )
    .bind(id)
    .bind(completed_at)
    .bind(duration_ms)
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_for_connector(pool: &PgPool, connector_id: ConnectorId, limit: i64) -> PersistResult<Vec<SyncHistory>> {
    let rows = sqlx::query(
        r#"
        select id, connector_id, started_at, completed_at, duration_ms, status,
               discovered, created, updated, removed, trigger_type, error_message
        from sync_history
        where connector_id = $1
        order by started_at desc
        limit $2
        "#,
    )
    .bind(connector_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let status = match row.try_get::<String, _>("status")?.as_str() {
            "completed" => SyncStatus::Completed,
            "failed" => SyncStatus::Failed,
            _ => SyncStatus::Running,
        };
        let trigger_type = match row.try_get::<String, _>("trigger_type")?.as_str() {
            "manual" => TriggerType::Manual,
            _ => TriggerType::Scheduled,
        };
        out.push(SyncHistory {
            id: row.try_get("id")?,
            connector_id: row.try_get("connector_id")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            duration_ms: row.try_get("duration_ms")?,
            status,
            counts: SyncCounts {
                discovered: row.try_get::<i32, _>("discovered")? as u32,
                created: row.try_get::<i32, _>("created")? as u32,
                updated: row.try_get::<i32, _>("updated")? as u32,
                removed: row.try_get::<i32, _>("removed")? as u32,
            },
            trigger_type,
            error_message: row.try_get("error_message")?,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_trigger_round_trip_through_strings() {
        assert_eq!(status_str(SyncStatus::Completed), "completed");
        assert_eq!(trigger_str(TriggerType::Manual), "manual");
    }
}
