//! Audit entry storage: the row-locked "latest entry per org" lookup that
//! makes [`fleet_audit::AuditSink::append`] race-free across instances, plus
//! ascending-order range reads for `VerifyRange`.

use crate::error::PersistResult;
use chrono::{DateTime, Utc};
use fleet_proto::{Actor, AuditEntry, AuditStatus, OrgId, Resource};
use sqlx::{PgPool, Postgres, Row, Transaction};

fn audit_status_from_str(s: &str) -> AuditStatus {
    match s {
        "failure" => AuditStatus::Failure,
        "denied" => AuditStatus::Denied,
        _ => AuditStatus::Success,
    }
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<AuditEntry, sqlx::Error> {
    Ok(AuditEntry {
        id: row.try_get("id")?,
        timestamp: row.try_get("timestamp")?,
        org_id: row.try_get("org_id")?,
        actor: Actor {
            actor_type: row.try_get("actor_type")?,
            id: row.try_get("actor_id")?,
            email: row.try_get("actor_email")?,
            ip: row.try_get("actor_ip")?,
        },
        action: row.try_get("action")?,
        category: row.try_get("category")?,
        resource: Resource {
            resource_type: row.try_get("resource_type")?,
            id: row.try_get("resource_id")?,
            name: row.try_get("resource_name")?,
        },
        changes: row.try_get("changes")?,
        context: row.try_get("context")?,
        risk_level: row.try_get("risk_level")?,
        status: audit_status_from_str(row.try_get::<String, _>("status")?.as_str()),
        integrity_hash: row.try_get("integrity_hash")?,
        previous_hash: row.try_get("previous_hash")?,
    })
}

/// Looks up the hash of the most recent audit entry for `org_id`, locking that
/// row (or the absence of one) for the duration of the caller's transaction so
/// no two concurrent appends in the same org can observe the same
/// `previous_hash`. Returns the empty string when the org has no entries yet.
pub async fn lock_latest_hash(tx: &mut Transaction<'_, Postgres>, org_id: OrgId) -> PersistResult<String> {
    let row = sqlx::query(
        r#"
        select integrity_hash from audit_entries
        where org_id = $1
        order by timestamp desc, id desc
        limit 1
        for update
        "#,
    )
    .bind(org_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(match row {
        Some(r) => r.try_get::<String, _>("integrity_hash")?,
        None => String::new(),
    })
}

pub async fn insert_entry(tx: &mut Transaction<'_, Postgres>, entry: &AuditEntry) -> PersistResult<()> {
    let status_str = match entry.status {
        AuditStatus::Success => "success",
        AuditStatus::Failure => "failure",
        AuditStatus::Denied => "denied",
    };
    sqlx::query(
        r#"
        insert into audit_entries
            (id, timestamp, org_id, actor_type, actor_id, actor_email, actor_ip,
             action, category, resource_type, resource_id, resource_name,
             changes, context, risk_level, status, integrity_hash, previous_hash)
        values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
        "#,
    )
    .bind(entry.id)
    .bind(entry.timestamp)
    .bind(entry.org_id)
    .bind(&entry.actor.actor_type)
    .bind(&entry.actor.id)
    .bind(&entry.actor.email)
    .bind(&entry.actor.ip)
    .bind(&entry.action)
    .bind(&entry.category)
    .bind(&entry.resource.resource_type)
    .bind(&entry.resource.id)
    .bind(&entry.resource.name)
    .bind(&entry.changes)
    .bind(&entry.context)
    .bind(&entry.risk_level)
    .bind(status_str)
    .bind(&entry.integrity_hash)
    .bind(&entry.previous_hash)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Reads entries for `org_id` with `timestamp` in `[start, end]`, ascending —
/// the order `VerifyRange` must walk in to recompute the hash chain.
pub async fn fetch_range(
    pool: &PgPool,
    org_id: OrgId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> PersistResult<Vec<AuditEntry>> {
    let rows = sqlx::query(
        r#"
        select id, timestamp, org_id, actor_type, actor_id, actor_email, actor_ip,
               action, category, resource_type, resource_id, resource_name,
               changes, context, risk_level, status, integrity_hash, previous_hash
        from audit_entries
        where org_id = $1 and timestamp between $2 and $3
        order by timestamp asc, id asc
        "#,
    )
    .bind(org_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(row_to_entry(row)?);
    }
    Ok(out)
}
