//! Campaign storage: compare-and-swap status transitions, phase and
//! phase-asset-result persistence, rollback records, and the durable
//! per-campaign signal queue.

use crate::error::{PersistError, PersistResult};
use chrono::{DateTime, Utc};
use fleet_proto::{
    Campaign, CampaignCounts, CampaignId, CampaignStatus, CampaignStrategy, Phase, PhaseAssetResult, PhaseId,
    PhaseStatus, PhaseType, RollbackRecord,
};
use sqlx::{PgPool, Row};

fn strategy_str(s: CampaignStrategy) -> &'static str {
    match s {
        CampaignStrategy::Immediate => "immediate",
        CampaignStrategy::Canary => "canary",
        CampaignStrategy::Rolling => "rolling",
        CampaignStrategy::BlueGreen => "blue_green",
    }
}

fn status_from_str(s: &str) -> CampaignStatus {
    match s {
        "pendingApproval" => CampaignStatus::PendingApproval,
        "approved" => CampaignStatus::Approved,
        "inProgress" => CampaignStatus::InProgress,
        "paused" => CampaignStatus::Paused,
        "completed" => CampaignStatus::Completed,
        "failed" => CampaignStatus::Failed,
        "rolledBack" => CampaignStatus::RolledBack,
        "cancelled" => CampaignStatus::Cancelled,
        _ => CampaignStatus::Draft,
    }
}

fn strategy_from_str(s: &str) -> CampaignStrategy {
    match s {
        "canary" => CampaignStrategy::Canary,
        "rolling" => CampaignStrategy::Rolling,
        "blue_green" => CampaignStrategy::BlueGreen,
        _ => CampaignStrategy::Immediate,
    }
}

fn phase_type_str(t: PhaseType) -> &'static str {
    match t {
        PhaseType::Preflight => "preflight",
        PhaseType::Canary => "canary",
        PhaseType::Wave => "wave",
        PhaseType::Final => "final",
        PhaseType::Validation => "validation",
    }
}

fn phase_type_from_str(s: &str) -> PhaseType {
    match s {
        "preflight" => PhaseType::Preflight,
        "canary" => PhaseType::Canary,
        "wave" => PhaseType::Wave,
        "validation" => PhaseType::Validation,
        _ => PhaseType::Final,
    }
}

fn phase_status_str(s: PhaseStatus) -> &'static str {
    match s {
        PhaseStatus::Pending => "pending",
        PhaseStatus::InProgress => "inProgress",
        PhaseStatus::HealthCheck => "healthCheck",
        PhaseStatus::Completed => "completed",
        PhaseStatus::Failed => "failed",
        PhaseStatus::RolledBack => "rolledBack",
    }
}

fn phase_status_from_str(s: &str) -> PhaseStatus {
    match s {
        "inProgress" => PhaseStatus::InProgress,
        "healthCheck" => PhaseStatus::HealthCheck,
        "completed" => PhaseStatus::Completed,
        "failed" => PhaseStatus::Failed,
        "rolledBack" => PhaseStatus::RolledBack,
        _ => PhaseStatus::Pending,
    }
}

fn row_to_campaign(row: &sqlx::postgres::PgRow) -> Result<Campaign, sqlx::Error> {
    Ok(Campaign {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        name: row.try_get("name")?,
        campaign_type: row.try_get("campaign_type")?,
        status: status_from_str(row.try_get::<String, _>("status")?.as_str()),
        strategy: strategy_from_str(row.try_get::<String, _>("strategy")?.as_str()),
        canary_pct: row.try_get::<i16, _>("canary_pct")? as u8,
        wave_pct: row.try_get::<i16, _>("wave_pct")? as u8,
        failure_threshold_pct: row.try_get::<i16, _>("failure_threshold_pct")? as u8,
        rollback_threshold_pct: row.try_get::<i16, _>("rollback_threshold_pct")? as u8,
        health_check_enabled: row.try_get("health_check_enabled")?,
        auto_rollback_enabled: row.try_get("auto_rollback_enabled")?,
        requires_approval: row.try_get("requires_approval")?,
        counts: CampaignCounts::default(),
        created_by: row.try_get("created_by")?,
        approved_by: row.try_get("approved_by")?,
    })
}

/// Inserts a freshly created campaign row in its initial status.
pub async fn insert_campaign(pool: &PgPool, c: &Campaign) -> PersistResult<()> {
    sqlx::query(
        r#"
        insert into campaigns
            (id, org_id, name, campaign_type, status, strategy, canary_pct, wave_pct,
             failure_threshold_pct, rollback_threshold_pct, health_check_enabled,
             auto_rollback_enabled, requires_approval, created_by, approved_by)
        values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
        "#,
    )
    .bind(c.id)
    .bind(c.org_id)
    .bind(&c.name)
    .bind(&c.campaign_type)
    .bind(status_str(c.status))
    .bind(strategy_str(c.strategy))
    .bind(c.canary_pct as i16)
    .bind(c.wave_pct as i16)
    .bind(c.failure_threshold_pct as i16)
    .bind(c.rollback_threshold_pct as i16)
    .bind(c.health_check_enabled)
    .bind(c.auto_rollback_enabled)
    .bind(c.requires_approval)
    .bind(&c.created_by)
    .bind(&c.approved_by)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_campaign(pool: &PgPool, id: CampaignId) -> PersistResult<Option<Campaign>> {
    let row = sqlx::query(
        r#"
        select id, org_id, name, campaign_type, status, strategy, canary_pct, wave_pct,
               failure_threshold_pct, rollback_threshold_pct, health_check_enabled,
               auto_rollback_enabled, requires_approval, created_by, approved_by
        from campaigns where id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_campaign).transpose().map_err(Into::into)
}

/// Persists every phase of a freshly generated plan, in one call, before
/// anything is emitted about the campaign starting, so phases are always
/// durable by the time a started event could reach an external listener.
pub async fn insert_phases(pool: &PgPool, phases: &[Phase]) -> PersistResult<()> {
    for p in phases {
        sqlx::query(
            r#"
            insert into phases
                (id, campaign_id, "order", name, phase_type, status, asset_ids, target_pct, health_check_passed)
            values ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
        )
        .bind(p.id)
        .bind(p.campaign_id)
        .bind(p.order as i32)
        .bind(&p.name)
        .bind(phase_type_str(p.phase_type))
        .bind(phase_status_str(p.status))
        .bind(&p.asset_ids)
        .bind(p.target_pct as i16)
        .bind(p.health_check_passed)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn fetch_phases(pool: &PgPool, campaign_id: CampaignId) -> PersistResult<Vec<Phase>> {
    let rows = sqlx::query(
        r#"
        select id, campaign_id, "order", name, phase_type, status, asset_ids, target_pct, health_check_passed
        from phases where campaign_id = $1 order by "order" asc
        "#,
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(Phase {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            order: row.try_get::<i32, _>("order")? as u32,
            name: row.try_get("name")?,
            phase_type: phase_type_from_str(row.try_get::<String, _>("phase_type")?.as_str()),
            status: phase_status_from_str(row.try_get::<String, _>("status")?.as_str()),
            asset_ids: row.try_get("asset_ids")?,
            target_pct: row.try_get::<i16, _>("target_pct")? as u8,
            counts: CampaignCounts::default(),
            health_check_passed: row.try_get("health_check_passed")?,
        });
    }
    Ok(out)
}

/// Updates a phase's status (and, once known, whether its health check
/// passed). Not a CAS — phase transitions are driven by the single campaign
/// task that owns execution, not by concurrent writers.
pub async fn update_phase_status(
    pool: &PgPool,
    phase_id: PhaseId,
    status: PhaseStatus,
    health_check_passed: Option<bool>,
) -> PersistResult<()> {
    sqlx::query(
        r#"update phases set status = $2, health_check_passed = coalesce($3, health_check_passed) where id = $1"#,
    )
    .bind(phase_id)
    .bind(phase_status_str(status))
    .bind(health_check_passed)
    .execute(pool)
    .await?;
    Ok(())
}

fn status_str(s: CampaignStatus) -> &'static str {
    match s {
        CampaignStatus::Draft => "draft",
        CampaignStatus::PendingApproval => "pendingApproval",
        CampaignStatus::Approved => "approved",
        CampaignStatus::InProgress => "inProgress",
        CampaignStatus::Paused => "paused",
        CampaignStatus::Completed => "completed",
        CampaignStatus::Failed => "failed",
        CampaignStatus::RolledBack => "rolledBack",
        CampaignStatus::Cancelled => "cancelled",
    }
}

/// Compare-and-swap transition: succeeds only if the row's current status
/// equals `from` and is not already terminal. Any transition attempted from a
/// terminal state is rejected.
pub async fn cas_transition(
    pool: &PgPool,
    id: CampaignId,
    from: CampaignStatus,
    to: CampaignStatus,
) -> PersistResult<()> {
    let row = sqlx::query(
        r#"
        update campaigns set status = $3
        where id = $1 and status = $2
        returning id
        "#,
    )
    .bind(id)
    .bind(status_str(from))
    .bind(status_str(to))
    .fetch_optional(pool)
    .await?;

    if row.is_none() {
        return Err(PersistError::Conflict(format!(
            "campaign {id} not in expected state {} (or already terminal)",
            status_str(from)
        )));
    }
    Ok(())
}

pub async fn record_phase_asset_result(pool: &PgPool, r: &PhaseAssetResult) -> PersistResult<()> {
    let status_str = match r.status {
        fleet_proto::PhaseAssetStatus::Completed => "completed",
        fleet_proto::PhaseAssetStatus::Failed => "failed",
        fleet_proto::PhaseAssetStatus::Skipped => "skipped",
    };
    sqlx::query(
        r#"
        insert into phase_asset_results
            (phase_id, asset_id, status, before_version, after_version, executor, error_message)
        values ($1,$2,$3,$4,$5,$6,$7)
        "#,
    )
    .bind(r.phase_id)
    .bind(r.asset_id)
    .bind(status_str)
    .bind(&r.before_version)
    .bind(&r.after_version)
    .bind(&r.executor)
    .bind(&r.error_message)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_rollback(pool: &PgPool, r: &RollbackRecord) -> PersistResult<()> {
    let trigger_str = match r.trigger_type {
        fleet_proto::RollbackTriggerType::Automatic => "automatic",
        fleet_proto::RollbackTriggerType::Manual => "manual",
        fleet_proto::RollbackTriggerType::HealthCheck => "healthCheck",
        fleet_proto::RollbackTriggerType::Timeout => "timeout",
    };
    let scope_str = match r.scope {
        fleet_proto::RollbackScope::Asset => "asset",
        fleet_proto::RollbackScope::Phase => "phase",
        fleet_proto::RollbackScope::Campaign => "campaign",
    };
    sqlx::query(
        r#"
        insert into rollback_records
            (campaign_id, timestamp, trigger_type, scope, phase_id, asset_ids, reason, success, rolled_back_count)
        values ($1,$2,$3,$4,$5,$6,$7,$8,$9)
        "#,
    )
    .bind(r.campaign_id)
    .bind(r.timestamp)
    .bind(trigger_str)
    .bind(scope_str)
    .bind(r.phase_id)
    .bind(&r.asset_ids)
    .bind(&r.reason)
    .bind(r.success)
    .bind(r.rolled_back_count as i64)
    .execute(pool)
    .await?;
    Ok(())
}

/// A durably-queued signal delivered to a running campaign: `approve`,
/// `reject`, `pause`, `resume`, `cancel`. At-least-once delivery, FIFO per
/// campaign — `enqueue_signal`/`drain_signals` is the queue's whole contract.
#[derive(Debug, Clone)]
pub struct CampaignSignal {
    pub id: i64,
    pub campaign_id: CampaignId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
}

pub async fn enqueue_signal(
    pool: &PgPool,
    campaign_id: CampaignId,
    kind: &str,
    payload: serde_json::Value,
) -> PersistResult<()> {
    sqlx::query(
        r#"insert into campaign_signals (campaign_id, kind, payload, enqueued_at) values ($1,$2,$3,now())"#,
    )
    .bind(campaign_id)
    .bind(kind)
    .bind(payload)
    .execute(pool)
    .await?;
    Ok(())
}

/// Claims (deletes-and-returns, in FIFO order) every pending signal for a
/// campaign. Called at each checkpoint in the execution loop.
pub async fn drain_signals(pool: &PgPool, campaign_id: CampaignId) -> PersistResult<Vec<CampaignSignal>> {
    let rows = sqlx::query(
        r#"
        delete from campaign_signals
        where id in (
            select id from campaign_signals
            where campaign_id = $1
            order by id asc
            for update skip locked
        )
        returning id, campaign_id, kind, payload, enqueued_at
        "#,
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(CampaignSignal {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            kind: row.try_get("kind")?,
            payload: row.try_get("payload")?,
            enqueued_at: row.try_get("enqueued_at")?,
        });
    }
    Ok(out)
}
