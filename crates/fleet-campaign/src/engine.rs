//! The execution loop: a durable state machine that must survive
//! process restarts without re-running completed side effects. Backed here
//! by transactional state persistence plus idempotent activities — phases
//! and their asset results are read back from the [`CampaignStore`] at the
//! start of [`CampaignEngine::run`], and any phase already `completed`,
//! `failed`, or `rolledBack` is skipped rather than re-executed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleet_audit::{AuditSink, NewAuditEntry};
use fleet_notify::{Event, NotifyDispatcher};
use fleet_observe::FleetMetrics;
use fleet_proto::{
    Actor, AssetId, AuditStatus, Campaign, CampaignId, CampaignStatus, OrgId, Phase, PhaseAssetStatus, PhaseId,
    PhaseStatus, Resource, RollbackRecord, RollbackScope, RollbackTriggerType,
};
use tracing::{info, warn};

use crate::dispatch::PatchDispatcher;
use crate::error::{CampaignError, CampaignResult};
use crate::health::HealthChecker;
use crate::phases::generate_phases;
use crate::rollback::{RollbackExecutor, RollbackOutcome};
use crate::store::CampaignStore;

/// Default per-campaign wait for an approval/rejection signal before the
/// campaign is auto-cancelled.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
/// How often a paused campaign re-checks for resume/cancel.
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// How often a pending-approval campaign re-checks its signal queue.
const APPROVAL_POLL_INTERVAL: Duration = Duration::from_secs(60);
/// Default per-health-check timeout, passed through to the health collaborator.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(120);
/// Bounded per-phase dispatch concurrency.
const PHASE_DISPATCH_CONCURRENCY: usize = 10;

enum Checkpoint {
    Continue,
    Cancel,
}

pub struct CampaignEngine {
    store: Arc<dyn CampaignStore>,
    dispatcher: Arc<dyn PatchDispatcher>,
    health: Arc<dyn HealthChecker>,
    rollback: Arc<dyn RollbackExecutor>,
    notify: Arc<NotifyDispatcher>,
    audit: Arc<AuditSink>,
    metrics: Arc<FleetMetrics>,
}

impl CampaignEngine {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        dispatcher: Arc<dyn PatchDispatcher>,
        health: Arc<dyn HealthChecker>,
        rollback: Arc<dyn RollbackExecutor>,
        notify: Arc<NotifyDispatcher>,
        audit: Arc<AuditSink>,
        metrics: Arc<FleetMetrics>,
    ) -> Self {
        Self { store, dispatcher, health, rollback, notify, audit, metrics }
    }

    /// Creates a campaign: persists it in `draft`, generates and persists its
    /// phase plan (phases are durable before anything is emitted about the
    /// campaign starting), then advances it to
    /// `pendingApproval` or `inProgress` per `requiresApproval`.
    pub async fn create_campaign(&self, mut campaign: Campaign, asset_ids: &[AssetId]) -> CampaignResult<Campaign> {
        campaign.status = CampaignStatus::Draft;
        self.store.insert_campaign(&campaign).await?;

        let phases = generate_phases(campaign.id, asset_ids, campaign.strategy, campaign.canary_pct, campaign.wave_pct);
        self.store.insert_phases(&phases).await?;

        let next = if campaign.requires_approval { CampaignStatus::PendingApproval } else { CampaignStatus::InProgress };
        self.store.cas_transition(campaign.id, CampaignStatus::Draft, next).await?;
        campaign.status = next;

        if next == CampaignStatus::PendingApproval {
            self.notify
                .emit(Event::TaskPendingApproval {
                    timestamp: Utc::now(),
                    task_id: campaign.id,
                    task_type: campaign.campaign_type.clone(),
                    environment: campaign.name.clone(),
                    risk_level: "medium".to_string(),
                    summary: format!("campaign {} awaiting approval ({} phases)", campaign.name, phases.len()),
                })
                .await;
        } else {
            self.emit_started(&campaign, phases.len() as u32).await;
        }

        Ok(campaign)
    }

    pub async fn submit_signal(&self, campaign_id: CampaignId, kind: &str, payload: serde_json::Value) -> CampaignResult<()> {
        self.store.enqueue_signal(campaign_id, kind, payload).await
    }

    /// Drives a campaign from its current persisted state to a terminal
    /// state (or returns early if it's paused/pending and needs a later
    /// signal). Safe to call again after a process restart — it resumes
    /// from whatever phase statuses are on disk.
    pub async fn run(&self, campaign_id: CampaignId) -> CampaignResult<()> {
        let mut campaign = self.store.fetch_campaign(campaign_id).await?.ok_or(CampaignError::InvalidTransition(campaign_id))?;

        if campaign.status == CampaignStatus::PendingApproval {
            if !self.await_approval(&campaign).await? {
                return Ok(());
            }
            campaign = self.store.fetch_campaign(campaign_id).await?.ok_or(CampaignError::InvalidTransition(campaign_id))?;
        }

        if campaign.status == CampaignStatus::Approved {
            self.store.cas_transition(campaign_id, CampaignStatus::Approved, CampaignStatus::InProgress).await?;
            campaign.status = CampaignStatus::InProgress;
            let phases = self.store.fetch_phases(campaign_id).await?;
            self.emit_started(&campaign, phases.len() as u32).await;
        }

        if campaign.status != CampaignStatus::InProgress {
            return Ok(());
        }

        let phases = self.store.fetch_phases(campaign_id).await?;
        let total_assets: u32 = phases.iter().map(|p| p.asset_ids.len() as u32).sum();
        let mut total_failed = 0u32;

        for phase in phases {
            if matches!(phase.status, PhaseStatus::Completed | PhaseStatus::Failed | PhaseStatus::RolledBack) {
                total_failed += phase.counts.failed;
                continue;
            }

            match self.checkpoint(campaign_id, campaign.org_id).await? {
                Checkpoint::Cancel => {
                    self.cancel_from_current(campaign_id).await?;
                    self.finalize(campaign_id, CampaignStatus::Cancelled).await?;
                    return Ok(());
                }
                Checkpoint::Continue => {}
            }

            self.store.update_phase_status(phase.id, PhaseStatus::InProgress, None).await?;
            self.notify
                .emit(Event::PhaseStarted { timestamp: Utc::now(), task_id: campaign_id, phase_id: phase.id, name: phase.name.clone() })
                .await;

            let results = self.dispatch_phase(&phase).await;
            for r in &results {
                self.store.record_phase_asset_result(r).await?;
            }
            let failed_in_phase = results.iter().filter(|r| r.status == PhaseAssetStatus::Failed).count() as u32;
            total_failed += failed_in_phase;

            if self.threshold_exceeded(&campaign, total_failed, total_assets, campaign.rollback_threshold_pct) && campaign.auto_rollback_enabled {
                let outcome = self.rollback.rollback(&phase.asset_ids, "cumulative failure rate over rollback threshold").await;
                self.record_rollback(&campaign, Some(phase.id), RollbackScope::Phase, &phase.asset_ids, "cumulative failure rate over rollback threshold", &outcome)
                    .await?;
                self.store.update_phase_status(phase.id, PhaseStatus::RolledBack, None).await?;
                self.metrics.campaign_rollback_total.inc();

                if self.threshold_exceeded(&campaign, total_failed, total_assets, campaign.failure_threshold_pct) {
                    self.store.cas_transition(campaign_id, CampaignStatus::InProgress, CampaignStatus::Failed).await?;
                    self.finalize(campaign_id, CampaignStatus::Failed).await?;
                    return Ok(());
                }
                continue;
            }

            if !campaign.health_check_enabled {
                self.store.update_phase_status(phase.id, PhaseStatus::Completed, None).await?;
                self.metrics.campaign_phase_completed.inc();
                self.notify
                    .emit(Event::PhaseCompleted { timestamp: Utc::now(), task_id: campaign_id, phase_id: phase.id, name: phase.name.clone(), status: "completed".to_string() })
                    .await;
                continue;
            }

            self.store.update_phase_status(phase.id, PhaseStatus::HealthCheck, None).await?;
            let report = self.health.check(&phase.asset_ids, DEFAULT_HEALTH_CHECK_TIMEOUT).await;

            if report.failure_rate == 0.0 {
                self.store.update_phase_status(phase.id, PhaseStatus::Completed, Some(true)).await?;
                self.metrics.campaign_phase_completed.inc();
                self.notify
                    .emit(Event::PhaseCompleted { timestamp: Utc::now(), task_id: campaign_id, phase_id: phase.id, name: phase.name.clone(), status: "completed".to_string() })
                    .await;
                continue;
            }

            if campaign.auto_rollback_enabled {
                let outcome = self.rollback.rollback(&phase.asset_ids, "health check failed").await;
                self.record_rollback(&campaign, Some(phase.id), RollbackScope::Phase, &phase.asset_ids, "health check failed", &outcome).await?;
                self.store.update_phase_status(phase.id, PhaseStatus::RolledBack, Some(false)).await?;
                self.metrics.campaign_rollback_total.inc();

                if report.failure_rate * 100.0 > campaign.failure_threshold_pct as f64 {
                    self.store.cas_transition(campaign_id, CampaignStatus::InProgress, CampaignStatus::Failed).await?;
                    self.finalize(campaign_id, CampaignStatus::Failed).await?;
                    return Ok(());
                }
            } else {
                self.store.update_phase_status(phase.id, PhaseStatus::Failed, Some(false)).await?;
                self.metrics.campaign_phase_failed.inc();
                self.notify
                    .emit(Event::PhaseFailed { timestamp: Utc::now(), task_id: campaign_id, phase_id: phase.id, name: phase.name.clone(), error: "health check failed".to_string() })
                    .await;
            }
        }

        self.store.cas_transition(campaign_id, CampaignStatus::InProgress, CampaignStatus::Completed).await?;
        self.finalize(campaign_id, CampaignStatus::Completed).await?;
        Ok(())
    }

    fn threshold_exceeded(&self, _campaign: &Campaign, failed: u32, total: u32, threshold_pct: u8) -> bool {
        if total == 0 {
            return false;
        }
        (failed as f64 / total as f64) * 100.0 >= threshold_pct as f64
    }

    async fn dispatch_phase(&self, phase: &Phase) -> Vec<fleet_proto::PhaseAssetResult> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(PHASE_DISPATCH_CONCURRENCY));
        let mut handles = Vec::with_capacity(phase.asset_ids.len());
        for asset_id in phase.asset_ids.clone() {
            let dispatcher = self.dispatcher.clone();
            let semaphore = semaphore.clone();
            let phase_id = phase.id;
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                dispatcher.dispatch(phase_id, asset_id, serde_json::Value::Null).await
            }));
        }
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(result) = handle.await {
                results.push(result);
            } else {
                warn!("phase dispatch task panicked");
            }
        }
        results
    }

    /// Drains pause/cancel signals and, if paused, blocks (persisting
    /// `paused`) until a resume or cancel arrives. Approve/reject signals
    /// arriving here are stale — the campaign already left `pendingApproval`
    /// — so they're ignored with a best-effort audit entry, since approval
    /// is idempotent and subsequent signals must not change outcome.
    async fn checkpoint(&self, campaign_id: CampaignId, org_id: OrgId) -> CampaignResult<Checkpoint> {
        let signals = self.store.drain_signals(campaign_id).await?;
        let mut should_pause = false;
        for s in &signals {
            match s.kind.as_str() {
                "cancel" => return Ok(Checkpoint::Cancel),
                "pause" => should_pause = true,
                "resume" => should_pause = false,
                "approve" | "reject" => self.audit_stale_signal(campaign_id, org_id, &s.kind),
                _ => {}
            }
        }
        if !should_pause {
            return Ok(Checkpoint::Continue);
        }

        self.store.cas_transition(campaign_id, CampaignStatus::InProgress, CampaignStatus::Paused).await?;
        info!(campaign_id = %campaign_id, "campaign paused at phase checkpoint");
        loop {
            tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
            let more = self.store.drain_signals(campaign_id).await?;
            let mut resumed = false;
            for s in &more {
                match s.kind.as_str() {
                    "cancel" => return Ok(Checkpoint::Cancel),
                    "resume" => resumed = true,
                    _ => {}
                }
            }
            if resumed {
                self.store.cas_transition(campaign_id, CampaignStatus::Paused, CampaignStatus::InProgress).await?;
                info!(campaign_id = %campaign_id, "campaign resumed");
                return Ok(Checkpoint::Continue);
            }
        }
    }

    fn audit_stale_signal(&self, campaign_id: CampaignId, org_id: OrgId, kind: &str) {
        warn!(campaign_id = %campaign_id, kind, "ignoring stale approval signal outside pendingApproval");
        self.audit.append_best_effort(NewAuditEntry {
            org_id,
            actor: Actor { actor_type: "system".to_string(), id: "campaign-engine".to_string(), email: None, ip: None },
            action: format!("campaign.signal.{kind}.ignored"),
            category: "campaign".to_string(),
            resource: Resource { resource_type: "campaign".to_string(), id: Some(campaign_id.to_string()), name: None },
            changes: None,
            context: Some(serde_json::json!({"reason": "signal arrived outside pendingApproval; approval is idempotent"})),
            risk_level: "low".to_string(),
            status: AuditStatus::Denied,
        });
    }

    async fn await_approval(&self, campaign: &Campaign) -> CampaignResult<bool> {
        let campaign_id = campaign.id;
        let deadline = tokio::time::Instant::now() + DEFAULT_APPROVAL_TIMEOUT;
        loop {
            let signals = self.store.drain_signals(campaign_id).await?;
            for s in &signals {
                match s.kind.as_str() {
                    "approve" => {
                        let user_id = s.payload.get("approvedBy").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
                        self.store.cas_transition(campaign_id, CampaignStatus::PendingApproval, CampaignStatus::Approved).await?;
                        self.notify.emit(Event::TaskApproved { timestamp: Utc::now(), task_id: campaign_id, user_id, reason: None }).await;
                        return Ok(true);
                    }
                    "reject" => {
                        let user_id = s.payload.get("approvedBy").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
                        let reason = s.payload.get("reason").and_then(|v| v.as_str()).map(String::from);
                        self.store.cas_transition(campaign_id, CampaignStatus::PendingApproval, CampaignStatus::Cancelled).await?;
                        self.notify.emit(Event::TaskRejected { timestamp: Utc::now(), task_id: campaign_id, user_id, reason }).await;
                        self.finalize(campaign_id, CampaignStatus::Cancelled).await?;
                        return Ok(false);
                    }
                    _ => {}
                }
            }
            if tokio::time::Instant::now() >= deadline {
                self.store.cas_transition(campaign_id, CampaignStatus::PendingApproval, CampaignStatus::Cancelled).await?;
                self.finalize(campaign_id, CampaignStatus::Cancelled).await?;
                warn!(campaign_id = %campaign_id, "campaign cancelled: approval timeout");
                return Ok(false);
            }
            tokio::time::sleep(APPROVAL_POLL_INTERVAL).await;
        }
    }

    async fn cancel_from_current(&self, campaign_id: CampaignId) -> CampaignResult<()> {
        let campaign = self.store.fetch_campaign(campaign_id).await?.ok_or(CampaignError::InvalidTransition(campaign_id))?;
        self.store.cas_transition(campaign_id, campaign.status, CampaignStatus::Cancelled).await
    }

    async fn record_rollback(
        &self,
        campaign: &Campaign,
        phase_id: Option<PhaseId>,
        scope: RollbackScope,
        asset_ids: &[AssetId],
        reason: &str,
        outcome: &RollbackOutcome,
    ) -> CampaignResult<()> {
        let record = RollbackRecord {
            campaign_id: campaign.id,
            timestamp: Utc::now(),
            trigger_type: RollbackTriggerType::Automatic,
            scope,
            phase_id,
            asset_ids: asset_ids.to_vec(),
            reason: reason.to_string(),
            success: outcome.success,
            rolled_back_count: outcome.rolled_back_count,
        };
        self.store.record_rollback(&record).await?;
        self.notify
            .emit(Event::Rollback { timestamp: Utc::now(), campaign_id: campaign.id, campaign_name: campaign.name.clone(), org_id: campaign.org_id, message: reason.to_string() })
            .await;
        Ok(())
    }

    async fn emit_started(&self, campaign: &Campaign, total_phases: u32) {
        self.notify.emit(Event::ExecutionStarted { timestamp: Utc::now(), task_id: campaign.id, total_phases }).await;
        self.notify
            .emit(Event::CampaignStarted { timestamp: Utc::now(), campaign_id: campaign.id, campaign_name: campaign.name.clone(), org_id: campaign.org_id, message: "campaign started".to_string() })
            .await;
    }

    /// Writes the final campaign row (already done by the CAS transition
    /// that led here), emits a completion event, and appends an audit entry.
    async fn finalize(&self, campaign_id: CampaignId, status: CampaignStatus) -> CampaignResult<()> {
        let campaign = self.store.fetch_campaign(campaign_id).await?.ok_or(CampaignError::InvalidTransition(campaign_id))?;
        let action_suffix = match status {
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::RolledBack => "rolledBack",
            _ => "ended",
        };

        let event = if status == CampaignStatus::Completed {
            Event::CampaignCompleted { timestamp: Utc::now(), campaign_id, campaign_name: campaign.name.clone(), org_id: campaign.org_id, message: "campaign completed".to_string() }
        } else {
            Event::CampaignFailed { timestamp: Utc::now(), campaign_id, campaign_name: campaign.name.clone(), org_id: campaign.org_id, message: format!("campaign ended: {action_suffix}") }
        };
        self.notify.emit(event).await;

        self.audit.append_best_effort(NewAuditEntry {
            org_id: campaign.org_id,
            actor: Actor { actor_type: "system".to_string(), id: "campaign-engine".to_string(), email: None, ip: None },
            action: format!("campaign.{action_suffix}"),
            category: "campaign".to_string(),
            resource: Resource { resource_type: "campaign".to_string(), id: Some(campaign.id.to_string()), name: Some(campaign.name.clone()) },
            changes: None,
            context: Some(serde_json::json!({"counts": campaign.counts})),
            risk_level: "medium".to_string(),
            status: if status == CampaignStatus::Completed { AuditStatus::Success } else { AuditStatus::Failure },
        });

        info!(campaign_id = %campaign_id, status = action_suffix, "campaign finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::AlwaysHealthy;
    use crate::rollback::{RollbackExecutor, RollbackOutcome};
    use crate::store::InMemoryCampaignStore;
    use fleet_notify::LoggingSink;
    use fleet_proto::{CampaignCounts, CampaignStrategy, PhaseAssetResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubDispatcher {
        fail_every: usize,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PatchDispatcher for StubDispatcher {
        async fn dispatch(&self, phase_id: PhaseId, asset_id: AssetId, _params: serde_json::Value) -> PhaseAssetResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let failed = self.fail_every > 0 && n % self.fail_every == 0;
            PhaseAssetResult {
                phase_id,
                asset_id,
                status: if failed { PhaseAssetStatus::Failed } else { PhaseAssetStatus::Completed },
                before_version: None,
                after_version: None,
                executor: "stub".to_string(),
                error_message: if failed { Some("stub failure".to_string()) } else { None },
            }
        }
    }

    struct StubRollback;

    #[async_trait::async_trait]
    impl RollbackExecutor for StubRollback {
        async fn rollback(&self, asset_ids: &[AssetId], _reason: &str) -> RollbackOutcome {
            RollbackOutcome { success: true, rolled_back_count: asset_ids.len() as u32, failed_asset_ids: vec![] }
        }
    }

    fn new_engine(fail_every: usize) -> (Arc<InMemoryCampaignStore>, CampaignEngine) {
        let store = Arc::new(InMemoryCampaignStore::new());
        let dispatcher = Arc::new(StubDispatcher { fail_every, calls: AtomicUsize::new(0) });
        let health = Arc::new(AlwaysHealthy);
        let rollback = Arc::new(StubRollback);
        let notify = Arc::new(NotifyDispatcher::new(Arc::new(LoggingSink)));
        let pool = fleet_persist::PgPool::connect_lazy("postgres://localhost/nonexistent").expect("lazy pool");
        let audit = Arc::new(AuditSink::new(pool));
        let metrics = Arc::new(FleetMetrics::new());
        let engine = CampaignEngine::new(store.clone(), dispatcher, health, rollback, notify, audit, metrics);
        (store, engine)
    }

    fn sample_campaign() -> Campaign {
        Campaign {
            id: uuid::Uuid::new_v4(),
            org_id: uuid::Uuid::new_v4(),
            name: "rollout".to_string(),
            campaign_type: "patch".to_string(),
            status: CampaignStatus::Draft,
            strategy: CampaignStrategy::Immediate,
            canary_pct: 5,
            wave_pct: 10,
            failure_threshold_pct: 50,
            rollback_threshold_pct: 30,
            health_check_enabled: false,
            auto_rollback_enabled: true,
            requires_approval: false,
            counts: CampaignCounts::default(),
            created_by: "tester".to_string(),
            approved_by: None,
        }
    }

    #[tokio::test]
    async fn campaign_without_approval_runs_to_completion() {
        let (store, engine) = new_engine(0);
        let campaign = sample_campaign();
        let assets: Vec<AssetId> = (0..5).map(|_| uuid::Uuid::new_v4()).collect();
        let created = engine.create_campaign(campaign, &assets).await.unwrap();
        assert_eq!(created.status, CampaignStatus::InProgress);

        engine.run(created.id).await.unwrap();

        let final_campaign = store.fetch_campaign(created.id).await.unwrap().unwrap();
        assert_eq!(final_campaign.status, CampaignStatus::Completed);
        assert_eq!(store.phase_results().len(), 5);
    }

    #[tokio::test]
    async fn campaign_requiring_approval_stays_pending_until_signal() {
        let (store, engine) = new_engine(0);
        let mut campaign = sample_campaign();
        campaign.requires_approval = true;
        let assets = vec![uuid::Uuid::new_v4()];
        let created = engine.create_campaign(campaign, &assets).await.unwrap();
        assert_eq!(created.status, CampaignStatus::PendingApproval);

        engine.submit_signal(created.id, "approve", serde_json::json!({"approvedBy": "alice"})).await.unwrap();
        engine.run(created.id).await.unwrap();

        let final_campaign = store.fetch_campaign(created.id).await.unwrap().unwrap();
        assert_eq!(final_campaign.status, CampaignStatus::Completed);
    }

    #[tokio::test]
    async fn rejected_approval_cancels_campaign() {
        let (store, engine) = new_engine(0);
        let mut campaign = sample_campaign();
        campaign.requires_approval = true;
        let assets = vec![uuid::Uuid::new_v4()];
        let created = engine.create_campaign(campaign, &assets).await.unwrap();

        engine.submit_signal(created.id, "reject", serde_json::json!({"approvedBy": "bob", "reason": "not ready"})).await.unwrap();
        engine.run(created.id).await.unwrap();

        let final_campaign = store.fetch_campaign(created.id).await.unwrap().unwrap();
        assert_eq!(final_campaign.status, CampaignStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_approval_auto_cancels_after_timeout() {
        let (store, engine) = new_engine(0);
        let mut campaign = sample_campaign();
        campaign.requires_approval = true;
        let assets = vec![uuid::Uuid::new_v4()];
        let created = engine.create_campaign(campaign, &assets).await.unwrap();

        engine.run(created.id).await.unwrap();

        let final_campaign = store.fetch_campaign(created.id).await.unwrap().unwrap();
        assert_eq!(final_campaign.status, CampaignStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_signal_stops_before_first_phase() {
        let (store, engine) = new_engine(0);
        let mut campaign = sample_campaign();
        campaign.strategy = CampaignStrategy::Rolling;
        campaign.wave_pct = 10;
        let assets: Vec<AssetId> = (0..50).map(|_| uuid::Uuid::new_v4()).collect();
        let created = engine.create_campaign(campaign, &assets).await.unwrap();

        engine.submit_signal(created.id, "cancel", serde_json::json!({})).await.unwrap();
        engine.run(created.id).await.unwrap();

        let final_campaign = store.fetch_campaign(created.id).await.unwrap().unwrap();
        assert_eq!(final_campaign.status, CampaignStatus::Cancelled);
        assert!(store.phase_results().is_empty());
    }

    #[tokio::test]
    async fn auto_rollback_triggers_on_threshold_breach_and_fails_campaign() {
        let (store, engine) = new_engine(2); // every 2nd asset fails -> 50% failure rate
        let mut campaign = sample_campaign();
        campaign.rollback_threshold_pct = 30;
        campaign.failure_threshold_pct = 40;
        let assets: Vec<AssetId> = (0..10).map(|_| uuid::Uuid::new_v4()).collect();
        let created = engine.create_campaign(campaign, &assets).await.unwrap();

        engine.run(created.id).await.unwrap();

        let final_campaign = store.fetch_campaign(created.id).await.unwrap().unwrap();
        assert_eq!(final_campaign.status, CampaignStatus::Failed);
        assert_eq!(store.rollbacks().len(), 1);
    }
}
