//! Adversarial invariant tests for the campaign engine: terminal states
//! must never transition further, and an
//! auto-rollback must leave exactly one `RollbackRecord` behind, never zero
//! and never more than the breaches that occurred.

use async_trait::async_trait;
use fleet_campaign::{AlwaysHealthy, CampaignEngine, CampaignStore, InMemoryCampaignStore, PatchDispatcher, RollbackExecutor, RollbackOutcome};
use fleet_notify::{LoggingSink, NotifyDispatcher};
use fleet_observe::FleetMetrics;
use fleet_proto::{AssetId, Campaign, CampaignCounts, CampaignStatus, CampaignStrategy, PhaseAssetResult, PhaseAssetStatus, PhaseId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

fn sample_campaign() -> Campaign {
    Campaign {
        id: Uuid::new_v4(),
        org_id: Uuid::new_v4(),
        name: "rollout".to_string(),
        campaign_type: "patch".to_string(),
        status: CampaignStatus::Draft,
        strategy: CampaignStrategy::Rolling,
        canary_pct: 5,
        wave_pct: 20,
        failure_threshold_pct: 80,
        rollback_threshold_pct: 30,
        health_check_enabled: false,
        auto_rollback_enabled: true,
        requires_approval: false,
        counts: CampaignCounts::default(),
        created_by: "tester".to_string(),
        approved_by: None,
    }
}

/// Every terminal status rejects a further CAS transition with no mutation.
#[tokio::test]
async fn cas_transition_never_leaves_a_terminal_state() {
    let store = InMemoryCampaignStore::new();
    let terminal_states = [
        CampaignStatus::Completed,
        CampaignStatus::Failed,
        CampaignStatus::RolledBack,
        CampaignStatus::Cancelled,
    ];

    for status in terminal_states {
        let mut campaign = sample_campaign();
        campaign.status = status;
        store.insert_campaign(&campaign).await.unwrap();

        let result = store.cas_transition(campaign.id, status, CampaignStatus::InProgress).await;
        assert!(result.is_err(), "{status:?} must reject a further transition");

        let unchanged = store.fetch_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, status, "a rejected transition must not mutate the stored status");
    }
}

/// A transition attempt that doesn't match the current status is also
/// rejected, even when neither side is terminal — `from` must match exactly.
#[tokio::test]
async fn cas_transition_rejects_a_mismatched_from_state() {
    let store = InMemoryCampaignStore::new();
    let mut campaign = sample_campaign();
    campaign.status = CampaignStatus::InProgress;
    store.insert_campaign(&campaign).await.unwrap();

    let result = store.cas_transition(campaign.id, CampaignStatus::PendingApproval, CampaignStatus::Completed).await;
    assert!(result.is_err());
    let unchanged = store.fetch_campaign(campaign.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, CampaignStatus::InProgress);
}

struct FailEveryOther {
    calls: AtomicUsize,
}

#[async_trait]
impl PatchDispatcher for FailEveryOther {
    async fn dispatch(&self, phase_id: PhaseId, asset_id: AssetId, _params: serde_json::Value) -> PhaseAssetResult {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let failed = n % 2 == 0;
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

struct CountingRollback {
    invocations: AtomicUsize,
}

#[async_trait]
impl RollbackExecutor for CountingRollback {
    async fn rollback(&self, asset_ids: &[AssetId], _reason: &str) -> RollbackOutcome {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        RollbackOutcome { success: true, rolled_back_count: asset_ids.len() as u32, failed_asset_ids: vec![] }
    }
}

/// Every phase that crosses the rollback threshold produces exactly one
/// `RollbackRecord` tagged with that phase — not a record per failed asset.
/// The rollback check is on *cumulative* failure rate, not per-phase: with
/// failures alternating every other dispatch across 5 waves of 4 assets
/// each, cumulative failure crosses the 30% rollback threshold starting at
/// wave 3 (10%, 20%, 30%, 40%, 50%) — three waves roll back, the first two
/// don't, and cumulative failure never reaches the 95% failure threshold
/// that would fail the whole campaign.
#[tokio::test]
async fn rollback_record_count_matches_breaches_not_failed_assets() {
    let store = Arc::new(InMemoryCampaignStore::new());
    let dispatcher = Arc::new(FailEveryOther { calls: AtomicUsize::new(0) });
    let health = Arc::new(AlwaysHealthy);
    let rollback = Arc::new(CountingRollback { invocations: AtomicUsize::new(0) });
    let notify = Arc::new(NotifyDispatcher::new(Arc::new(LoggingSink)));
    let metrics = Arc::new(FleetMetrics::new());
    let pool = fleet_persist::PgPool::connect_lazy("postgres://localhost/nonexistent").expect("lazy pool");
    let audit = Arc::new(fleet_audit::AuditSink::new(pool));
    let engine = CampaignEngine::new(store.clone(), dispatcher, health, rollback.clone(), notify, audit, metrics);

    let mut campaign = sample_campaign();
    campaign.rollback_threshold_pct = 30; // 50% failure in the first wave breaches this
    campaign.failure_threshold_pct = 95; // but not high enough to fail the whole campaign
    let assets: Vec<AssetId> = (0..20).map(|_| Uuid::new_v4()).collect();

    let created = engine.create_campaign(campaign, &assets).await.unwrap();
    engine.run(created.id).await.unwrap();

    let final_campaign = store.fetch_campaign(created.id).await.unwrap().unwrap();
    assert_eq!(final_campaign.status, CampaignStatus::Completed, "95% threshold should not be crossed cumulatively");

    let rollbacks = store.rollbacks();
    assert_eq!(rollbacks.len(), rollback.invocations.load(Ordering::SeqCst), "one RollbackRecord per rollback invocation, no more");
    assert_eq!(rollbacks.len(), 3, "waves 3 through 5 cross the 30% cumulative rollback threshold, waves 1-2 don't");
    for record in &rollbacks {
        assert!(record.phase_id.is_some(), "a phase-scoped rollback must carry its phase id");
    }
}

/// Submitting a signal to a campaign id that was never created is a no-op
/// error, not a panic or a silently-created row.
#[tokio::test]
async fn run_on_unknown_campaign_id_fails_without_side_effects() {
    let store = Arc::new(InMemoryCampaignStore::new());
    let dispatcher = Arc::new(FailEveryOther { calls: AtomicUsize::new(0) });
    let health = Arc::new(AlwaysHealthy);
    let rollback = Arc::new(CountingRollback { invocations: AtomicUsize::new(0) });
    let notify = Arc::new(NotifyDispatcher::new(Arc::new(LoggingSink)));
    let metrics = Arc::new(FleetMetrics::new());
    let pool = fleet_persist::PgPool::connect_lazy("postgres://localhost/nonexistent").expect("lazy pool");
    let audit = Arc::new(fleet_audit::AuditSink::new(pool));
    let engine = CampaignEngine::new(store, dispatcher, health, rollback, notify, audit, metrics);

    let result = engine.run(Uuid::new_v4()).await;
    assert!(result.is_err());
}
