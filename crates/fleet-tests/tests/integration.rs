//! Cross-crate integration tests for the fleet core.
//!
//! Scheduler and reconciler scenarios (row-locked claiming, soft-delete
//! grace windows) need a live Postgres instance and aren't exercised here;
//! everything below is reachable through in-memory/stub collaborators, the
//! same pure-logic style the rest of this workspace tests with.

use async_trait::async_trait;
use fleet_campaign::{AlwaysHealthy, CampaignEngine, HealthCheckReport, HealthChecker, PatchDispatcher, RollbackExecutor, RollbackOutcome};
use fleet_campaign::{generate_phases, CampaignStore, InMemoryCampaignStore, MAX_ROLLING_WAVES};
use fleet_notify::{LoggingSink, NotifyDispatcher};
use fleet_observe::FleetMetrics;
use fleet_proto::{
    AssetId, Campaign, CampaignCounts, CampaignStatus, CampaignStrategy, PhaseAssetResult, PhaseAssetStatus, PhaseId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn sample_campaign(strategy: CampaignStrategy) -> Campaign {
    Campaign {
        id: Uuid::new_v4(),
        org_id: Uuid::new_v4(),
        name: "fleet-rollout".to_string(),
        campaign_type: "patch".to_string(),
        status: CampaignStatus::Draft,
        strategy,
        canary_pct: 5,
        wave_pct: 10,
        failure_threshold_pct: 50,
        rollback_threshold_pct: 10,
        health_check_enabled: true,
        auto_rollback_enabled: true,
        requires_approval: false,
        counts: CampaignCounts::default(),
        created_by: "tester".to_string(),
        approved_by: None,
    }
}

struct AlwaysSucceedsDispatcher {
    calls: AtomicUsize,
}

#[async_trait]
impl PatchDispatcher for AlwaysSucceedsDispatcher {
    async fn dispatch(&self, phase_id: PhaseId, asset_id: AssetId, _params: serde_json::Value) -> PhaseAssetResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        PhaseAssetResult {
            phase_id,
            asset_id,
            status: PhaseAssetStatus::Completed,
            before_version: None,
            after_version: None,
            executor: "stub".to_string(),
            error_message: None,
        }
    }
}

struct NoopRollback {
    invocations: AtomicUsize,
}

#[async_trait]
impl RollbackExecutor for NoopRollback {
    async fn rollback(&self, asset_ids: &[AssetId], _reason: &str) -> RollbackOutcome {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        RollbackOutcome { success: true, rolled_back_count: asset_ids.len() as u32, failed_asset_ids: vec![] }
    }
}

/// Fails every asset in the first phase it's asked to check and passes
/// every phase after that — models a canary that surfaces a bad image.
struct FailsFirstCallThenHealthy {
    calls: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl HealthChecker for FailsFirstCallThenHealthy {
    async fn check(&self, asset_ids: &[AssetId], _timeout: Duration) -> HealthCheckReport {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            HealthCheckReport { passed: asset_ids.iter().map(|id| (*id, false)).collect(), failure_rate: 1.0 }
        } else {
            HealthCheckReport::all_passed(asset_ids)
        }
    }
}

fn audit_sink() -> fleet_audit::AuditSink {
    let pool = fleet_persist::PgPool::connect_lazy("postgres://localhost/nonexistent").expect("lazy pool");
    fleet_audit::AuditSink::new(pool)
}

/// End-to-end scenario 4: canary campaign, 100 assets, 5% canary, health
/// check enabled, every asset and health check succeeds.
#[tokio::test]
async fn canary_campaign_health_pass_completes_with_zero_failures() {
    let store = Arc::new(InMemoryCampaignStore::new());
    let dispatcher = Arc::new(AlwaysSucceedsDispatcher { calls: AtomicUsize::new(0) });
    let health = Arc::new(AlwaysHealthy);
    let rollback = Arc::new(NoopRollback { invocations: AtomicUsize::new(0) });
    let notify = Arc::new(NotifyDispatcher::new(Arc::new(LoggingSink)));
    let metrics = Arc::new(FleetMetrics::new());
    let engine = CampaignEngine::new(store.clone(), dispatcher.clone(), health, rollback.clone(), notify, Arc::new(audit_sink()), metrics);

    let campaign = sample_campaign(CampaignStrategy::Canary);
    let assets: Vec<AssetId> = (0..100).map(|_| Uuid::new_v4()).collect();

    let created = engine.create_campaign(campaign, &assets).await.unwrap();
    assert_eq!(created.status, CampaignStatus::InProgress);

    let phases = store.fetch_phases(created.id).await.unwrap();
    assert_eq!(phases.len(), 2, "canary at 5% of 100 assets splits into Canary + Final");
    assert_eq!(phases[0].asset_ids.len(), 5);
    assert_eq!(phases[1].asset_ids.len(), 95);

    engine.run(created.id).await.unwrap();

    let final_campaign = store.fetch_campaign(created.id).await.unwrap().unwrap();
    assert_eq!(final_campaign.status, CampaignStatus::Completed);
    assert_eq!(store.phase_results().len(), 100);
    assert!(store.phase_results().iter().all(|r| r.status == PhaseAssetStatus::Completed));
    assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 100);
    assert_eq!(rollback.invocations.load(Ordering::SeqCst), 0);
}

/// End-to-end scenario 5: same setup, but the health check fails on the
/// canary phase. With a 10% rollback threshold and 100% canary failure
/// rate, that single phase's failure rate also exceeds the 50% failure
/// threshold, so the whole campaign fails after rolling back the canary.
#[tokio::test]
async fn canary_campaign_health_failure_triggers_rollback_and_fails_campaign() {
    let store = Arc::new(InMemoryCampaignStore::new());
    let dispatcher = Arc::new(AlwaysSucceedsDispatcher { calls: AtomicUsize::new(0) });
    let health = Arc::new(FailsFirstCallThenHealthy { calls: AtomicUsize::new(0) });
    let rollback = Arc::new(NoopRollback { invocations: AtomicUsize::new(0) });
    let notify = Arc::new(NotifyDispatcher::new(Arc::new(LoggingSink)));
    let metrics = Arc::new(FleetMetrics::new());
    let engine = CampaignEngine::new(store.clone(), dispatcher, health, rollback.clone(), notify, Arc::new(audit_sink()), metrics);

    let campaign = sample_campaign(CampaignStrategy::Canary);
    let assets: Vec<AssetId> = (0..100).map(|_| Uuid::new_v4()).collect();

    let created = engine.create_campaign(campaign, &assets).await.unwrap();
    engine.run(created.id).await.unwrap();

    let final_campaign = store.fetch_campaign(created.id).await.unwrap().unwrap();
    assert_eq!(final_campaign.status, CampaignStatus::Failed);

    let rollbacks = store.rollbacks();
    assert_eq!(rollbacks.len(), 1, "exactly one RollbackRecord for the failed canary phase");
    let phases = store.fetch_phases(created.id).await.unwrap();
    assert_eq!(rollbacks[0].phase_id, Some(phases[0].id));
    assert_eq!(rollback.invocations.load(Ordering::SeqCst), 1);
}

/// Issuing the same approval signal twice has no effect after the first
/// accepted one — the second `approve` arrives after the campaign has
/// already left `pendingApproval` and is ignored as stale.
#[tokio::test]
async fn duplicate_approval_signal_is_idempotent() {
    let store = Arc::new(InMemoryCampaignStore::new());
    let dispatcher = Arc::new(AlwaysSucceedsDispatcher { calls: AtomicUsize::new(0) });
    let health = Arc::new(AlwaysHealthy);
    let rollback = Arc::new(NoopRollback { invocations: AtomicUsize::new(0) });
    let notify = Arc::new(NotifyDispatcher::new(Arc::new(LoggingSink)));
    let metrics = Arc::new(FleetMetrics::new());
    let engine = CampaignEngine::new(store.clone(), dispatcher, health, rollback, notify, Arc::new(audit_sink()), metrics);

    let mut campaign = sample_campaign(CampaignStrategy::Immediate);
    campaign.requires_approval = true;
    campaign.health_check_enabled = false;
    let assets = vec![Uuid::new_v4()];

    let created = engine.create_campaign(campaign, &assets).await.unwrap();
    engine.submit_signal(created.id, "approve", serde_json::json!({"approvedBy": "alice"})).await.unwrap();
    engine.run(created.id).await.unwrap();

    let after_first = store.fetch_campaign(created.id).await.unwrap().unwrap();
    assert_eq!(after_first.status, CampaignStatus::Completed);

    // A second approval now arrives after completion; submitting it and
    // running again must not move a terminal campaign anywhere.
    engine.submit_signal(created.id, "approve", serde_json::json!({"approvedBy": "bob"})).await.unwrap();
    let result = engine.run(created.id).await;
    assert!(result.is_ok());
    let after_second = store.fetch_campaign(created.id).await.unwrap().unwrap();
    assert_eq!(after_second.status, CampaignStatus::Completed);
}

/// Testable property: Σ(phase.assetIds) = campaign.assetIds and every
/// asset appears in exactly one phase, across every strategy.
#[test]
fn phase_generation_partitions_every_asset_exactly_once() {
    let assets: Vec<AssetId> = (0..137).map(|_| Uuid::new_v4()).collect();
    for strategy in [CampaignStrategy::Immediate, CampaignStrategy::Canary, CampaignStrategy::Rolling, CampaignStrategy::BlueGreen] {
        let phases = generate_phases(Uuid::new_v4(), &assets, strategy, 5, 10);

        let mut seen: HashMap<AssetId, u32> = HashMap::new();
        for phase in &phases {
            for id in &phase.asset_ids {
                *seen.entry(*id).or_insert(0) += 1;
            }
        }
        assert_eq!(seen.len(), assets.len(), "strategy {strategy:?} dropped or duplicated assets");
        assert!(seen.values().all(|&count| count == 1), "strategy {strategy:?} put an asset in more than one phase");

        let orders: Vec<u32> = phases.iter().map(|p| p.order).collect();
        let expected: Vec<u32> = (1..=orders.len() as u32).collect();
        assert_eq!(orders, expected, "strategy {strategy:?} phase order must be contiguous 1..n");
    }
}

/// Boundary: rolling generation is capped at 10 phases no matter how many
/// assets or how small the wave percentage.
#[test]
fn rolling_generation_never_exceeds_the_wave_cap() {
    let assets: Vec<AssetId> = (0..10_000).map(|_| Uuid::new_v4()).collect();
    let phases = generate_phases(Uuid::new_v4(), &assets, CampaignStrategy::Rolling, 5, 1);
    assert!(phases.len() <= MAX_ROLLING_WAVES);
}

#[test]
fn empty_asset_set_generates_no_phases() {
    let phases = generate_phases(Uuid::new_v4(), &[], CampaignStrategy::Canary, 5, 10);
    assert!(phases.is_empty());
}

#[test]
fn categorize_action_handles_short_strings_without_panicking() {
    assert_eq!(fleet_proto::categorize_action("connector.sync.completed"), "completed");
    assert_eq!(fleet_proto::categorize_action("x"), "other");
}

#[test]
fn unparseable_schedule_string_degrades_to_default_not_an_error() {
    assert_eq!(fleet_config::parse_schedule("not-a-duration"), fleet_config::DEFAULT_SCHEDULE);
    assert_eq!(fleet_config::parse_schedule("6h"), Duration::from_secs(6 * 3600));
}
