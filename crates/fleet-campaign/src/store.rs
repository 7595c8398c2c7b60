//! The campaign engine's persistence boundary.
//!
//! Spec §9 treats the durable-workflow backing as a swappable implementation
//! detail: "Implementations may back this with an external durable-workflow
//! engine or with transactional state persistence plus idempotent activities
//! — the contract is the same." [`CampaignStore`] is that contract. The
//! Postgres-backed [`PgCampaignStore`] is what `fleetd` wires up; tests use
//! [`InMemoryCampaignStore`] to exercise the engine without a database.

use async_trait::async_trait;
use fleet_persist::campaigns::CampaignSignal;
use fleet_persist::PgPool;
use fleet_proto::{Campaign, CampaignId, CampaignStatus, Phase, PhaseAssetResult, PhaseId, PhaseStatus, RollbackRecord};

use crate::error::CampaignResult;

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert_campaign(&self, campaign: &Campaign) -> CampaignResult<()>;
    async fn fetch_campaign(&self, id: CampaignId) -> CampaignResult<Option<Campaign>>;
    async fn cas_transition(&self, id: CampaignId, from: CampaignStatus, to: CampaignStatus) -> CampaignResult<()>;
    async fn insert_phases(&self, phases: &[Phase]) -> CampaignResult<()>;
    async fn fetch_phases(&self, campaign_id: CampaignId) -> CampaignResult<Vec<Phase>>;
    async fn update_phase_status(&self, phase_id: PhaseId, status: PhaseStatus, health_check_passed: Option<bool>) -> CampaignResult<()>;
    async fn record_phase_asset_result(&self, result: &PhaseAssetResult) -> CampaignResult<()>;
    async fn record_rollback(&self, record: &RollbackRecord) -> CampaignResult<()>;
    async fn enqueue_signal(&self, campaign_id: CampaignId, kind: &str, payload: serde_json::Value) -> CampaignResult<()>;
    async fn drain_signals(&self, campaign_id: CampaignId) -> CampaignResult<Vec<CampaignSignal>>;
}

pub struct PgCampaignStore {
    pool: PgPool,
}

impl PgCampaignStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignStore for PgCampaignStore {
    async fn insert_campaign(&self, campaign: &Campaign) -> CampaignResult<()> {
        Ok(fleet_persist::campaigns::insert_campaign(&self.pool, campaign).await?)
    }

    async fn fetch_campaign(&self, id: CampaignId) -> CampaignResult<Option<Campaign>> {
        Ok(fleet_persist::campaigns::fetch_campaign(&self.pool, id).await?)
    }

    async fn cas_transition(&self, id: CampaignId, from: CampaignStatus, to: CampaignStatus) -> CampaignResult<()> {
        fleet_persist::campaigns::cas_transition(&self.pool, id, from, to)
            .await
            .map_err(|e| match e {
                fleet_persist::PersistError::Conflict(_) => crate::error::CampaignError::InvalidTransition(id),
                other => other.into(),
            })
    }

    async fn insert_phases(&self, phases: &[Phase]) -> CampaignResult<()> {
        Ok(fleet_persist::campaigns::insert_phases(&self.pool, phases).await?)
    }

    async fn fetch_phases(&self, campaign_id: CampaignId) -> CampaignResult<Vec<Phase>> {
        Ok(fleet_persist::campaigns::fetch_phases(&self.pool, campaign_id).await?)
    }

    async fn update_phase_status(&self, phase_id: PhaseId, status: PhaseStatus, health_check_passed: Option<bool>) -> CampaignResult<()> {
        Ok(fleet_persist::campaigns::update_phase_status(&self.pool, phase_id, status, health_check_passed).await?)
    }

    async fn record_phase_asset_result(&self, result: &PhaseAssetResult) -> CampaignResult<()> {
        Ok(fleet_persist::campaigns::record_phase_asset_result(&self.pool, result).await?)
    }

    async fn record_rollback(&self, record: &RollbackRecord) -> CampaignResult<()> {
        Ok(fleet_persist::campaigns::record_rollback(&self.pool, record).await?)
    }

    async fn enqueue_signal(&self, campaign_id: CampaignId, kind: &str, payload: serde_json::Value) -> CampaignResult<()> {
        Ok(fleet_persist::campaigns::enqueue_signal(&self.pool, campaign_id, kind, payload).await?)
    }

    async fn drain_signals(&self, campaign_id: CampaignId) -> CampaignResult<Vec<CampaignSignal>> {
        Ok(fleet_persist::campaigns::drain_signals(&self.pool, campaign_id).await?)
    }
}

/// A `parking_lot`-guarded in-memory double used by the engine's own test
/// suite for pure-logic, non-database integration tests.
pub mod memory {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};

    #[derive(Default)]
    struct Inner {
        campaigns: HashMap<CampaignId, Campaign>,
        phases: HashMap<CampaignId, Vec<Phase>>,
        phase_results: Vec<PhaseAssetResult>,
        rollbacks: Vec<RollbackRecord>,
        signals: HashMap<CampaignId, VecDeque<CampaignSignal>>,
        next_signal_id: i64,
    }

    #[derive(Default)]
    pub struct InMemoryCampaignStore {
        inner: Mutex<Inner>,
    }

    impl InMemoryCampaignStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn phase_results(&self) -> Vec<PhaseAssetResult> {
            self.inner.lock().phase_results.clone()
        }

        pub fn rollbacks(&self) -> Vec<RollbackRecord> {
            self.inner.lock().rollbacks.clone()
        }
    }

    #[async_trait]
    impl CampaignStore for InMemoryCampaignStore {
        async fn insert_campaign(&self, campaign: &Campaign) -> CampaignResult<()> {
            self.inner.lock().campaigns.insert(campaign.id, campaign.clone());
            Ok(())
        }

        async fn fetch_campaign(&self, id: CampaignId) -> CampaignResult<Option<Campaign>> {
            Ok(self.inner.lock().campaigns.get(&id).cloned())
        }

        async fn cas_transition(&self, id: CampaignId, from: CampaignStatus, to: CampaignStatus) -> CampaignResult<()> {
            let mut inner = self.inner.lock();
            let campaign = inner.campaigns.get_mut(&id).ok_or(crate::error::CampaignError::InvalidTransition(id))?;
            if campaign.status.is_terminal() || campaign.status != from {
                return Err(crate::error::CampaignError::InvalidTransition(id));
            }
            campaign.status = to;
            Ok(())
        }

        async fn insert_phases(&self, phases: &[Phase]) -> CampaignResult<()> {
            if let Some(campaign_id) = phases.first().map(|p| p.campaign_id) {
                self.inner.lock().phases.entry(campaign_id).or_default().extend(phases.iter().cloned());
            }
            Ok(())
        }

        async fn fetch_phases(&self, campaign_id: CampaignId) -> CampaignResult<Vec<Phase>> {
            Ok(self.inner.lock().phases.get(&campaign_id).cloned().unwrap_or_default())
        }

        async fn update_phase_status(&self, phase_id: PhaseId, status: PhaseStatus, health_check_passed: Option<bool>) -> CampaignResult<()> {
            let mut inner = self.inner.lock();
            for phases in inner.phases.values_mut() {
                if let Some(p) = phases.iter_mut().find(|p| p.id == phase_id) {
                    p.status = status;
                    if let Some(passed) = health_check_passed {
                        p.health_check_passed = Some(passed);
                    }
                }
            }
            Ok(())
        }

        async fn record_phase_asset_result(&self, result: &PhaseAssetResult) -> CampaignResult<()> {
            self.inner.lock().phase_results.push(result.clone());
            Ok(())
        }

        async fn record_rollback(&self, record: &RollbackRecord) -> CampaignResult<()> {
            self.inner.lock().rollbacks.push(record.clone());
            Ok(())
        }

        async fn enqueue_signal(&self, campaign_id: CampaignId, kind: &str, payload: serde_json::Value) -> CampaignResult<()> {
            let mut inner = self.inner.lock();
            inner.next_signal_id += 1;
            let id = inner.next_signal_id;
            inner.signals.entry(campaign_id).or_default().push_back(CampaignSignal {
                id,
                campaign_id,
                kind: kind.to_string(),
                payload,
                enqueued_at: chrono::Utc::now(),
            });
            Ok(())
        }

        async fn drain_signals(&self, campaign_id: CampaignId) -> CampaignResult<Vec<CampaignSignal>> {
            let mut inner = self.inner.lock();
            Ok(inner.signals.entry(campaign_id).or_default().drain(..).collect())
        }
    }
}

pub use memory::InMemoryCampaignStore;
