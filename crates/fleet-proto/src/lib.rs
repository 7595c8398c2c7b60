//! Shared data model for the fleet core.
//!
//! Every type here is a plain, serializable value — the wire/storage shape
//! shared by the scheduler, the connector drivers, the reconciler, the
//! campaign engine, and the audit sink. No behavior lives here beyond a
//! handful of validation and mapping helpers that are genuinely part of the
//! shape (state mapping, natural-key construction).

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type OrgId = Uuid;
pub type ConnectorId = Uuid;
pub type AssetId = Uuid;
pub type SyncHistoryId = Uuid;
pub type CampaignId = Uuid;
pub type PhaseId = Uuid;
pub type AuditEntryId = Uuid;

// ─── Platform ──────────────────────────────────────────────────────────────

/// The closed set of supported connector platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Aws,
    Azure,
    Gcp,
    #[serde(rename = "vsphere")]
    VSphere,
    #[serde(rename = "k8s")]
    K8s,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Aws => "aws",
            Platform::Azure => "azure",
            Platform::Gcp => "gcp",
            Platform::VSphere => "vsphere",
            Platform::K8s => "k8s",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── Connector ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub id: ConnectorId,
    pub org_id: OrgId,
    pub name: String,
    pub platform: Platform,
    pub enabled: bool,
    /// Platform-specific JSON document; see `fleet-config` for recognized keys per platform.
    pub config_blob: serde_json::Value,
    /// Compact duration syntax, e.g. "15m", "1h". See `fleet_config::parse_schedule`.
    pub sync_schedule: String,
    pub sync_enabled: bool,
    pub next_sync_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<SyncStatus>,
}

/// Returns `true` if `name` is non-empty and `platform` + org uniquely key this connector.
/// Uniqueness of `(org_id, name)` is enforced by storage, not here.
pub fn validate_connector_name(name: &str) -> bool {
    !name.trim().is_empty()
}

// ─── Asset ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetState {
    Running,
    Stopped,
    Terminated,
    Pending,
    #[default]
    Unknown,
}

impl AssetState {
    /// Maps a raw vendor state string to the normalized state, per the table in
    /// the connector driver normalization rules.
    pub fn from_vendor_state(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "running" => AssetState::Running,
            "stopped" | "stopping" | "suspended" | "suspending" | "deallocated" => {
                AssetState::Stopped
            }
            "terminated" => AssetState::Terminated,
            "provisioning" | "staging" | "pending" | "starting" => AssetState::Pending,
            _ => AssetState::Unknown,
        }
    }
}

/// The natural key a discovered/stored asset is identified by within an org+platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetNaturalKey {
    pub account: String,
    pub region: String,
    pub instance_ref: String,
}

impl AssetNaturalKey {
    pub fn new(account: impl Into<String>, region: impl Into<String>, instance_ref: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
            instance_ref: instance_ref.into(),
        }
    }
}

/// A value produced by a connector driver during discovery: the same shape as
/// [`Asset`] minus the storage-assigned id and lifecycle flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedAsset {
    pub platform: Platform,
    pub account: String,
    pub region: String,
    pub instance_ref: String,
    pub name: String,
    pub image_ref: Option<String>,
    pub image_version: Option<String>,
    pub state: AssetState,
    pub tags: HashMap<String, String>,
}

impl NormalizedAsset {
    pub fn natural_key(&self) -> AssetNaturalKey {
        AssetNaturalKey::new(&self.account, &self.region, &self.instance_ref)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub org_id: OrgId,
    pub platform: Platform,
    pub account: String,
    pub region: String,
    pub instance_ref: String,
    pub name: String,
    pub image_ref: Option<String>,
    pub image_version: Option<String>,
    pub state: AssetState,
    pub tags: HashMap<String, String>,
    pub last_seen_at: DateTime<Utc>,
    pub is_deleted: bool,
}

impl Asset {
    pub fn natural_key(&self) -> AssetNaturalKey {
        AssetNaturalKey::new(&self.account, &self.region, &self.instance_ref)
    }

    pub fn from_normalized(id: AssetId, org_id: OrgId, n: NormalizedAsset, now: DateTime<Utc>) -> Self {
        Self {
            id,
            org_id,
            platform: n.platform,
            account: n.account,
            region: n.region,
            instance_ref: n.instance_ref,
            name: n.name,
            image_ref: n.image_ref,
            image_version: n.image_version,
            state: n.state,
            tags: n.tags,
            last_seen_at: now,
            is_deleted: false,
        }
    }

    /// Applies the mutable fields from a fresh discovery and stamps `lastSeenAt`.
    pub fn apply_discovered(&mut self, n: &NormalizedAsset, now: DateTime<Utc>) {
        self.name = n.name.clone();
        self.image_ref = n.image_ref.clone();
        self.image_version = n.image_version.clone();
        self.state = n.state;
        self.tags = n.tags.clone();
        self.last_seen_at = now;
        self.is_deleted = false;
    }
}

/// Trims a zone identifier to its region when the cloud's zone format embeds
/// the region as a prefix (e.g. GCP `us-central1-a` -> `us-central1`).
pub fn trim_zone_to_region(zone: &str) -> String {
    match zone.rsplit_once('-') {
        Some((region, suffix)) if suffix.len() <= 2 && suffix.chars().all(|c| c.is_ascii_alphanumeric()) => {
            region.to_string()
        }
        _ => zone.to_string(),
    }
}

/// Extracts an image version from an image name pattern `*-v<YYYYMMDD>`, else
/// falls back to a `Version`/`version` tag, else returns `None`.
pub fn extract_image_version(image_name: &str, tags: &HashMap<String, String>) -> Option<String> {
    if let Some(idx) = image_name.rfind("-v") {
        let candidate = &image_name[idx + 2..];
        if candidate.len() == 8 && candidate.chars().all(|c| c.is_ascii_digit()) {
            return Some(candidate.to_string());
        }
    }
    tags.get("Version").or_else(|| tags.get("version")).cloned()
}

// ─── SyncHistory ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SyncCounts {
    pub discovered: u32,
    pub created: u32,
    pub updated: u32,
    pub removed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncHistory {
    pub id: SyncHistoryId,
    pub connector_id: ConnectorId,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: SyncStatus,
    pub counts: SyncCounts,
    pub trigger_type: TriggerType,
    pub error_message: Option<String>,
}

// ─── Campaign ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CampaignStatus {
    Draft,
    PendingApproval,
    Approved,
    InProgress,
    Paused,
    Completed,
    Failed,
    RolledBack,
    Cancelled,
}

impl CampaignStatus {
    /// Terminal states never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed
                | CampaignStatus::Failed
                | CampaignStatus::RolledBack
                | CampaignStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStrategy {
    Immediate,
    Canary,
    Rolling,
    BlueGreen,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CampaignCounts {
    pub total: u32,
    pub pending: u32,
    pub in_progress: u32,
    pub completed: u32,
    pub failed: u32,
    pub skipped: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub org_id: OrgId,
    pub name: String,
    pub campaign_type: String,
    pub status: CampaignStatus,
    pub strategy: CampaignStrategy,
    pub canary_pct: u8,
    pub wave_pct: u8,
    pub failure_threshold_pct: u8,
    pub rollback_threshold_pct: u8,
    pub health_check_enabled: bool,
    pub auto_rollback_enabled: bool,
    pub requires_approval: bool,
    pub counts: CampaignCounts,
    pub created_by: String,
    pub approved_by: Option<String>,
}

// ─── Phase ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    Preflight,
    Canary,
    Wave,
    Final,
    Validation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    HealthCheck,
    Completed,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: PhaseId,
    pub campaign_id: CampaignId,
    pub order: u32,
    pub name: String,
    pub phase_type: PhaseType,
    pub status: PhaseStatus,
    pub asset_ids: Vec<AssetId>,
    pub target_pct: u8,
    pub counts: CampaignCounts,
    pub health_check_passed: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseAssetStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseAssetResult {
    pub phase_id: PhaseId,
    pub asset_id: AssetId,
    pub status: PhaseAssetStatus,
    pub before_version: Option<String>,
    pub after_version: Option<String>,
    pub executor: String,
    pub error_message: Option<String>,
}

// ─── Rollback ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RollbackTriggerType {
    Automatic,
    Manual,
    HealthCheck,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackScope {
    Asset,
    Phase,
    Campaign,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub campaign_id: CampaignId,
    pub timestamp: DateTime<Utc>,
    pub trigger_type: RollbackTriggerType,
    pub scope: RollbackScope,
    pub phase_id: Option<PhaseId>,
    pub asset_ids: Vec<AssetId>,
    pub reason: String,
    pub success: bool,
    pub rolled_back_count: u32,
}

// ─── Audit ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub actor_type: String,
    pub id: String,
    pub email: Option<String>,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub resource_type: String,
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub timestamp: DateTime<Utc>,
    pub org_id: OrgId,
    pub actor: Actor,
    pub action: String,
    pub category: String,
    pub resource: Resource,
    pub changes: Option<serde_json::Value>,
    pub context: Option<serde_json::Value>,
    pub risk_level: String,
    pub status: AuditStatus,
    pub integrity_hash: String,
    pub previous_hash: String,
}

/// Categorizes an action string by its suffix (e.g. `"connector.sync.failed"`
/// -> `"failed"`). The source this spec was distilled from sliced by a fixed
/// index and panicked on short strings; per design note, suffix matching
/// against a known vocabulary replaces that bug rather than reproducing it.
pub fn categorize_action(action: &str) -> &str {
    const SUFFIXES: &[&str] = &["created", "updated", "deleted", "failed", "approved", "rejected", "started", "completed"];
    for suffix in SUFFIXES {
        if action.ends_with(suffix) {
            return suffix;
        }
    }
    "other"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_mapping_covers_all_known_vendor_states() {
        assert_eq!(AssetState::from_vendor_state("running"), AssetState::Running);
        assert_eq!(AssetState::from_vendor_state("stopping"), AssetState::Stopped);
        assert_eq!(AssetState::from_vendor_state("deallocated"), AssetState::Stopped);
        assert_eq!(AssetState::from_vendor_state("terminated"), AssetState::Terminated);
        assert_eq!(AssetState::from_vendor_state("staging"), AssetState::Pending);
        assert_eq!(AssetState::from_vendor_state("weird"), AssetState::Unknown);
    }

    #[test]
    fn zone_trims_to_region() {
        assert_eq!(trim_zone_to_region("us-central1-a"), "us-central1");
        assert_eq!(trim_zone_to_region("us-east1"), "us-east1");
    }

    #[test]
    fn image_version_prefers_name_pattern_then_tag() {
        let mut tags = HashMap::new();
        tags.insert("Version".to_string(), "42".to_string());
        assert_eq!(
            extract_image_version("ubuntu-22-04-v20240115", &tags),
            Some("20240115".to_string())
        );
        assert_eq!(extract_image_version("ubuntu-22-04", &tags), Some("42".to_string()));
        assert_eq!(extract_image_version("ubuntu-22-04", &HashMap::new()), None);
    }

    #[test]
    fn terminal_states_are_closed() {
        assert!(CampaignStatus::Completed.is_terminal());
        assert!(CampaignStatus::Cancelled.is_terminal());
        assert!(!CampaignStatus::InProgress.is_terminal());
    }

    #[test]
    fn categorize_action_uses_suffix_not_fixed_index() {
        assert_eq!(categorize_action("connector.sync.failed"), "failed");
        assert_eq!(categorize_action("ca"), "other");
        assert_eq!(categorize_action("x"), "other");
    }
}
