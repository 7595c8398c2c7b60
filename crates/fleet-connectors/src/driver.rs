//! The connector driver capability set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_proto::{NormalizedAsset, OrgId, Platform};
use serde::{Deserialize, Serialize};

use crate::error::{DriverError, DriverResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    pub image_ref: String,
    pub name: String,
    pub version: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op_id: String,
    pub asset_ref: String,
    pub status: PatchStatus,
    pub started_at: DateTime<Utc>,
}

/// Wire shape of a patch-status poll response, shared by every driver's
/// `get_patch_status` — the control plane returns nothing but the status.
#[derive(Debug, Deserialize)]
pub(crate) struct PatchStatusResponse {
    pub status: PatchStatus,
}

/// Every supported platform implements this capability set. Dispatch is by
/// `platform` string at construction time — new platforms are
/// added by implementing this trait, nothing else.
#[async_trait]
pub trait Driver: Send + Sync {
    fn platform(&self) -> Platform;

    /// Initializes credentials and validates reachability. Authentication
    /// errors bubble up here and are not retried.
    async fn connect(&mut self) -> DriverResult<()>;

    /// A cheap liveness probe — a list call capped at one element.
    async fn health(&self) -> DriverResult<()>;

    /// Produces every asset across every configured region/zone/datacenter.
    /// A per-region failure is logged and skipped rather than aborting the
    /// whole discovery.
    async fn discover_assets(&self, org_id: OrgId) -> DriverResult<Vec<NormalizedAsset>>;

    async fn discover_images(&self) -> DriverResult<Vec<ImageInfo>>;

    /// Releases underlying SDK/HTTP clients.
    async fn close(&mut self) -> DriverResult<()>;

    async fn apply_patches(&self, _asset_ref: &str, _params: serde_json::Value) -> DriverResult<PatchOperation> {
        Err(DriverError::NotSupported)
    }

    async fn get_patch_status(&self, _op_id: &str) -> DriverResult<PatchStatus> {
        Err(DriverError::NotSupported)
    }

    async fn scan_for_patches(&self, _asset_ref: &str) -> DriverResult<PatchOperation> {
        Err(DriverError::NotSupported)
    }
}

pub(crate) fn require_str<'a>(blob: &'a serde_json::Value, key: &str) -> DriverResult<&'a str> {
    blob.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| DriverError::Configuration(format!("missing required configBlob field `{key}`")))
}

pub(crate) fn optional_str_vec(blob: &serde_json::Value, key: &str) -> Vec<String> {
    blob.get(key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

pub(crate) fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("failed to build HTTP client")
}
