//! GCP connector driver.
//!
//! `configBlob`: `{project_id, credentials_file?, zones?}`. Fans out across
//! configured zones; each zone's listing is paginated by `pageToken`. GCP
//! zone identifiers embed their region (`us-central1-a`), trimmed per the
//! normalization rule this driver applies.

use async_trait::async_trait;
use fleet_proto::{trim_zone_to_region, AssetState, NormalizedAsset, OrgId, Platform};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::driver::{build_http_client, optional_str_vec, require_str, Driver, ImageInfo, PatchOperation, PatchStatus, PatchStatusResponse};
use crate::error::{DriverError, DriverResult};
use crate::retry::{transient, with_retry};

#[derive(Debug, Deserialize)]
struct ListInstancesPage {
    items: Vec<RawInstance>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInstance {
    name: String,
    status: String,
    #[serde(rename = "machineType")]
    machine_type: Option<String>,
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(rename = "sourceImage")]
    source_image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListImagesPage {
    items: Vec<RawImage>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    name: String,
    #[serde(rename = "creationTimestamp")]
    creation_timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    labels: HashMap<String, String>,
}

pub struct GcpDriver {
    base_url: String,
    project_id: String,
    zones: Vec<String>,
    client: reqwest::Client,
}

impl GcpDriver {
    pub fn new(config_blob: &serde_json::Value) -> DriverResult<Self> {
        let project_id = require_str(config_blob, "project_id")?.to_string();
        let mut zones = optional_str_vec(config_blob, "zones");
        if zones.is_empty() {
            zones.push("us-central1-a".to_string());
        }
        let base_url = config_blob
            .get("api_base_url")
            .and_then(|v| v.as_str())
            .unwrap_or("https://compute.googleapis.com/compute/v1/fleet-core")
            .to_string();

        Ok(Self { base_url, project_id, zones, client: build_http_client() })
    }

    async fn list_instances_page(&self, zone: &str, page_token: Option<&str>) -> DriverResult<ListInstancesPage> {
        let mut url = format!("{}/projects/{}/zones/{}/instances", self.base_url, self.project_id, zone);
        if let Some(token) = page_token {
            url.push_str(&format!("?pageToken={token}"));
        }
        let resp = self.client.get(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("GCP list-instances unauthorized in {zone}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("GCP list-instances returned {status} in {zone}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    async fn list_images_page(&self, page_token: Option<&str>) -> DriverResult<ListImagesPage> {
        let mut url = format!("{}/projects/{}/global/images", self.base_url, self.project_id);
        if let Some(token) = page_token {
            url.push_str(&format!("?pageToken={token}"));
        }
        let resp = self.client.get(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth("GCP list-images unauthorized".into()));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("GCP list-images returned {status}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    fn normalize(&self, zone: &str, raw: RawInstance) -> NormalizedAsset {
        let image_ref = raw.source_image.clone();
        let image_version = image_ref.as_deref().and_then(|img| fleet_proto::extract_image_version(img, &raw.labels));
        let mut tags = raw.labels;
        tags.insert("zone".to_string(), zone.to_string());
        if let Some(mt) = &raw.machine_type {
            tags.insert("machine_type".to_string(), mt.clone());
        }
        NormalizedAsset {
            platform: Platform::Gcp,
            account: self.project_id.clone(),
            region: trim_zone_to_region(zone),
            instance_ref: raw.name,
            name: String::new(),
            image_ref,
            image_version,
            state: AssetState::from_vendor_state(&raw.status),
            tags,
        }
    }
}

#[async_trait]
impl Driver for GcpDriver {
    fn platform(&self) -> Platform {
        Platform::Gcp
    }

    async fn connect(&mut self) -> DriverResult<()> {
        let zone = self.zones[0].clone();
        with_retry("gcp.connect", || self.list_instances_page(&zone, None)).await?;
        info!(project_id = %self.project_id, "GCP driver connected");
        Ok(())
    }

    async fn health(&self) -> DriverResult<()> {
        let zone = self.zones[0].clone();
        with_retry("gcp.health", || self.list_instances_page(&zone, None)).await?;
        Ok(())
    }

    async fn discover_assets(&self, _org_id: OrgId) -> DriverResult<Vec<NormalizedAsset>> {
        let mut out = Vec::new();
        for zone in &self.zones {
            let mut token: Option<String> = None;
            let mut zone_assets = Vec::new();
            let failed = loop {
                match with_retry("gcp.list_instances", || self.list_instances_page(zone, token.as_deref())).await {
                    Ok(page) => {
                        zone_assets.extend(page.items.into_iter().map(|r| self.normalize(zone, r)));
                        match page.next_page_token {
                            Some(next) => token = Some(next),
                            None => break false,
                        }
                    }
                    Err(e) => {
                        warn!(zone, error = %e, "GCP discovery failed for zone, skipping");
                        break true;
                    }
                }
            };
            if !failed {
                out.extend(zone_assets);
            }
        }
        Ok(out)
    }

    async fn discover_images(&self) -> DriverResult<Vec<ImageInfo>> {
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = with_retry("gcp.list_images", || self.list_images_page(token.as_deref())).await?;
            out.extend(page.items.into_iter().map(|img| {
                let version = fleet_proto::extract_image_version(&img.name, &img.labels);
                ImageInfo { image_ref: img.name.clone(), name: img.name, version, created_at: img.creation_timestamp }
            }));
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(out)
    }

    async fn close(&mut self) -> DriverResult<()> {
        Ok(())
    }

    async fn apply_patches(&self, asset_ref: &str, params: serde_json::Value) -> DriverResult<PatchOperation> {
        with_retry("gcp.apply_patches", || self.post_patch(asset_ref, &params)).await
    }

    async fn get_patch_status(&self, op_id: &str) -> DriverResult<PatchStatus> {
        with_retry("gcp.get_patch_status", || self.fetch_patch_status(op_id)).await
    }

    async fn scan_for_patches(&self, asset_ref: &str) -> DriverResult<PatchOperation> {
        with_retry("gcp.scan_for_patches", || self.post_scan(asset_ref)).await
    }
}

impl GcpDriver {
    async fn post_patch(&self, asset_ref: &str, params: &serde_json::Value) -> DriverResult<PatchOperation> {
        let zone = &self.zones[0];
        let url = format!("{}/projects/{}/zones/{}/instances/{}/patch", self.base_url, self.project_id, zone, asset_ref);
        let resp = self.client.post(&url).json(params).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("GCP apply-patches unauthorized for {asset_ref}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("GCP apply-patches returned {status} for {asset_ref}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    async fn post_scan(&self, asset_ref: &str) -> DriverResult<PatchOperation> {
        let zone = &self.zones[0];
        let url = format!("{}/projects/{}/zones/{}/instances/{}/scan", self.base_url, self.project_id, zone, asset_ref);
        let resp = self.client.post(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("GCP scan-for-patches unauthorized for {asset_ref}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("GCP scan-for-patches returned {status} for {asset_ref}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    async fn fetch_patch_status(&self, op_id: &str) -> DriverResult<PatchStatus> {
        let url = format!("{}/projects/{}/global/operations/{}", self.base_url, self.project_id, op_id);
        let resp = self.client.get(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("GCP get-patch-status unauthorized for {op_id}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("GCP get-patch-status returned {status} for {op_id}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        let parsed: PatchStatusResponse = resp.json().await.map_err(DriverError::Http)?;
        Ok(parsed.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_zone_when_unconfigured() {
        let blob = serde_json::json!({"project_id": "p1"});
        let driver = GcpDriver::new(&blob).unwrap();
        assert_eq!(driver.zones, vec!["us-central1-a".to_string()]);
    }

    #[test]
    fn normalize_trims_zone_to_region() {
        let blob = serde_json::json!({"project_id": "p1"});
        let driver = GcpDriver::new(&blob).unwrap();
        let raw = RawInstance {
            name: "inst-1".into(),
            status: "RUNNING".into(),
            machine_type: Some("e2-medium".into()),
            labels: HashMap::new(),
            source_image: None,
        };
        let asset = driver.normalize("us-central1-a", raw);
        assert_eq!(asset.region, "us-central1");
        assert_eq!(asset.tags.get("zone").map(String::as_str), Some("us-central1-a"));
    }
}
