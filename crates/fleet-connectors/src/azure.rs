//! Azure connector driver.
//!
//! `configBlob`: `{subscription_id, tenant_id, client_id, client_secret}`.
//! Azure's Resource Graph lists VMs across every region for a subscription in
//! one paginated call, so there is no region fan-out loop here — the region
//! comes from each returned resource's `location`.

use async_trait::async_trait;
use fleet_proto::{AssetState, NormalizedAsset, OrgId, Platform};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

use crate::driver::{build_http_client, require_str, Driver, ImageInfo, PatchOperation, PatchStatus, PatchStatusResponse};
use crate::error::{DriverError, DriverResult};
use crate::retry::{transient, with_retry};

#[derive(Debug, Deserialize)]
struct ListVmsPage {
    value: Vec<RawVm>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVm {
    name: String,
    location: String,
    #[serde(rename = "provisioningState")]
    provisioning_state: String,
    #[serde(default)]
    tags: HashMap<String, String>,
    image_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListImagesPage {
    value: Vec<RawImage>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    name: String,
    #[serde(rename = "timeCreated")]
    time_created: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

pub struct AzureDriver {
    base_url: String,
    subscription_id: String,
    #[allow(dead_code)]
    tenant_id: String,
    #[allow(dead_code)]
    client_id: String,
    #[allow(dead_code)]
    client_secret: String,
    client: reqwest::Client,
}

impl AzureDriver {
    pub fn new(config_blob: &serde_json::Value) -> DriverResult<Self> {
        let subscription_id = require_str(config_blob, "subscription_id")?.to_string();
        let tenant_id = require_str(config_blob, "tenant_id")?.to_string();
        let client_id = require_str(config_blob, "client_id")?.to_string();
        let client_secret = require_str(config_blob, "client_secret")?.to_string();
        let base_url = config_blob
            .get("api_base_url")
            .and_then(|v| v.as_str())
            .unwrap_or("https://management.azure.com/fleet-core")
            .to_string();

        Ok(Self {
            base_url,
            subscription_id,
            tenant_id,
            client_id,
            client_secret,
            client: build_http_client(),
        })
    }

    async fn list_vms_page(&self, skip_token: Option<&str>) -> DriverResult<ListVmsPage> {
        let mut url = format!("{}/subscriptions/{}/virtualMachines", self.base_url, self.subscription_id);
        if let Some(token) = skip_token {
            url.push_str(&format!("?$skiptoken={token}"));
        }
        let resp = self.client.get(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth("Azure list-VMs unauthorized".into()));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("Azure list-VMs returned {status}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    async fn list_images_page(&self, skip_token: Option<&str>) -> DriverResult<ListImagesPage> {
        let mut url = format!("{}/subscriptions/{}/images", self.base_url, self.subscription_id);
        if let Some(token) = skip_token {
            url.push_str(&format!("?$skiptoken={token}"));
        }
        let resp = self.client.get(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth("Azure list-images unauthorized".into()));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("Azure list-images returned {status}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    fn normalize(&self, raw: RawVm) -> NormalizedAsset {
        let image_ref = raw.image_reference.clone();
        let image_version = image_ref.as_deref().and_then(|img| fleet_proto::extract_image_version(img, &raw.tags));
        NormalizedAsset {
            platform: Platform::Azure,
            account: self.subscription_id.clone(),
            region: raw.location,
            instance_ref: raw.name,
            name: String::new(),
            image_ref,
            image_version,
            state: AssetState::from_vendor_state(&raw.provisioning_state),
            tags: raw.tags,
        }
    }
}

#[async_trait]
impl Driver for AzureDriver {
    fn platform(&self) -> Platform {
        Platform::Azure
    }

    async fn connect(&mut self) -> DriverResult<()> {
        with_retry("azure.connect", || self.list_vms_page(None)).await?;
        info!(subscription_id = %self.subscription_id, "Azure driver connected");
        Ok(())
    }

    async fn health(&self) -> DriverResult<()> {
        with_retry("azure.health", || self.list_vms_page(None)).await?;
        Ok(())
    }

    async fn discover_assets(&self, _org_id: OrgId) -> DriverResult<Vec<NormalizedAsset>> {
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = with_retry("azure.list_vms", || self.list_vms_page(token.as_deref())).await?;
            out.extend(page.value.into_iter().map(|r| self.normalize(r)));
            match page.next_link {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(out)
    }

    async fn discover_images(&self) -> DriverResult<Vec<ImageInfo>> {
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = with_retry("azure.list_images", || self.list_images_page(token.as_deref())).await?;
            out.extend(page.value.into_iter().map(|img| {
                let version = fleet_proto::extract_image_version(&img.name, &img.tags);
                ImageInfo { image_ref: img.name.clone(), name: img.name, version, created_at: img.time_created }
            }));
            match page.next_link {
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
        with_retry("azure.apply_patches", || self.post_patch(asset_ref, &params)).await
    }

    async fn get_patch_status(&self, op_id: &str) -> DriverResult<PatchStatus> {
        with_retry("azure.get_patch_status", || self.fetch_patch_status(op_id)).await
    }

    async fn scan_for_patches(&self, asset_ref: &str) -> DriverResult<PatchOperation> {
        with_retry("azure.scan_for_patches", || self.post_scan(asset_ref)).await
    }
}

impl AzureDriver {
    async fn post_patch(&self, asset_ref: &str, params: &serde_json::Value) -> DriverResult<PatchOperation> {
        let url = format!("{}/subscriptions/{}/virtualMachines/{}/runCommand", self.base_url, self.subscription_id, asset_ref);
        let resp = self.client.post(&url).json(params).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("Azure apply-patches unauthorized for {asset_ref}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("Azure apply-patches returned {status} for {asset_ref}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    async fn post_scan(&self, asset_ref: &str) -> DriverResult<PatchOperation> {
        let url = format!("{}/subscriptions/{}/virtualMachines/{}/assessPatches", self.base_url, self.subscription_id, asset_ref);
        let resp = self.client.post(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("Azure scan-for-patches unauthorized for {asset_ref}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("Azure scan-for-patches returned {status} for {asset_ref}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    async fn fetch_patch_status(&self, op_id: &str) -> DriverResult<PatchStatus> {
        let url = format!("{}/subscriptions/{}/operations/{}", self.base_url, self.subscription_id, op_id);
        let resp = self.client.get(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("Azure get-patch-status unauthorized for {op_id}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("Azure get-patch-status returned {status} for {op_id}")));
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
    fn construction_requires_all_four_fields() {
        let blob = serde_json::json!({"subscription_id": "s", "tenant_id": "t", "client_id": "c"});
        assert!(AzureDriver::new(&blob).is_err());
        let blob = serde_json::json!({"subscription_id": "s", "tenant_id": "t", "client_id": "c", "client_secret": "x"});
        assert!(AzureDriver::new(&blob).is_ok());
    }

    #[test]
    fn normalize_uses_location_as_region() {
        let blob = serde_json::json!({"subscription_id": "s", "tenant_id": "t", "client_id": "c", "client_secret": "x"});
        let driver = AzureDriver::new(&blob).unwrap();
        let raw = RawVm {
            name: "vm-1".into(),
            location: "westeurope".into(),
            provisioning_state: "Succeeded".into(),
            tags: HashMap::new(),
            image_reference: None,
        };
        let asset = driver.normalize(raw);
        assert_eq!(asset.region, "westeurope");
        assert_eq!(asset.account, "s");
    }
}
