//! vSphere connector driver.
//!
//! `configBlob`: `{host, username, password, datacenters?, clusters?}`. Fans
//! out across configured datacenters; each is paginated by page/per_page,
//! mirroring the Hetzner pagination idiom this workspace's other drivers
//! share.

use async_trait::async_trait;
use fleet_proto::{AssetState, NormalizedAsset, OrgId, Platform};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::driver::{build_http_client, optional_str_vec, require_str, Driver, ImageInfo, PatchOperation, PatchStatus, PatchStatusResponse};
use crate::error::{DriverError, DriverResult};
use crate::retry::{transient, with_retry};

#[derive(Debug, Deserialize)]
struct ListVmsPage {
    vms: Vec<RawVm>,
    page: u32,
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct RawVm {
    moid: String,
    name: String,
    power_state: String,
    #[serde(default)]
    custom_attributes: HashMap<String, String>,
    guest_os: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListTemplatesPage {
    templates: Vec<RawTemplate>,
    page: u32,
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct RawTemplate {
    moid: String,
    name: String,
    created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    custom_attributes: HashMap<String, String>,
}

pub struct VSphereDriver {
    base_url: String,
    host: String,
    #[allow(dead_code)]
    username: String,
    #[allow(dead_code)]
    password: String,
    datacenters: Vec<String>,
    client: reqwest::Client,
}

impl VSphereDriver {
    pub fn new(config_blob: &serde_json::Value) -> DriverResult<Self> {
        let host = require_str(config_blob, "host")?.to_string();
        let username = require_str(config_blob, "username")?.to_string();
        let password = require_str(config_blob, "password")?.to_string();
        let mut datacenters = optional_str_vec(config_blob, "datacenters");
        if datacenters.is_empty() {
            datacenters.push("default".to_string());
        }
        let base_url = config_blob
            .get("api_base_url")
            .and_then(|v| v.as_str())
            .unwrap_or("https://vcenter.local/fleet-core")
            .to_string();

        Ok(Self { base_url, host, username, password, datacenters, client: build_http_client() })
    }

    async fn list_vms_page(&self, datacenter: &str, page: u32) -> DriverResult<ListVmsPage> {
        let url = format!("{}/datacenters/{}/vms?page={}&per_page=50", self.base_url, datacenter, page);
        let resp = self.client.get(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("vSphere list-VMs unauthorized in {datacenter}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("vSphere list-VMs returned {status} in {datacenter}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    async fn list_templates_page(&self, datacenter: &str, page: u32) -> DriverResult<ListTemplatesPage> {
        let url = format!("{}/datacenters/{}/templates?page={}&per_page=50", self.base_url, datacenter, page);
        let resp = self.client.get(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("vSphere list-templates unauthorized in {datacenter}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("vSphere list-templates returned {status} in {datacenter}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    fn normalize(&self, datacenter: &str, raw: RawVm) -> NormalizedAsset {
        let image_version = raw.guest_os.as_deref().and_then(|img| fleet_proto::extract_image_version(img, &raw.custom_attributes));
        NormalizedAsset {
            platform: Platform::VSphere,
            account: self.host.clone(),
            region: datacenter.to_string(),
            instance_ref: raw.moid,
            name: raw.name,
            image_ref: raw.guest_os,
            image_version,
            state: AssetState::from_vendor_state(&raw.power_state),
            tags: raw.custom_attributes,
        }
    }
}

#[async_trait]
impl Driver for VSphereDriver {
    fn platform(&self) -> Platform {
        Platform::VSphere
    }

    async fn connect(&mut self) -> DriverResult<()> {
        let dc = self.datacenters[0].clone();
        with_retry("vsphere.connect", || self.list_vms_page(&dc, 1)).await?;
        info!(host = %self.host, "vSphere driver connected");
        Ok(())
    }

    async fn health(&self) -> DriverResult<()> {
        let dc = self.datacenters[0].clone();
        with_retry("vsphere.health", || self.list_vms_page(&dc, 1)).await?;
        Ok(())
    }

    async fn discover_assets(&self, _org_id: OrgId) -> DriverResult<Vec<NormalizedAsset>> {
        let mut out = Vec::new();
        for dc in &self.datacenters {
            let mut page = 1u32;
            let mut dc_assets = Vec::new();
            let failed = loop {
                match with_retry("vsphere.list_vms", || self.list_vms_page(dc, page)).await {
                    Ok(result) => {
                        let total_pages = result.total_pages;
                        dc_assets.extend(result.vms.into_iter().map(|r| self.normalize(dc, r)));
                        if page >= total_pages {
                            break false;
                        }
                        page += 1;
                    }
                    Err(e) => {
                        warn!(datacenter = dc, error = %e, "vSphere discovery failed for datacenter, skipping");
                        break true;
                    }
                }
            };
            if !failed {
                out.extend(dc_assets);
            }
        }
        Ok(out)
    }

    /// vSphere's analogue of an owned image is a VM template, enumerated the
    /// same way VMs are — owned images and templates are enumerated
    /// analogously here.
    async fn discover_images(&self) -> DriverResult<Vec<ImageInfo>> {
        let mut out = Vec::new();
        for dc in &self.datacenters {
            let mut page = 1u32;
            let mut dc_images = Vec::new();
            let failed = loop {
                match with_retry("vsphere.list_templates", || self.list_templates_page(dc, page)).await {
                    Ok(result) => {
                        let total_pages = result.total_pages;
                        dc_images.extend(result.templates.into_iter().map(|t| {
                            let version = fleet_proto::extract_image_version(&t.name, &t.custom_attributes);
                            ImageInfo { image_ref: t.moid, name: t.name, version, created_at: t.created_at }
                        }));
                        if page >= total_pages {
                            break false;
                        }
                        page += 1;
                    }
                    Err(e) => {
                        warn!(datacenter = dc, error = %e, "vSphere template discovery failed for datacenter, skipping");
                        break true;
                    }
                }
            };
            if !failed {
                out.extend(dc_images);
            }
        }
        Ok(out)
    }

    async fn close(&mut self) -> DriverResult<()> {
        Ok(())
    }

    async fn apply_patches(&self, asset_ref: &str, params: serde_json::Value) -> DriverResult<PatchOperation> {
        with_retry("vsphere.apply_patches", || self.post_patch(asset_ref, &params)).await
    }

    async fn get_patch_status(&self, op_id: &str) -> DriverResult<PatchStatus> {
        with_retry("vsphere.get_patch_status", || self.fetch_patch_status(op_id)).await
    }

    async fn scan_for_patches(&self, asset_ref: &str) -> DriverResult<PatchOperation> {
        with_retry("vsphere.scan_for_patches", || self.post_scan(asset_ref)).await
    }
}

impl VSphereDriver {
    async fn post_patch(&self, asset_ref: &str, params: &serde_json::Value) -> DriverResult<PatchOperation> {
        let dc = &self.datacenters[0];
        let url = format!("{}/datacenters/{}/vms/{}/patch", self.base_url, dc, asset_ref);
        let resp = self.client.post(&url).json(params).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("vSphere apply-patches unauthorized for {asset_ref}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("vSphere apply-patches returned {status} for {asset_ref}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    async fn post_scan(&self, asset_ref: &str) -> DriverResult<PatchOperation> {
        let dc = &self.datacenters[0];
        let url = format!("{}/datacenters/{}/vms/{}/scan", self.base_url, dc, asset_ref);
        let resp = self.client.post(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("vSphere scan-for-patches unauthorized for {asset_ref}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("vSphere scan-for-patches returned {status} for {asset_ref}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    async fn fetch_patch_status(&self, op_id: &str) -> DriverResult<PatchStatus> {
        let dc = &self.datacenters[0];
        let url = format!("{}/datacenters/{}/operations/{}", self.base_url, dc, op_id);
        let resp = self.client.get(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("vSphere get-patch-status unauthorized for {op_id}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("vSphere get-patch-status returned {status} for {op_id}")));
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
    fn defaults_datacenter_when_unconfigured() {
        let blob = serde_json::json!({"host": "vc1", "username": "u", "password": "p"});
        let driver = VSphereDriver::new(&blob).unwrap();
        assert_eq!(driver.datacenters, vec!["default".to_string()]);
    }
}
