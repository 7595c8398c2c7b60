//! AWS connector driver.
//!
//! `configBlob`: `{region, regions?, assume_role_arn?, external_id?}`. Talks
//! to a generic paginated control-plane list endpoint — what matters is
//! list-instances returning a continuation token, not any particular SDK
//! surface.

use async_trait::async_trait;
use fleet_proto::{AssetState, NormalizedAsset, OrgId, Platform};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::driver::{build_http_client, require_str, Driver, ImageInfo, PatchOperation, PatchStatus, PatchStatusResponse};
use crate::error::{DriverError, DriverResult};
use crate::retry::{transient, with_retry};

#[derive(Debug, Deserialize)]
struct ListInstancesPage {
    instances: Vec<RawInstance>,
    continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInstance {
    instance_id: String,
    account_id: String,
    state: String,
    name: Option<String>,
    image_id: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ListImagesPage {
    images: Vec<RawImage>,
    continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    image_id: String,
    name: String,
    created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

pub struct AwsDriver {
    base_url: String,
    region: String,
    regions: Vec<String>,
    #[allow(dead_code)]
    assume_role_arn: Option<String>,
    #[allow(dead_code)]
    external_id: Option<String>,
    client: reqwest::Client,
}

impl AwsDriver {
    pub fn new(config_blob: &serde_json::Value) -> DriverResult<Self> {
        let region = require_str(config_blob, "region")?.to_string();
        let regions = config_blob
            .get("regions")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_else(|| vec![region.clone()]);
        let assume_role_arn = config_blob.get("assume_role_arn").and_then(|v| v.as_str()).map(String::from);
        let external_id = config_blob.get("external_id").and_then(|v| v.as_str()).map(String::from);
        let base_url = config_blob
            .get("api_base_url")
            .and_then(|v| v.as_str())
            .unwrap_or("https://ec2.amazonaws.com/fleet-core")
            .to_string();

        Ok(Self {
            base_url,
            region,
            regions,
            assume_role_arn,
            external_id,
            client: build_http_client(),
        })
    }

    async fn list_instances_page(&self, region: &str, continuation_token: Option<&str>) -> DriverResult<ListInstancesPage> {
        let mut url = format!("{}/{}/instances?max_results=100", self.base_url, region);
        if let Some(token) = continuation_token {
            url.push_str(&format!("&continuation_token={token}"));
        }
        let resp = self.client.get(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("AWS list-instances unauthorized in {region}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("AWS list-instances returned {status} in {region}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    async fn list_images_page(&self, continuation_token: Option<&str>) -> DriverResult<ListImagesPage> {
        let mut url = format!("{}/{}/images?owned=self", self.base_url, self.region);
        if let Some(token) = continuation_token {
            url.push_str(&format!("&continuation_token={token}"));
        }
        let resp = self.client.get(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth("AWS list-images unauthorized".to_string()));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("AWS list-images returned {status}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    fn normalize(&self, region: &str, raw: RawInstance) -> NormalizedAsset {
        let image_ref = raw.image_id.clone();
        let image_version = image_ref
            .as_deref()
            .and_then(|img| fleet_proto::extract_image_version(img, &raw.tags));
        let mut tags = raw.tags;
        tags.insert("aws:region".to_string(), region.to_string());

        NormalizedAsset {
            platform: Platform::Aws,
            account: raw.account_id,
            region: region.to_string(),
            instance_ref: raw.instance_id,
            name: raw.name.unwrap_or_default(),
            image_ref,
            image_version,
            state: AssetState::from_vendor_state(&raw.state),
            tags,
        }
    }
}

#[async_trait]
impl Driver for AwsDriver {
    fn platform(&self) -> Platform {
        Platform::Aws
    }

    async fn connect(&mut self) -> DriverResult<()> {
        with_retry("aws.connect", || self.list_instances_page(&self.region, None)).await?;
        info!(region = %self.region, "AWS driver connected");
        Ok(())
    }

    async fn health(&self) -> DriverResult<()> {
        with_retry("aws.health", || self.list_instances_page(&self.region, None)).await?;
        Ok(())
    }

    async fn discover_assets(&self, _org_id: OrgId) -> DriverResult<Vec<NormalizedAsset>> {
        let mut out = Vec::new();
        for region in &self.regions {
            let mut token: Option<String> = None;
            let mut region_assets = Vec::new();
            let region_failed = loop {
                match with_retry("aws.list_instances", || self.list_instances_page(region, token.as_deref())).await {
                    Ok(page) => {
                        region_assets.extend(page.instances.into_iter().map(|r| self.normalize(region, r)));
                        match page.continuation_token {
                            Some(next) => token = Some(next),
                            None => break false,
                        }
                    }
                    Err(e) => {
                        warn!(region, error = %e, "AWS discovery failed for region, skipping");
                        break true;
                    }
                }
            };
            if !region_failed {
                out.extend(region_assets);
            }
        }
        Ok(out)
    }

    async fn discover_images(&self) -> DriverResult<Vec<ImageInfo>> {
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = with_retry("aws.list_images", || self.list_images_page(token.as_deref())).await?;
            out.extend(page.images.into_iter().map(|img| {
                let version = fleet_proto::extract_image_version(&img.name, &img.tags);
                ImageInfo { image_ref: img.image_id, name: img.name, version, created_at: img.created_at }
            }));
            match page.continuation_token {
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
        with_retry("aws.apply_patches", || self.post_patch(asset_ref, &params)).await
    }

    async fn get_patch_status(&self, op_id: &str) -> DriverResult<PatchStatus> {
        with_retry("aws.get_patch_status", || self.fetch_patch_status(op_id)).await
    }

    async fn scan_for_patches(&self, asset_ref: &str) -> DriverResult<PatchOperation> {
        with_retry("aws.scan_for_patches", || self.post_scan(asset_ref)).await
    }
}

impl AwsDriver {
    async fn post_patch(&self, asset_ref: &str, params: &serde_json::Value) -> DriverResult<PatchOperation> {
        let url = format!("{}/{}/instances/{}/patch", self.base_url, self.region, asset_ref);
        let resp = self.client.post(&url).json(params).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("AWS apply-patches unauthorized for {asset_ref}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("AWS apply-patches returned {status} for {asset_ref}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    async fn post_scan(&self, asset_ref: &str) -> DriverResult<PatchOperation> {
        let url = format!("{}/{}/instances/{}/scan", self.base_url, self.region, asset_ref);
        let resp = self.client.post(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("AWS scan-for-patches unauthorized for {asset_ref}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("AWS scan-for-patches returned {status} for {asset_ref}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    async fn fetch_patch_status(&self, op_id: &str) -> DriverResult<PatchStatus> {
        let url = format!("{}/{}/operations/{}", self.base_url, self.region, op_id);
        let resp = self.client.get(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("AWS get-patch-status unauthorized for {op_id}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("AWS get-patch-status returned {status} for {op_id}")));
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
    fn construction_requires_region() {
        let blob = serde_json::json!({});
        assert!(AwsDriver::new(&blob).is_err());
    }

    #[test]
    fn defaults_regions_to_single_region() {
        let blob = serde_json::json!({"region": "us-east-1"});
        let driver = AwsDriver::new(&blob).unwrap();
        assert_eq!(driver.regions, vec!["us-east-1".to_string()]);
    }

    #[test]
    fn normalizes_instance_state_and_tags() {
        let blob = serde_json::json!({"region": "us-east-1"});
        let driver = AwsDriver::new(&blob).unwrap();
        let raw = RawInstance {
            instance_id: "i-1".into(),
            account_id: "acc-1".into(),
            state: "running".into(),
            name: Some("web-1".into()),
            image_id: Some("ami-v20240101".into()),
            tags: HashMap::new(),
        };
        let asset = driver.normalize("us-east-1", raw);
        assert_eq!(asset.state, AssetState::Running);
        assert_eq!(asset.image_version.as_deref(), Some("20240101"));
        assert_eq!(asset.tags.get("aws:region").map(String::as_str), Some("us-east-1"));
    }
}
