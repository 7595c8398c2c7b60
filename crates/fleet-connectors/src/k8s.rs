//! Kubernetes connector driver.
//!
//! `configBlob`: `{kubeconfig?, context?, cluster_name?, namespaces?}`. An
//! "asset" here is a running Pod; discovery fans out across configured
//! namespaces the same way the cloud drivers fan out across regions/zones.

use async_trait::async_trait;
use fleet_proto::{AssetState, NormalizedAsset, OrgId, Platform};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::driver::{build_http_client, optional_str_vec, Driver, ImageInfo, PatchOperation, PatchStatus, PatchStatusResponse};
use crate::error::{DriverError, DriverResult};
use crate::retry::{transient, with_retry};

#[derive(Debug, Deserialize)]
struct ListPodsPage {
    items: Vec<RawPod>,
    #[serde(rename = "continue")]
    continue_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPod {
    name: String,
    phase: String,
    #[serde(default)]
    labels: HashMap<String, String>,
    image: Option<String>,
}

pub struct K8sDriver {
    base_url: String,
    cluster_name: String,
    #[allow(dead_code)]
    context: Option<String>,
    namespaces: Vec<String>,
    client: reqwest::Client,
}

impl K8sDriver {
    pub fn new(config_blob: &serde_json::Value) -> DriverResult<Self> {
        let cluster_name = config_blob
            .get("cluster_name")
            .and_then(|v| v.as_str())
            .unwrap_or("default")
            .to_string();
        let context = config_blob.get("context").and_then(|v| v.as_str()).map(String::from);
        let mut namespaces = optional_str_vec(config_blob, "namespaces");
        if namespaces.is_empty() {
            namespaces.push("default".to_string());
        }
        let base_url = config_blob
            .get("api_base_url")
            .and_then(|v| v.as_str())
            .unwrap_or("https://kubernetes.default.svc/fleet-core")
            .to_string();

        Ok(Self { base_url, cluster_name, context, namespaces, client: build_http_client() })
    }

    async fn list_pods_page(&self, namespace: &str, continue_token: Option<&str>) -> DriverResult<ListPodsPage> {
        let mut url = format!("{}/api/v1/namespaces/{}/pods", self.base_url, namespace);
        if let Some(token) = continue_token {
            url.push_str(&format!("?continue={token}"));
        }
        let resp = self.client.get(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("k8s list-pods unauthorized in {namespace}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("k8s list-pods returned {status} in {namespace}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    fn normalize(&self, namespace: &str, raw: RawPod) -> NormalizedAsset {
        let image_ref = raw.image.clone();
        let image_version = image_ref.as_deref().and_then(|img| fleet_proto::extract_image_version(img, &raw.labels));
        let mut tags = raw.labels;
        tags.insert("namespace".to_string(), namespace.to_string());
        NormalizedAsset {
            platform: Platform::K8s,
            account: self.cluster_name.clone(),
            region: namespace.to_string(),
            instance_ref: raw.name,
            name: String::new(),
            image_ref,
            image_version,
            state: AssetState::from_vendor_state(&raw.phase),
            tags,
        }
    }
}

#[async_trait]
impl Driver for K8sDriver {
    fn platform(&self) -> Platform {
        Platform::K8s
    }

    async fn connect(&mut self) -> DriverResult<()> {
        let ns = self.namespaces[0].clone();
        with_retry("k8s.connect", || self.list_pods_page(&ns, None)).await?;
        info!(cluster = %self.cluster_name, "Kubernetes driver connected");
        Ok(())
    }

    async fn health(&self) -> DriverResult<()> {
        let ns = self.namespaces[0].clone();
        with_retry("k8s.health", || self.list_pods_page(&ns, None)).await?;
        Ok(())
    }

    async fn discover_assets(&self, _org_id: OrgId) -> DriverResult<Vec<NormalizedAsset>> {
        let mut out = Vec::new();
        for ns in &self.namespaces {
            let mut token: Option<String> = None;
            let mut ns_assets = Vec::new();
            let failed = loop {
                match with_retry("k8s.list_pods", || self.list_pods_page(ns, token.as_deref())).await {
                    Ok(page) => {
                        ns_assets.extend(page.items.into_iter().map(|r| self.normalize(ns, r)));
                        match page.continue_token {
                            Some(next) => token = Some(next),
                            None => break false,
                        }
                    }
                    Err(e) => {
                        warn!(namespace = ns, error = %e, "Kubernetes discovery failed for namespace, skipping");
                        break true;
                    }
                }
            };
            if !failed {
                out.extend(ns_assets);
            }
        }
        Ok(out)
    }

    /// Kubernetes has no owned-image registry of its own — pod images live in
    /// whatever external registry their manifests reference, not in anything
    /// this cluster's API exposes as a listable, owned resource. Empty is the
    /// correct answer here, not a stub.
    async fn discover_images(&self) -> DriverResult<Vec<ImageInfo>> {
        Ok(Vec::new())
    }

    async fn close(&mut self) -> DriverResult<()> {
        Ok(())
    }

    /// "Patching" a pod means rolling it onto a new image via the workload's
    /// control-plane endpoint — there is no in-place package-manager patch
    /// concept for an immutable container image.
    async fn apply_patches(&self, asset_ref: &str, params: serde_json::Value) -> DriverResult<PatchOperation> {
        with_retry("k8s.apply_patches", || self.post_patch(asset_ref, &params)).await
    }

    async fn get_patch_status(&self, op_id: &str) -> DriverResult<PatchStatus> {
        with_retry("k8s.get_patch_status", || self.fetch_patch_status(op_id)).await
    }

    async fn scan_for_patches(&self, asset_ref: &str) -> DriverResult<PatchOperation> {
        with_retry("k8s.scan_for_patches", || self.post_scan(asset_ref)).await
    }
}

impl K8sDriver {
    async fn post_patch(&self, asset_ref: &str, params: &serde_json::Value) -> DriverResult<PatchOperation> {
        let ns = &self.namespaces[0];
        let url = format!("{}/api/v1/namespaces/{}/pods/{}/patch", self.base_url, ns, asset_ref);
        let resp = self.client.post(&url).json(params).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("k8s apply-patches unauthorized for {asset_ref}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("k8s apply-patches returned {status} for {asset_ref}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    async fn post_scan(&self, asset_ref: &str) -> DriverResult<PatchOperation> {
        let ns = &self.namespaces[0];
        let url = format!("{}/api/v1/namespaces/{}/pods/{}/scan", self.base_url, ns, asset_ref);
        let resp = self.client.post(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("k8s scan-for-patches unauthorized for {asset_ref}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("k8s scan-for-patches returned {status} for {asset_ref}")));
        }
        resp.error_for_status_ref().map_err(DriverError::Http)?;
        resp.json().await.map_err(DriverError::Http)
    }

    async fn fetch_patch_status(&self, op_id: &str) -> DriverResult<PatchStatus> {
        let ns = &self.namespaces[0];
        let url = format!("{}/api/v1/namespaces/{}/operations/{}", self.base_url, ns, op_id);
        let resp = self.client.get(&url).send().await.map_err(|e| transient(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("k8s get-patch-status unauthorized for {op_id}")));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(format!("k8s get-patch-status returned {status} for {op_id}")));
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
    fn defaults_namespace_and_cluster_name() {
        let blob = serde_json::json!({});
        let driver = K8sDriver::new(&blob).unwrap();
        assert_eq!(driver.namespaces, vec!["default".to_string()]);
        assert_eq!(driver.cluster_name, "default");
    }

    #[test]
    fn normalize_tags_pod_with_namespace() {
        let blob = serde_json::json!({"cluster_name": "prod-1"});
        let driver = K8sDriver::new(&blob).unwrap();
        let raw = RawPod { name: "web-7d9".into(), phase: "Running".into(), labels: HashMap::new(), image: None };
        let asset = driver.normalize("web", raw);
        assert_eq!(asset.account, "prod-1");
        assert_eq!(asset.region, "web");
        assert_eq!(asset.tags.get("namespace").map(String::as_str), Some("web"));
    }
}
