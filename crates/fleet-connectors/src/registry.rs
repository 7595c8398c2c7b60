//! Connector driver registry.
//!
//! One [`Driver`] per connector, keyed by its configured platform, with a
//! health-aware lookup that prefers a driver only while it reports healthy.
//! Mirrors `ProviderRegistry::select_provider`'s pattern of probing health
//! before handing a caller a provider, generalized from VPS providers to
//! fleet platforms.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_proto::Platform;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::aws::AwsDriver;
use crate::azure::AzureDriver;
use crate::driver::Driver;
use crate::error::{DriverError, DriverResult};
use crate::gcp::GcpDriver;
use crate::k8s::K8sDriver;
use crate::vsphere::VSphereDriver;

/// Builds a boxed driver for `platform` from a connector's `configBlob`.
/// New platforms are added here and nowhere else.
pub fn build_driver(platform: Platform, config_blob: &serde_json::Value) -> DriverResult<Box<dyn Driver>> {
    match platform {
        Platform::Aws => Ok(Box::new(AwsDriver::new(config_blob)?)),
        Platform::Azure => Ok(Box::new(AzureDriver::new(config_blob)?)),
        Platform::Gcp => Ok(Box::new(GcpDriver::new(config_blob)?)),
        Platform::VSphere => Ok(Box::new(VSphereDriver::new(config_blob)?)),
        Platform::K8s => Ok(Box::new(K8sDriver::new(config_blob)?)),
    }
}

/// Holds one live driver per connector ID, refreshing health on demand.
pub struct ConnectorRegistry {
    drivers: RwLock<HashMap<uuid::Uuid, Arc<dyn Driver>>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self { drivers: RwLock::new(HashMap::new()) }
    }

    pub async fn register(&self, connector_id: uuid::Uuid, driver: Arc<dyn Driver>) {
        info!(connector_id = %connector_id, platform = %driver.platform(), "registering connector driver");
        self.drivers.write().await.insert(connector_id, driver);
    }

    pub async fn remove(&self, connector_id: &uuid::Uuid) {
        self.drivers.write().await.remove(connector_id);
    }

    pub async fn get(&self, connector_id: &uuid::Uuid) -> Option<Arc<dyn Driver>> {
        self.drivers.read().await.get(connector_id).cloned()
    }

    /// Returns the connector IDs whose drivers currently pass a health check,
    /// logging (not failing) the ones that don't.
    pub async fn healthy_drivers(&self) -> Vec<uuid::Uuid> {
        let drivers = self.drivers.read().await;
        let mut healthy = Vec::new();
        for (id, driver) in drivers.iter() {
            match driver.health().await {
                Ok(()) => healthy.push(*id),
                Err(e) => warn!(connector_id = %id, error = %e, "connector driver failed health check"),
            }
        }
        healthy
    }

    pub async fn all_ids(&self) -> Vec<uuid::Uuid> {
        self.drivers.read().await.keys().copied().collect()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn is_configuration_error(err: &DriverError) -> bool {
    matches!(err, DriverError::Configuration(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_driver_rejects_missing_required_fields() {
        let blob = serde_json::json!({});
        let err = build_driver(Platform::Aws, &blob).unwrap_err();
        assert!(is_configuration_error(&err));
    }

    #[tokio::test]
    async fn registry_starts_empty() {
        let registry = ConnectorRegistry::new();
        assert!(registry.all_ids().await.is_empty());
    }
}
