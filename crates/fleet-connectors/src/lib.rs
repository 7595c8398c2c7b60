//! Connector Driver boundary: one implementation per supported platform
//! behind a single [`Driver`] trait, plus the registry that holds a live
//! driver per connector and the shared retry policy transient errors use.

#![forbid(unsafe_code)]

mod aws;
mod azure;
mod driver;
mod error;
mod gcp;
mod k8s;
mod registry;
mod retry;
mod vsphere;

pub use aws::AwsDriver;
pub use azure::AzureDriver;
pub use driver::{Driver, ImageInfo, PatchOperation, PatchStatus};
pub use error::{DriverError, DriverResult};
pub use gcp::GcpDriver;
pub use k8s::K8sDriver;
pub use registry::{build_driver, ConnectorRegistry};
pub use retry::with_retry;
pub use vsphere::VSphereDriver;
