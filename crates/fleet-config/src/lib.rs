//! Environment knobs and connector `configBlob` schemas (spec §6).
//!
//! Two surfaces: [`parse_schedule`] turns a connector's compact duration
//! string into a `std::time::Duration` the scheduler can add to `now`, and
//! [`validate_config_blob`] checks a platform-specific JSON document has the
//! fields its driver will require before a connector is ever dispatched.

#![forbid(unsafe_code)]

use fleet_proto::Platform;
use std::time::Duration;
use tracing::warn;

pub mod env;

/// The default a connector falls back to when its schedule string fails to
/// parse. Per spec §4.4 this is never a runtime error.
pub const DEFAULT_SCHEDULE: Duration = Duration::from_secs(3600);

/// Parses a compact duration string (`"15m"`, `"1h"`, `"6h"`, `"24h"`). Any
/// value that doesn't parse — empty, wrong suffix, non-numeric magnitude —
/// degrades to [`DEFAULT_SCHEDULE`] rather than erroring (spec §4.4, §7, §8).
pub fn parse_schedule(raw: &str) -> Duration {
    let raw = raw.trim();
    if raw.len() < 2 {
        return default_with_warning(raw);
    }
    let (magnitude, unit) = raw.split_at(raw.len() - 1);
    let Ok(n) = magnitude.parse::<u64>() else {
        return default_with_warning(raw);
    };
    let seconds = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86400,
        _ => return default_with_warning(raw),
    };
    if seconds == 0 {
        return default_with_warning(raw);
    }
    Duration::from_secs(seconds)
}

fn default_with_warning(raw: &str) -> Duration {
    warn!(raw, "unparseable schedule string, defaulting to 1h");
    DEFAULT_SCHEDULE
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required field `{0}` for platform {1}")]
    MissingField(&'static str, &'static str),
}

fn require(blob: &serde_json::Value, key: &'static str, platform: &'static str) -> Result<(), ConfigError> {
    if blob.get(key).and_then(|v| v.as_str()).is_some_and(|s| !s.is_empty()) {
        Ok(())
    } else {
        Err(ConfigError::MissingField(key, platform))
    }
}

/// Validates a connector's `configBlob` carries the fields its platform
/// driver requires, per the recognized-keys table in spec §6. This runs at
/// connector create/update time, ahead of driver construction — the driver
/// itself re-checks the same fields since it may be built from a blob that
/// was written before this validation existed.
pub fn validate_config_blob(platform: Platform, blob: &serde_json::Value) -> Result<(), ConfigError> {
    match platform {
        Platform::Aws => require(blob, "region", "aws"),
        Platform::Azure => {
            require(blob, "subscription_id", "azure")?;
            require(blob, "tenant_id", "azure")?;
            require(blob, "client_id", "azure")?;
            require(blob, "client_secret", "azure")
        }
        Platform::Gcp => require(blob, "project_id", "gcp"),
        Platform::VSphere => {
            require(blob, "host", "vsphere")?;
            require(blob, "username", "vsphere")?;
            require(blob, "password", "vsphere")
        }
        Platform::K8s => Ok(()), // every field is optional per spec §6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_units() {
        assert_eq!(parse_schedule("15m"), Duration::from_secs(900));
        assert_eq!(parse_schedule("1h"), Duration::from_secs(3600));
        assert_eq!(parse_schedule("6h"), Duration::from_secs(21600));
        assert_eq!(parse_schedule("24h"), Duration::from_secs(86400));
    }

    #[test]
    fn unparseable_degrades_to_default_not_error() {
        assert_eq!(parse_schedule(""), DEFAULT_SCHEDULE);
        assert_eq!(parse_schedule("garbage"), DEFAULT_SCHEDULE);
        assert_eq!(parse_schedule("5x"), DEFAULT_SCHEDULE);
        assert_eq!(parse_schedule("0h"), DEFAULT_SCHEDULE);
        assert_eq!(parse_schedule("h"), DEFAULT_SCHEDULE);
    }

    #[test]
    fn aws_requires_region() {
        assert!(validate_config_blob(Platform::Aws, &serde_json::json!({})).is_err());
        assert!(validate_config_blob(Platform::Aws, &serde_json::json!({"region": "us-east-1"})).is_ok());
    }

    #[test]
    fn k8s_has_no_required_fields() {
        assert!(validate_config_blob(Platform::K8s, &serde_json::json!({})).is_ok());
    }

    #[test]
    fn azure_requires_all_four_fields() {
        let partial = serde_json::json!({"subscription_id": "s", "tenant_id": "t"});
        assert!(validate_config_blob(Platform::Azure, &partial).is_err());
        let full = serde_json::json!({
            "subscription_id": "s", "tenant_id": "t", "client_id": "c", "client_secret": "x"
        });
        assert!(validate_config_blob(Platform::Azure, &full).is_ok());
    }
}
