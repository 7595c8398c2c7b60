//! The shape of a not-yet-persisted entry, and the hash function both the
//! synchronous append path and the best-effort background worker use.

use chrono::{DateTime, Utc};
use fleet_proto::{Actor, AuditEntryId, AuditStatus, OrgId, Resource};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub org_id: OrgId,
    pub actor: Actor,
    pub action: String,
    pub category: String,
    pub resource: Resource,
    pub changes: Option<serde_json::Value>,
    pub context: Option<serde_json::Value>,
    pub risk_level: String,
    pub status: AuditStatus,
}

/// `H(serialize(entry_without_hashes) || previous_hash)`.
pub fn compute_integrity_hash(
    id: AuditEntryId,
    timestamp: DateTime<Utc>,
    entry: &NewAuditEntry,
    previous_hash: &str,
) -> String {
    let canonical = serde_json::json!({
        "id": id,
        "timestamp": timestamp,
        "org_id": entry.org_id,
        "actor": entry.actor,
        "action": entry.action,
        "category": entry.category,
        "resource": entry.resource,
        "changes": entry.changes,
        "context": entry.context,
        "risk_level": entry.risk_level,
        "status": entry.status,
        "previous_hash": previous_hash,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
