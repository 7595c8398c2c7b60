//! Append-only, hash-chained audit sink.
//!
//! Every mutating operation in the fleet core calls [`AuditSink::append`]
//! before (for destructive operations) or immediately after the operation it
//! records. The chain is per-organization: each entry's `integrity_hash`
//! covers its own fields plus the previous entry's hash, so rewriting any
//! entry breaks every hash after it. [`AuditSink::verify_range`] recomputes
//! the whole chain and reports every break it finds, not just the first.

#![forbid(unsafe_code)]

mod hash;
mod queue;

use chrono::{DateTime, Utc};
use fleet_persist::PgPool;
use fleet_proto::{AuditEntry, AuditEntryId, OrgId};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub use hash::NewAuditEntry;
pub use queue::BestEffortQueue;
use hash::compute_integrity_hash;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("persistence error: {0}")]
    Persist(#[from] fleet_persist::PersistError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type AuditResult<T> = Result<T, AuditError>;

pub struct AuditSink {
    pool: PgPool,
    best_effort: Arc<BestEffortQueue>,
}

impl AuditSink {
    pub fn new(pool: PgPool) -> Self {
        let best_effort = BestEffortQueue::spawn(pool.clone());
        Self { pool, best_effort }
    }

    /// Appends an entry, computing its hash chain atomically with the lookup
    /// of the org's latest hash (row-locked) so no two
    /// concurrent appends in the same org can share a `previous_hash`.
    pub async fn append(&self, entry: NewAuditEntry) -> AuditResult<AuditEntry> {
        let mut tx = self.pool.begin().await?;
        let previous_hash = fleet_persist::audit::lock_latest_hash(&mut tx, entry.org_id).await?;

        let id = Uuid::new_v4();
        let timestamp = Utc::now();
        let integrity_hash = compute_integrity_hash(id, timestamp, &entry, &previous_hash);

        let record = AuditEntry {
            id,
            timestamp,
            org_id: entry.org_id,
            actor: entry.actor,
            action: entry.action,
            category: entry.category,
            resource: entry.resource,
            changes: entry.changes,
            context: entry.context,
            risk_level: entry.risk_level,
            status: entry.status,
            integrity_hash,
            previous_hash,
        };

        fleet_persist::audit::insert_entry(&mut tx, &record).await?;
        tx.commit().await?;

        info!(entry_id = %record.id, action = %record.action, "audit entry appended");
        Ok(record)
    }

    /// Non-blocking variant for hot paths: schedules the append on a
    /// background worker with a bounded queue. On overflow the oldest pending
    /// entry is discarded under a named discard-oldest policy, and a
    /// counter is incremented.
    pub fn append_best_effort(&self, entry: NewAuditEntry) {
        self.best_effort.push(entry);
    }

    /// Count of entries dropped by `append_best_effort` due to queue overflow.
    pub fn dropped_count(&self) -> u64 {
        self.best_effort.dropped_count()
    }

    /// Walks entries for `org_id` with `timestamp` in `[start, end]` ascending,
    /// recomputes each hash, and returns every violation found — a single
    /// mismatch does not abort the walk.
    pub async fn verify_range(&self, org_id: OrgId, start: DateTime<Utc>, end: DateTime<Utc>) -> AuditResult<VerifyReport> {
        let entries = fleet_persist::audit::fetch_range(&self.pool, org_id, start, end).await?;

        let mut violations = Vec::new();
        let mut expected_previous = String::new();
        for entry in &entries {
            if entry.previous_hash != expected_previous {
                violations.push(Violation {
                    entry_id: entry.id,
                    expected_previous_hash: expected_previous.clone(),
                    stored_previous_hash: entry.previous_hash.clone(),
                });
            }

            let recomputed = compute_integrity_hash(
                entry.id,
                entry.timestamp,
                &NewAuditEntry {
                    org_id: entry.org_id,
                    actor: entry.actor.clone(),
                    action: entry.action.clone(),
                    category: entry.category.clone(),
                    resource: entry.resource.clone(),
                    changes: entry.changes.clone(),
                    context: entry.context.clone(),
                    risk_level: entry.risk_level.clone(),
                    status: entry.status,
                },
                &entry.previous_hash,
            );
            if recomputed != entry.integrity_hash {
                warn!(entry_id = %entry.id, "audit chain integrity violation");
                violations.push(Violation {
                    entry_id: entry.id,
                    expected_previous_hash: recomputed,
                    stored_previous_hash: entry.integrity_hash.clone(),
                });
            }

            // The chain continues from the entry's own stored hash regardless
            // of whether it matched, so a single tampered link doesn't cascade
            // false positives onto every entry after it.
            expected_previous = entry.integrity_hash.clone();
        }

        Ok(VerifyReport {
            valid: violations.is_empty(),
            entries_checked: entries.len(),
            violations,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Violation {
    pub entry_id: AuditEntryId,
    pub expected_previous_hash: String,
    pub stored_previous_hash: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifyReport {
    pub valid: bool,
    pub entries_checked: usize,
    pub violations: Vec<Violation>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_proto::{Actor, AuditStatus, Resource};

    #[test]
    fn integrity_hash_changes_with_previous_hash() {
        let entry = NewAuditEntry {
            org_id: Uuid::new_v4(),
            actor: Actor { actor_type: "system".into(), id: "scheduler".into(), email: None, ip: None },
            action: "connector.sync.completed".into(),
            category: "sync".into(),
            resource: Resource { resource_type: "connector".into(), id: None, name: None },
            changes: None,
            context: None,
            risk_level: "low".into(),
            status: AuditStatus::Success,
        };
        let id = Uuid::new_v4();
        let ts = Utc::now();
        let h1 = compute_integrity_hash(id, ts, &entry, "");
        let h2 = compute_integrity_hash(id, ts, &entry, "abc123");
        assert_ne!(h1, h2);
        assert_eq!(h1.len(), 64);
    }
}
