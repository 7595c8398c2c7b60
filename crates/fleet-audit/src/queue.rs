//! Bounded background append queue backing `AppendBestEffort`.
//!
//! A discard-oldest ring buffer behind a `parking_lot::Mutex`, drained by a
//! single background task. Callers never await storage; overflow increments
//! a counter rather than blocking or erroring.

use crate::hash::{compute_integrity_hash, NewAuditEntry};
use chrono::Utc;
use fleet_persist::PgPool;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 1024;

pub struct BestEffortQueue {
    inner: Mutex<VecDeque<NewAuditEntry>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl BestEffortQueue {
    pub fn spawn(pool: PgPool) -> Arc<Self> {
        let queue = Arc::new(Self {
            inner: Mutex::new(VecDeque::with_capacity(DEFAULT_CAPACITY)),
            capacity: DEFAULT_CAPACITY,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        });

        let worker_queue = queue.clone();
        tokio::spawn(async move {
            loop {
                worker_queue.notify.notified().await;
                loop {
                    let next = worker_queue.inner.lock().pop_front();
                    let Some(entry) = next else { break };
                    if let Err(e) = Self::write(&pool, entry).await {
                        warn!(error = %e, "best-effort audit append failed");
                    }
                }
            }
        });

        queue
    }

    pub fn push(&self, entry: NewAuditEntry) {
        let mut guard = self.inner.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(entry);
        drop(guard);
        self.notify.notify_one();
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn write(pool: &PgPool, entry: NewAuditEntry) -> Result<(), fleet_persist::PersistError> {
        let mut tx = pool.begin().await?;
        let previous_hash = fleet_persist::audit::lock_latest_hash(&mut tx, entry.org_id).await?;

        let id = Uuid::new_v4();
        let timestamp = Utc::now();
        let integrity_hash = compute_integrity_hash(id, timestamp, &entry, &previous_hash);

        let record = fleet_proto::AuditEntry {
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
        Ok(())
    }
}
