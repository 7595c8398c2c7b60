//! Sync Scheduler: a poll loop that claims due connectors with
//! database-level locking and runs each through a bounded pool of worker
//! tasks. One process, one poller, up to `maxConcurrent` in-flight syncs.

#![forbid(unsafe_code)]

mod error;
mod worker;

pub use error::{SchedulerError, SchedulerResult};
pub use worker::DEFAULT_SYNC_TIMEOUT;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use fleet_observe::FleetMetrics;
use fleet_persist::PgPool;
use fleet_proto::{ConnectorId, TriggerType};
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The number of due connectors claimed per poll tick.
const CLAIM_BATCH_SIZE: i64 = 10;

pub struct Scheduler {
    pool: PgPool,
    metrics: Arc<FleetMetrics>,
    poll_interval: Duration,
    sync_timeout: Duration,
    semaphore: Arc<Semaphore>,
    active: Arc<Mutex<HashSet<ConnectorId>>>,
    shutdown: Arc<Notify>,
    stopped: Arc<std::sync::atomic::AtomicBool>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(pool: PgPool, metrics: Arc<FleetMetrics>, poll_interval: Duration, max_concurrent: usize) -> Self {
        Self {
            pool,
            metrics,
            poll_interval,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            active: Arc::new(Mutex::new(HashSet::new())),
            shutdown: Arc::new(Notify::new()),
            stopped: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Runs the poll loop until [`Scheduler::stop`] is called. Ticks
    /// immediately on startup, then every `poll_interval`.
    pub async fn run(&self) {
        loop {
            if self.stopped.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "poll tick failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.shutdown.notified() => break,
            }
        }
        info!("scheduler poll loop exited");
    }

    async fn poll_once(&self) -> SchedulerResult<()> {
        let claimed = fleet_persist::connectors::claim_due_connectors(&self.pool, CLAIM_BATCH_SIZE).await?;
        for connector in claimed {
            self.dispatch(connector, TriggerType::Scheduled);
        }
        Ok(())
    }

    /// Marks `connector` active and spawns its worker, bounded by the
    /// concurrency semaphore. Already-active connectors are skipped — this is
    /// the in-memory guard against double-dispatch within one instance even
    /// if the claim query raced.
    fn dispatch(&self, connector: fleet_proto::Connector, trigger: TriggerType) {
        {
            let mut active = self.active.lock();
            if !active.insert(connector.id) {
                return;
            }
        }

        let pool = self.pool.clone();
        let metrics = self.metrics.clone();
        let timeout = self.sync_timeout;
        let semaphore = self.semaphore.clone();
        let active = self.active.clone();
        let connector_id = connector.id;

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire().await;
            if let Err(e) = worker::run_sync(&pool, &connector, trigger, timeout, &metrics).await {
                warn!(connector_id = %connector_id, error = %e, "worker failed to complete sync bookkeeping");
            }
            active.lock().remove(&connector_id);
        });

        self.handles.lock().push(handle);
    }

    /// Manual trigger: loads the connector, refuses if already
    /// active, and launches a worker with `trigger=manual`. Returns once the
    /// worker has been accepted — not when the sync completes.
    pub async fn trigger_sync(&self, connector_id: ConnectorId) -> SchedulerResult<()> {
        if self.active.lock().contains(&connector_id) {
            return Err(SchedulerError::AlreadyActive(connector_id));
        }
        let connector = fleet_persist::connectors::fetch_connector(&self.pool, connector_id)
            .await?
            .ok_or(SchedulerError::ConnectorNotFound(connector_id))?;
        self.dispatch(connector, TriggerType::Manual);
        Ok(())
    }

    /// Cancels the poll loop and waits for every in-flight worker to finish.
    /// Maximum shutdown time is bounded by `sync_timeout`.
    pub async fn stop(&self) {
        self.stopped.store(true, std::sync::atomic::Ordering::SeqCst);
        self.shutdown.notify_waiters();

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
        info!("scheduler stopped, no workers remain running");
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_twice_for_same_connector_only_marks_active_once() {
        let active: Arc<Mutex<HashSet<ConnectorId>>> = Arc::new(Mutex::new(HashSet::new()));
        let id = uuid::Uuid::new_v4();
        assert!(active.lock().insert(id));
        assert!(!active.lock().insert(id), "second insert of the same id must be rejected");
    }

    #[tokio::test]
    async fn trigger_sync_rejects_already_active_connector() {
        let pool = fleet_persist::PgPool::connect_lazy("postgres://localhost/nonexistent").expect("lazy pool");
        let scheduler = Scheduler::new(pool, Arc::new(FleetMetrics::new()), Duration::from_secs(30), 5);
        let id = uuid::Uuid::new_v4();
        scheduler.active.lock().insert(id);
        let err = scheduler.trigger_sync(id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyActive(_)));
    }
}
