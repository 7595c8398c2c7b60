//! Scheduler error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("persistence error: {0}")]
    Persist(#[from] fleet_persist::PersistError),

    #[error("driver error: {0}")]
    Driver(#[from] fleet_connectors::DriverError),

    #[error("connector {0} not found")]
    ConnectorNotFound(uuid::Uuid),

    #[error("connector {0} already has a sync in flight")]
    AlreadyActive(uuid::Uuid),

    /// A worker's per-job deadline elapsed before `Connect`/`DiscoverAssets`
    /// completed. Propagated as a non-retriable cancellation.
    #[error("sync exceeded its deadline")]
    DeadlineExceeded,
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
