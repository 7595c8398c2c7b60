//! Persistence error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    /// A compare-and-swap write observed a row already in a terminal state,
    /// or already moved by a concurrent writer.
    #[error("conflicting write: {0}")]
    Conflict(String),
}

pub type PersistResult<T> = Result<T, PersistError>;
