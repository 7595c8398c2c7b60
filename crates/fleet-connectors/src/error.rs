//! Driver error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    /// Invalid credentials, expired token. Not retried; bubbles from `Connect`.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Rate limit, 5xx, connection reset. Retried with capped exponential
    /// backoff before surfacing.
    #[error("transient remote error: {0}")]
    Transient(String),

    /// Missing required configBlob field, unparseable value.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("operation not supported by this driver")]
    NotSupported,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DriverResult<T> = Result<T, DriverError>;

impl DriverError {
    /// `Transient remote` is the only kind the retry helper retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Transient(_))
    }
}
