//! Shared exponential backoff for transient remote errors: initial 1s,
//! factor 2, cap 60s, max 5 attempts. One implementation used by
//! every driver rather than inlined per-platform.

use crate::error::{DriverError, DriverResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const BACKOFF_FACTOR: u32 = 2;
const MAX_DELAY: Duration = Duration::from_secs(60);
const MAX_ATTEMPTS: u32 = 5;

pub async fn with_retry<F, Fut, T>(op_name: &str, mut f: F) -> DriverResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DriverResult<T>>,
{
    let mut delay = INITIAL_DELAY;
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                warn!(op = op_name, attempt, delay_secs = delay.as_secs(), error = %e, "retrying after transient error");
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * BACKOFF_FACTOR, MAX_DELAY);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Non-retriable wrapper used to mark an error class for [`with_retry`] that
/// should still propagate with context.
pub fn transient(msg: impl Into<String>) -> DriverError {
    DriverError::Transient(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let attempts = AtomicU32::new(0);
        let result = with_retry("test", || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(transient("not yet"))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: DriverResult<()> = with_retry("test", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(transient("always fails"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient() {
        let attempts = AtomicU32::new(0);
        let result: DriverResult<()> = with_retry("test", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(DriverError::Auth("bad creds".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
