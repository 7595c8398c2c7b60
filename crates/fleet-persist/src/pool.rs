//! Postgres connection pool setup.

use crate::error::{PersistError, PersistResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// Connects to Postgres using `DATABASE_URL`. Fatal at startup if unreachable —
/// callers at the `fleetd` boundary should treat this as an exit-code-worthy
/// misconfiguration, not a retriable error.
pub async fn connect_from_env() -> PersistResult<PgPool> {
    let url = std::env::var(ENV_DATABASE_URL)
        .map_err(|_| PersistError::Config(format!("missing env var {ENV_DATABASE_URL}")))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> PersistResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await?;
    Ok(pool)
}
