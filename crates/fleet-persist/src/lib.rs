//! Persistence for the fleet core.
//!
//! Two tiers, matching the ambient stack this workspace carries regardless of
//! feature scope: a Postgres pool for everything that needs row-level locking
//! or transactional semantics (connector claiming, reconciliation, campaign
//! CAS transitions, the audit hash-chain lock), and the file-backed
//! [`JsonStore`] retained for local config and dev-mode fallbacks.

#![forbid(unsafe_code)]

pub mod assets;
pub mod audit;
pub mod campaigns;
pub mod connectors;
pub mod error;
mod json_store;
pub mod pool;
pub mod sync_history;

pub use error::{PersistError, PersistResult};
pub use json_store::JsonStore;
pub use pool::{connect, connect_from_env};
pub use sqlx::PgPool;
