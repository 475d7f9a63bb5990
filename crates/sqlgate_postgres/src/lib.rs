//! sqlgate_postgres: PostgreSQL adapters for the sqlgate_core ports.
//!
//! All SQL is runtime-checked (`sqlx::query`, not `sqlx::query!`) so building
//! never needs a live database.

pub mod audit_store;
pub mod auth_store;
pub mod executor;
pub mod migrate;
pub mod pool;
mod rows;

use std::time::Duration;

use sqlx::PgPool;

pub use audit_store::PgAuditStore;
pub use auth_store::PgAuthStore;
pub use executor::PgScopedExecutor;
pub use migrate::run_migrations;
pub use pool::{connect, ensure_unprivileged_login};

/// Every Postgres adapter, built over one shared pool.
pub struct PgStores {
    pub auth: PgAuthStore,
    pub audit: PgAuditStore,
    pub executor: PgScopedExecutor,
}

impl PgStores {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            auth: PgAuthStore::new(pool.clone()),
            audit: PgAuditStore::new(pool.clone()),
            executor: PgScopedExecutor::new(pool, statement_timeout),
        }
    }
}

/// Map a sqlx error to the core taxonomy, turning unique violations into
/// `Conflict`.
pub(crate) fn storage_error(e: sqlx::Error, conflict: &str) -> sqlgate_core::GateError {
    let unique = e
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());
    if unique {
        sqlgate_core::GateError::Conflict(conflict.to_string())
    } else {
        sqlgate_core::GateError::Internal(anyhow::anyhow!(e))
    }
}
