//! Connection pool setup.

use anyhow::{bail, Context};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Returns a session to the login role's defaults. `RESET ALL` leaves the
/// role and session authorization alone, so both are reset explicitly.
pub(crate) const SESSION_RESET: &str = "RESET ROLE; RESET SESSION AUTHORIZATION; RESET ALL";

/// Pool options with the session-reset release hook installed. Every
/// connection returned to the pool is reset; one that refuses is closed
/// instead of reused.
pub fn pool_options(max_connections: u32) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .after_release(|conn, _meta| {
            Box::pin(async move {
                match sqlx::Executor::execute(conn, sqlx::raw_sql(SESSION_RESET)).await {
                    Ok(_) => Ok(true),
                    Err(e) => {
                        tracing::warn!("discarding connection, session reset failed: {e}");
                        Ok(false)
                    }
                }
            })
        })
}

pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    pool_options(max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to database")
}

/// Whether the pool's login role is a superuser.
pub async fn login_is_superuser(pool: &PgPool) -> anyhow::Result<bool> {
    let superuser: bool =
        sqlx::query_scalar("SELECT rolsuper FROM pg_roles WHERE rolname = session_user")
            .fetch_one(pool)
            .await
            .context("failed to read login role attributes")?;
    Ok(superuser)
}

/// Refuse to serve statements over a superuser login. A superuser session can
/// switch its own authorization from inside a statement, which no role
/// switch can contain.
pub async fn ensure_unprivileged_login(pool: &PgPool) -> anyhow::Result<()> {
    if login_is_superuser(pool).await? {
        bail!("database login role is a superuser; connect as a non-superuser role");
    }
    Ok(())
}
