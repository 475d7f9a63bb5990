//! Schema bootstrap.

use anyhow::Context;
use sqlx::PgPool;

const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_sqlgate_schema.sql",
    include_str!("../migrations/0001_sqlgate_schema.sql"),
)];

/// Apply the bundled migrations in order. Each file is idempotent, so
/// re-running against an initialized database is harmless.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    for (name, sql) in MIGRATIONS {
        sqlx::raw_sql(sql)
            .execute(pool)
            .await
            .with_context(|| format!("migration {name} failed"))?;
        tracing::info!(migration = *name, "migration applied");
    }
    Ok(())
}
