//! Principals and sessions in `sqlgate.principals` / `sqlgate.sessions`.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use sqlgate_core::ports::{PrincipalStore, Result, SessionRecord, SessionRepository};
use sqlgate_core::principal::{NewPrincipal, Principal, PrincipalCredentials};

use crate::rows::{PrincipalRow, SessionRow};
use crate::storage_error;

pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ── PrincipalStore ────────────────────────────────────────────

#[async_trait]
impl PrincipalStore for PgAuthStore {
    async fn find_credentials(&self, email: &str) -> Result<Option<PrincipalCredentials>> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            r#"
            SELECT id, display_name, email, database_role, password_hash
            FROM sqlgate.principals
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(row.map(Into::into))
    }

    async fn insert_principal(
        &self,
        principal: &NewPrincipal,
        password_hash: &str,
    ) -> Result<Principal> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO sqlgate.principals (id, display_name, email, password_hash, database_role)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(&principal.display_name)
        .bind(&principal.email)
        .bind(password_hash)
        .bind(&principal.database_role)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error(e, "email already registered"))?;

        Ok(Principal {
            id,
            display_name: principal.display_name.clone(),
            email: principal.email.clone(),
            database_role: principal.database_role.clone(),
        })
    }
}

// ── SessionRepository ─────────────────────────────────────────

#[async_trait]
impl SessionRepository for PgAuthStore {
    async fn insert_session(&self, record: &SessionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sqlgate.sessions (selector, validator_hash, principal_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.selector)
        .bind(&record.validator_hash)
        .bind(record.principal_id)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error(e, "selector already in use"))?;
        Ok(())
    }

    async fn find_session(&self, selector: &str) -> Result<Option<(SessionRecord, Principal)>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT s.selector, s.validator_hash, s.principal_id, s.expires_at, s.created_at,
                   p.display_name, p.email, p.database_role
            FROM sqlgate.sessions s
            JOIN sqlgate.principals p ON p.id = s.principal_id
            WHERE s.selector = $1
            "#,
        )
        .bind(selector)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(row.map(Into::into))
    }

    async fn delete_session(&self, selector: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sqlgate.sessions WHERE selector = $1")
            .bind(selector)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_sessions_for(&self, principal_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sqlgate.sessions WHERE principal_id = $1")
            .bind(principal_id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sqlgate.sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(result.rows_affected())
    }
}
