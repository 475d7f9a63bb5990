//! Append-only audit log in `sqlgate.audit_log`.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use sqlgate_core::audit::AuditRecord;
use sqlgate_core::error::GateError;
use sqlgate_core::ports::{AuditStore, Result};

use crate::rows::AuditRow;

pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Both rows of one attempt, oldest first.
    pub async fn list_for_attempt(&self, attempt_id: Uuid) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT attempt_id, principal_id, database_role, status, sql_text, recorded_at
            FROM sqlgate.audit_log
            WHERE attempt_id = $1
            ORDER BY audit_id
            "#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        decode(rows)
    }

    /// Most recent records for one principal, newest first.
    pub async fn list_for_principal(
        &self,
        principal_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT attempt_id, principal_id, database_role, status, sql_text, recorded_at
            FROM sqlgate.audit_log
            WHERE principal_id = $1
            ORDER BY audit_id DESC
            LIMIT $2
            "#,
        )
        .bind(principal_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        decode(rows)
    }
}

fn decode(rows: Vec<AuditRow>) -> Result<Vec<AuditRecord>> {
    rows.into_iter()
        .map(|r| {
            r.try_into()
                .map_err(|e: String| GateError::Internal(anyhow!(e)))
        })
        .collect()
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sqlgate.audit_log
                (attempt_id, principal_id, database_role, status, sql_text, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.attempt_id)
        .bind(record.principal_id)
        .bind(&record.database_role)
        .bind(record.status.as_str())
        .bind(&record.sql_text)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }
}
