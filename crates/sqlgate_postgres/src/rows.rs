//! Row shapes read back from the `sqlgate` schema.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use sqlgate_core::audit::{AuditRecord, AuditStatus};
use sqlgate_core::ports::SessionRecord;
use sqlgate_core::principal::{Principal, PrincipalCredentials};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PrincipalRow {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    pub database_role: String,
    pub password_hash: String,
}

impl From<PrincipalRow> for PrincipalCredentials {
    fn from(row: PrincipalRow) -> Self {
        Self {
            principal: Principal {
                id: row.id,
                display_name: row.display_name,
                email: row.email,
                database_role: row.database_role,
            },
            password_hash: row.password_hash,
        }
    }
}

/// Session joined to its owner.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SessionRow {
    pub selector: String,
    pub validator_hash: String,
    pub principal_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub display_name: String,
    pub email: String,
    pub database_role: String,
}

impl From<SessionRow> for (SessionRecord, Principal) {
    fn from(row: SessionRow) -> Self {
        (
            SessionRecord {
                selector: row.selector,
                validator_hash: row.validator_hash,
                principal_id: row.principal_id,
                expires_at: row.expires_at,
                created_at: row.created_at,
            },
            Principal {
                id: row.principal_id,
                display_name: row.display_name,
                email: row.email,
                database_role: row.database_role,
            },
        )
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AuditRow {
    pub attempt_id: Uuid,
    pub principal_id: Uuid,
    pub database_role: String,
    pub status: String,
    pub sql_text: String,
    pub recorded_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditRecord {
    type Error = String;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let status = AuditStatus::parse(&row.status)
            .ok_or_else(|| format!("unknown audit status {:?}", row.status))?;
        Ok(Self {
            attempt_id: row.attempt_id,
            principal_id: row.principal_id,
            database_role: row.database_role,
            status,
            sql_text: row.sql_text,
            recorded_at: row.recorded_at,
        })
    }
}
