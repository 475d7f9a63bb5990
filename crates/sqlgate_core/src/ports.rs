//! Storage and execution port traits.
//! Implemented by sqlgate_postgres; core logic depends only on these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::AuditRecord;
use crate::classify::{ClassifiedStatement, StatementKind};
use crate::error::GateError;
use crate::principal::{NewPrincipal, Principal, PrincipalCredentials};
use crate::value::QueryResult;

pub type Result<T> = std::result::Result<T, GateError>;

// ── Principals ────────────────────────────────────────────────

#[async_trait]
pub trait PrincipalStore: Send + Sync {
    /// Look up by normalized email. `None` when no such principal exists.
    async fn find_credentials(&self, email: &str) -> Result<Option<PrincipalCredentials>>;

    /// Persist a new principal with an already-hashed password.
    /// A duplicate email is `GateError::Conflict`.
    async fn insert_principal(
        &self,
        principal: &NewPrincipal,
        password_hash: &str,
    ) -> Result<Principal>;
}

// ── Sessions ──────────────────────────────────────────────────

/// Persisted half of a session. The secret itself is never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub selector: String,
    pub validator_hash: String,
    pub principal_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// A selector already in use is `GateError::Conflict`.
    async fn insert_session(&self, record: &SessionRecord) -> Result<()>;

    /// Session row plus its owning principal, fetched in one lookup.
    async fn find_session(&self, selector: &str) -> Result<Option<(SessionRecord, Principal)>>;

    /// Returns whether a row was removed.
    async fn delete_session(&self, selector: &str) -> Result<bool>;

    /// Remove every session of one principal. Returns the count removed.
    async fn delete_sessions_for(&self, principal_id: Uuid) -> Result<u64>;

    /// Remove sessions with `expires_at <= now`. Returns the count removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

// ── Audit ─────────────────────────────────────────────────────

/// Append-only audit sink. There is no update or delete.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<()>;
}

// ── Execution ─────────────────────────────────────────────────

/// Runs one classified statement under the principal's database role.
///
/// Implementations must check `statement.expect_kind(kind)` before touching
/// a connection, and must leave no trace of the role switch on the
/// connection afterwards, whether the statement succeeded or not.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    async fn run(
        &self,
        principal: &Principal,
        statement: &ClassifiedStatement,
        kind: StatementKind,
    ) -> Result<QueryResult>;
}
