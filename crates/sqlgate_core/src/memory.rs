//! In-memory adapters for the port traits.
//!
//! Used by unit tests here and by the server's router tests, which run the
//! full HTTP stack without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditStatus};
use crate::classify::{ClassifiedStatement, StatementKind};
use crate::clock::Clock;
use crate::error::GateError;
use crate::ports::{
    AuditStore, PrincipalStore, Result, SessionRecord, SessionRepository, StatementExecutor,
};
use crate::principal::{NewPrincipal, Principal, PrincipalCredentials};
use crate::value::QueryResult;

// ── Principals and sessions ───────────────────────────────────

#[derive(Default)]
pub struct InMemoryAuthStore {
    principals: RwLock<HashMap<Uuid, PrincipalCredentials>>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl PrincipalStore for InMemoryAuthStore {
    async fn find_credentials(&self, email: &str) -> Result<Option<PrincipalCredentials>> {
        let principals = self.principals.read().await;
        Ok(principals
            .values()
            .find(|c| c.principal.email == email)
            .cloned())
    }

    async fn insert_principal(
        &self,
        principal: &NewPrincipal,
        password_hash: &str,
    ) -> Result<Principal> {
        let mut principals = self.principals.write().await;
        if principals
            .values()
            .any(|c| c.principal.email == principal.email)
        {
            return Err(GateError::Conflict(format!(
                "email {} already registered",
                principal.email
            )));
        }
        let stored = Principal {
            id: Uuid::new_v4(),
            display_name: principal.display_name.clone(),
            email: principal.email.clone(),
            database_role: principal.database_role.clone(),
        };
        principals.insert(
            stored.id,
            PrincipalCredentials {
                principal: stored.clone(),
                password_hash: password_hash.to_string(),
            },
        );
        Ok(stored)
    }
}

#[async_trait]
impl SessionRepository for InMemoryAuthStore {
    async fn insert_session(&self, record: &SessionRecord) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&record.selector) {
            return Err(GateError::Conflict("selector already in use".into()));
        }
        sessions.insert(record.selector.clone(), record.clone());
        Ok(())
    }

    async fn find_session(&self, selector: &str) -> Result<Option<(SessionRecord, Principal)>> {
        let Some(record) = self.sessions.read().await.get(selector).cloned() else {
            return Ok(None);
        };
        let principals = self.principals.read().await;
        Ok(principals
            .get(&record.principal_id)
            .map(|c| (record, c.principal.clone())))
    }

    async fn delete_session(&self, selector: &str) -> Result<bool> {
        Ok(self.sessions.write().await.remove(selector).is_some())
    }

    async fn delete_sessions_for(&self, principal_id: Uuid) -> Result<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.principal_id != principal_id);
        Ok((before - sessions.len()) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        Ok((before - sessions.len()) as u64)
    }
}

// ── Audit ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
    rejected: RwLock<Option<AuditStatus>>,
    fail_all: AtomicBool,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }

    /// Make every append of `status` fail.
    pub async fn reject_status(&self, status: AuditStatus) {
        *self.rejected.write().await = Some(status);
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst)
            || *self.rejected.read().await == Some(record.status)
        {
            return Err(GateError::Internal(anyhow::anyhow!("audit store unavailable")));
        }
        self.records.write().await.push(record.clone());
        Ok(())
    }
}

// ── Clock ─────────────────────────────────────────────────────

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Executor ──────────────────────────────────────────────────

/// Executor double: counts invocations and replays a canned outcome.
/// Enforces the statement kind the same way the Postgres executor does.
pub struct RecordingExecutor {
    calls: AtomicUsize,
    outcome: std::result::Result<QueryResult, String>,
    role_denied: bool,
}

impl RecordingExecutor {
    pub fn returning(result: QueryResult) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: Ok(result),
            role_denied: false,
        }
    }

    /// Every run fails with `ExecutionFailed(message)`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: Err(message.into()),
            role_denied: false,
        }
    }

    /// Simulate a role the database refuses to switch to.
    pub fn deny_role(mut self) -> Self {
        self.role_denied = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatementExecutor for RecordingExecutor {
    async fn run(
        &self,
        principal: &Principal,
        statement: &ClassifiedStatement,
        kind: StatementKind,
    ) -> Result<QueryResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        statement.expect_kind(kind)?;
        if self.role_denied {
            return Err(GateError::UnknownOrDeniedRole(principal.database_role.clone()));
        }
        self.outcome.clone().map_err(GateError::ExecutionFailed)
    }
}
