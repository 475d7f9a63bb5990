//! Audit trail.
//!
//! Every accepted request writes a `Received` record before anything about
//! its content is judged, then exactly one terminal record. The terminal
//! write is owned by an [`AuditIntent`] guard so it happens even when the
//! request task is cancelled or panics part-way through.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::GateError;
use crate::ports::AuditStore;
use crate::principal::Principal;

// ── Status ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Received,
    Success,
    FailedPolicy,
    FailedValidation,
    FailedAuthorization,
    /// The intended terminal record could not be written.
    FailedAudit,
    /// Execution errored for a reason other than authorization, or the
    /// request was abandoned before reaching a terminal state.
    FailedExecution,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Success => "success",
            Self::FailedPolicy => "failed_policy",
            Self::FailedValidation => "failed_validation",
            Self::FailedAuthorization => "failed_authorization",
            Self::FailedAudit => "failed_audit",
            Self::FailedExecution => "failed_execution",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "received" => Some(Self::Received),
            "success" => Some(Self::Success),
            "failed_policy" => Some(Self::FailedPolicy),
            "failed_validation" => Some(Self::FailedValidation),
            "failed_authorization" => Some(Self::FailedAuthorization),
            "failed_audit" => Some(Self::FailedAudit),
            "failed_execution" => Some(Self::FailedExecution),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Received)
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Record ────────────────────────────────────────────────────

/// One append-only audit row. `attempt_id` pairs the `Received` row with
/// the terminal row of the same request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub attempt_id: Uuid,
    pub principal_id: Uuid,
    pub database_role: String,
    pub status: AuditStatus,
    pub sql_text: String,
    pub recorded_at: DateTime<Utc>,
}

/// The parts of a record that stay fixed for the whole attempt.
#[derive(Debug, Clone)]
struct Attempt {
    attempt_id: Uuid,
    principal_id: Uuid,
    database_role: String,
    sql_text: String,
}

// ── Recorder ──────────────────────────────────────────────────

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Single standalone write. Failure comes back as `AuditWriteFailed` and
    /// is logged at error level.
    pub async fn record(
        &self,
        principal: &Principal,
        status: AuditStatus,
        sql_text: &str,
    ) -> Result<(), GateError> {
        let attempt = Attempt::new(principal, sql_text);
        self.append(&attempt, status).await
    }

    /// Write `Received` and hand back the guard that owns the terminal write.
    /// A failed `Received` write is logged; the request still proceeds.
    ///
    /// The guard exists before the first await, so cancelling the caller
    /// while `Received` is in flight still yields a terminal record.
    pub async fn open(&self, principal: &Principal, sql_text: &str) -> AuditIntent {
        let intent = AuditIntent {
            recorder: self.clone(),
            attempt: Attempt::new(principal, sql_text),
            finished: false,
        };
        let _ = self.append(&intent.attempt, AuditStatus::Received).await;
        intent
    }

    async fn append(&self, attempt: &Attempt, status: AuditStatus) -> Result<(), GateError> {
        let record = AuditRecord {
            attempt_id: attempt.attempt_id,
            principal_id: attempt.principal_id,
            database_role: attempt.database_role.clone(),
            status,
            sql_text: attempt.sql_text.clone(),
            recorded_at: self.clock.now(),
        };
        self.store.append(&record).await.map_err(|e| {
            tracing::error!(
                attempt_id = %attempt.attempt_id,
                principal_id = %attempt.principal_id,
                status = status.as_str(),
                "audit write failed: {e}"
            );
            GateError::AuditWriteFailed(e.to_string())
        })
    }

    /// Terminal write with a single `FailedAudit` fallback.
    async fn write_terminal(&self, attempt: &Attempt, status: AuditStatus) {
        if self.append(attempt, status).await.is_ok() {
            return;
        }
        tracing::error!(
            attempt_id = %attempt.attempt_id,
            lost_status = status.as_str(),
            "terminal audit record lost"
        );
        if status != AuditStatus::FailedAudit {
            let _ = self.append(attempt, AuditStatus::FailedAudit).await;
        }
    }
}

impl Attempt {
    fn new(principal: &Principal, sql_text: &str) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            principal_id: principal.id,
            database_role: principal.database_role.clone(),
            sql_text: sql_text.to_string(),
        }
    }
}

// ── Scope guard ───────────────────────────────────────────────

/// Owes exactly one terminal audit record.
///
/// [`AuditIntent::finish`] pays it with the given status. Dropping the guard
/// unpaid (cancellation, panic, early return) pays it with
/// `FailedExecution` on a detached task.
#[must_use = "an unfinished AuditIntent records FailedExecution when dropped"]
pub struct AuditIntent {
    recorder: AuditRecorder,
    attempt: Attempt,
    finished: bool,
}

impl AuditIntent {
    pub fn attempt_id(&self) -> Uuid {
        self.attempt.attempt_id
    }

    /// The write runs on its own task, so cancelling the caller after this
    /// point cannot lose or duplicate the record.
    pub async fn finish(mut self, status: AuditStatus) {
        debug_assert!(status.is_terminal());
        self.finished = true;
        let recorder = self.recorder.clone();
        let attempt = self.attempt.clone();
        let handle =
            tokio::spawn(async move { recorder.write_terminal(&attempt, status).await });
        if let Err(e) = handle.await {
            tracing::error!(attempt_id = %self.attempt.attempt_id, "audit task failed: {e}");
        }
    }
}

impl Drop for AuditIntent {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let recorder = self.recorder.clone();
        let attempt = self.attempt.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!(
                    attempt_id = %attempt.attempt_id,
                    "request abandoned before a terminal audit status"
                );
                runtime.spawn(async move {
                    recorder
                        .write_terminal(&attempt, AuditStatus::FailedExecution)
                        .await
                });
            }
            Err(_) => tracing::error!(
                attempt_id = %attempt.attempt_id,
                lost_status = AuditStatus::FailedExecution.as_str(),
                "audit intent dropped outside a runtime"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryAuditStore;
    use std::time::Duration;

    fn principal() -> Principal {
        Principal {
            id: Uuid::new_v4(),
            display_name: "Ada".into(),
            email: "ada@example.com".into(),
            database_role: "analyst".into(),
        }
    }

    async fn wait_for(store: &InMemoryAuditStore, count: usize) -> Vec<AuditRecord> {
        for _ in 0..100 {
            let records = store.records().await;
            if records.len() >= count {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        store.records().await
    }

    #[test]
    fn status_strings_parse_back() {
        for status in [
            AuditStatus::Received,
            AuditStatus::Success,
            AuditStatus::FailedPolicy,
            AuditStatus::FailedValidation,
            AuditStatus::FailedAuthorization,
            AuditStatus::FailedAudit,
            AuditStatus::FailedExecution,
        ] {
            assert_eq!(AuditStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AuditStatus::parse("pending"), None);
        assert!(!AuditStatus::Received.is_terminal());
        assert!(AuditStatus::FailedPolicy.is_terminal());
    }

    #[tokio::test]
    async fn open_then_finish_writes_two_paired_records() {
        let store = Arc::new(InMemoryAuditStore::new());
        let recorder = AuditRecorder::new(store.clone());
        let p = principal();

        let intent = recorder.open(&p, "SELECT id FROM orders").await;
        let attempt_id = intent.attempt_id();
        intent.finish(AuditStatus::Success).await;

        let records = store.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, AuditStatus::Received);
        assert_eq!(records[1].status, AuditStatus::Success);
        assert!(records.iter().all(|r| r.attempt_id == attempt_id));
        assert!(records.iter().all(|r| r.principal_id == p.id));
        assert!(records.iter().all(|r| r.database_role == "analyst"));
        assert!(records.iter().all(|r| r.sql_text == "SELECT id FROM orders"));
    }

    #[tokio::test]
    async fn dropped_intent_records_failed_execution() {
        let store = Arc::new(InMemoryAuditStore::new());
        let recorder = AuditRecorder::new(store.clone());

        let intent = recorder.open(&principal(), "SELECT 1").await;
        drop(intent);

        let records = wait_for(&store, 2).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].status, AuditStatus::FailedExecution);
    }

    #[tokio::test]
    async fn cancelled_request_still_gets_a_terminal_record() {
        let store = Arc::new(InMemoryAuditStore::new());
        let recorder = AuditRecorder::new(store.clone());
        let p = principal();

        let request = async {
            let _intent = recorder.open(&p, "SELECT 1").await;
            std::future::pending::<()>().await;
        };
        let _ = tokio::time::timeout(Duration::from_millis(10), request).await;

        let records = wait_for(&store, 2).await;
        let statuses: Vec<_> = records.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![AuditStatus::Received, AuditStatus::FailedExecution]
        );
    }

    /// Holds every `Received` write open forever.
    struct StalledReceived(InMemoryAuditStore);

    #[async_trait::async_trait]
    impl AuditStore for StalledReceived {
        async fn append(&self, record: &AuditRecord) -> crate::ports::Result<()> {
            if record.status == AuditStatus::Received {
                std::future::pending::<()>().await;
            }
            self.0.append(record).await
        }
    }

    #[tokio::test]
    async fn cancelled_during_received_write_still_gets_a_terminal_record() {
        let store = Arc::new(StalledReceived(InMemoryAuditStore::new()));
        let recorder = AuditRecorder::new(store.clone());
        let p = principal();

        let opened = tokio::time::timeout(
            Duration::from_millis(10),
            recorder.open(&p, "SELECT 1"),
        )
        .await;
        assert!(opened.is_err());

        let records = wait_for(&store.0, 1).await;
        let statuses: Vec<_> = records.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![AuditStatus::FailedExecution]);
        assert_eq!(records[0].principal_id, p.id);
    }

    #[tokio::test]
    async fn lost_terminal_write_falls_back_to_failed_audit() {
        let store = Arc::new(InMemoryAuditStore::new());
        store.reject_status(AuditStatus::Success).await;
        let recorder = AuditRecorder::new(store.clone());

        let intent = recorder.open(&principal(), "SELECT 1").await;
        intent.finish(AuditStatus::Success).await;

        let statuses: Vec<_> = store.records().await.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![AuditStatus::Received, AuditStatus::FailedAudit]);
    }

    #[tokio::test]
    async fn record_surfaces_audit_write_failed() {
        let store = Arc::new(InMemoryAuditStore::new());
        store.fail_all(true);
        let recorder = AuditRecorder::new(store.clone());

        let err = recorder
            .record(&principal(), AuditStatus::Success, "SELECT 1")
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::AuditWriteFailed(_)));
        assert!(store.records().await.is_empty());
    }
}
