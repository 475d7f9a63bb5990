//! Query gateway: the per-request pipeline.
//!
//! ```text
//! Received ─► Classified ─► PolicyChecked ─► Executed ─► Terminal(status)
//!     │            │              │              │
//!     └────────────┴──────────────┴──────────────┴─► Terminal(failure status)
//! ```
//!
//! `Received` is written before the SQL text is looked at. The terminal
//! record is owned by the [`AuditIntent`](crate::audit::AuditIntent) guard.

use std::sync::Arc;

use crate::audit::{AuditRecorder, AuditStatus};
use crate::classify::{classify, StatementKind};
use crate::error::GateError;
use crate::policy::PolicyEvaluator;
use crate::ports::{AuditStore, StatementExecutor};
use crate::principal::Principal;
use crate::value::QueryResult;

const DEFAULT_DENIAL: &str = "denied by policy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Classified,
    PolicyChecked,
    Executed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Classified => "classified",
            Self::PolicyChecked => "policy_checked",
            Self::Executed => "executed",
        }
    }
}

pub struct QueryGateway {
    policy: Arc<dyn PolicyEvaluator>,
    executor: Arc<dyn StatementExecutor>,
    audit: AuditRecorder,
}

impl QueryGateway {
    pub fn new(
        policy: Arc<dyn PolicyEvaluator>,
        executor: Arc<dyn StatementExecutor>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            policy,
            executor,
            audit: AuditRecorder::new(audit),
        }
    }

    pub fn with_recorder(mut self, audit: AuditRecorder) -> Self {
        self.audit = audit;
        self
    }

    /// Run one statement for an authenticated principal. Always leaves a
    /// `Received` record and exactly one terminal record behind.
    pub async fn submit(
        &self,
        principal: &Principal,
        sql: &str,
        kind: StatementKind,
    ) -> Result<QueryResult, GateError> {
        let intent = self.audit.open(principal, sql).await;
        let attempt_id = intent.attempt_id();

        let mut stage = Stage::Received;
        let outcome = self.pipeline(principal, sql, kind, &mut stage).await;

        let status = match &outcome {
            Ok(_) => AuditStatus::Success,
            Err(e) => e.audit_status(),
        };
        match &outcome {
            Ok(result) => tracing::info!(
                %attempt_id,
                principal_id = %principal.id,
                kind = kind.as_str(),
                rows_affected = result.rows_affected,
                "statement executed"
            ),
            Err(e) => tracing::info!(
                %attempt_id,
                principal_id = %principal.id,
                stage = stage.as_str(),
                status = status.as_str(),
                "statement rejected: {e}"
            ),
        }

        intent.finish(status).await;
        outcome
    }

    async fn pipeline(
        &self,
        principal: &Principal,
        sql: &str,
        kind: StatementKind,
        stage: &mut Stage,
    ) -> Result<QueryResult, GateError> {
        let statement = classify(sql)?;
        *stage = Stage::Classified;
        tracing::debug!(
            kind = statement.kind().as_str(),
            tables = ?statement.metadata().tables,
            wildcard = statement.metadata().wildcard,
            "statement classified"
        );

        // An evaluation failure is a denial; nothing runs on an unknown verdict.
        let decision = match self.policy.evaluate(principal, statement.metadata()) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(principal_id = %principal.id, "policy evaluation failed: {e}");
                return Err(GateError::PolicyDenied("policy evaluation failed".into()));
            }
        };
        if !decision.allowed {
            return Err(GateError::PolicyDenied(
                decision.reason.unwrap_or_else(|| DEFAULT_DENIAL.to_string()),
            ));
        }
        *stage = Stage::PolicyChecked;

        let result = self.executor.run(principal, &statement, kind).await?;
        *stage = Stage::Executed;
        Ok(result)
    }
}
