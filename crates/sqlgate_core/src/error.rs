use thiserror::Error;

use crate::audit::AuditStatus;
use crate::classify::StatementKind;

/// Closed error taxonomy for the whole pipeline.
///
/// The `Display` text may carry internal detail and is for logs only.
/// Clients see [`GateError::code`] and nothing else.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("malformed token")]
    MalformedToken,

    #[error("session invalid")]
    SessionInvalid,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("parse failure: {0}")]
    ParseFailure(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("incorrect statement type: expected {expected}, got {actual}")]
    IncorrectStatementType {
        expected: StatementKind,
        actual: StatementKind,
    },

    #[error("unknown or denied role: {0}")]
    UnknownOrDeniedRole(String),

    /// The database rejected the statement itself for lack of a grant.
    #[error("privilege denied: {0}")]
    PrivilegeDenied(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("audit write failed: {0}")]
    AuditWriteFailed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GateError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::MalformedToken | Self::SessionInvalid | Self::AuthenticationFailed => 401,
            Self::ParseFailure(_) | Self::InvalidInput(_) => 400,
            Self::PolicyDenied(_)
            | Self::IncorrectStatementType { .. }
            | Self::UnknownOrDeniedRole(_)
            | Self::PrivilegeDenied(_) => 403,
            Self::Conflict(_) => 409,
            Self::ExecutionFailed(_) | Self::AuditWriteFailed(_) | Self::Internal(_) => 500,
        }
    }

    /// Stable, detail-free code returned to clients.
    pub fn code(&self) -> &'static str {
        match self {
            // Token shape problems are reported exactly like any other bad session.
            Self::MalformedToken | Self::SessionInvalid => "session_invalid",
            Self::AuthenticationFailed => "authentication_failed",
            Self::ParseFailure(_) => "invalid_statement",
            Self::PolicyDenied(_) => "policy_denied",
            Self::IncorrectStatementType { .. } => "incorrect_statement_type",
            Self::UnknownOrDeniedRole(_) | Self::PrivilegeDenied(_) => "not_authorized",
            Self::InvalidInput(_) => "invalid_input",
            Self::Conflict(_) => "conflict",
            Self::ExecutionFailed(_) => "execution_failed",
            Self::AuditWriteFailed(_) | Self::Internal(_) => "internal_error",
        }
    }

    /// Terminal audit status for a request that ended with this error.
    pub fn audit_status(&self) -> AuditStatus {
        match self {
            Self::ParseFailure(_) | Self::InvalidInput(_) => AuditStatus::FailedValidation,
            Self::PolicyDenied(_) => AuditStatus::FailedPolicy,
            Self::IncorrectStatementType { .. }
            | Self::UnknownOrDeniedRole(_)
            | Self::PrivilegeDenied(_)
            | Self::MalformedToken
            | Self::SessionInvalid
            | Self::AuthenticationFailed => AuditStatus::FailedAuthorization,
            Self::AuditWriteFailed(_) => AuditStatus::FailedAudit,
            Self::ExecutionFailed(_) | Self::Conflict(_) | Self::Internal(_) => {
                AuditStatus::FailedExecution
            }
        }
    }
}
