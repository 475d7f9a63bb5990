//! sqlgate_core: the authenticated, policy-gated SQL execution pipeline.
//!
//! Pure domain logic: bearer-token protocol, session service, statement
//! classification, policy evaluation, the audit scope guard and the
//! [`gateway::QueryGateway`] that ties them together. Storage and execution
//! are reached only through the port traits in [`ports`]; the Postgres
//! adapters live in `sqlgate_postgres`, in-memory ones in [`memory`].

pub mod audit;
pub mod classify;
pub mod clock;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod password;
pub mod policy;
pub mod ports;
pub mod principal;
pub mod session;
pub mod token;
pub mod value;

pub use audit::{AuditIntent, AuditRecord, AuditRecorder, AuditStatus};
pub use classify::{classify, ClassifiedStatement, StatementKind, StatementMetadata};
pub use error::GateError;
pub use gateway::QueryGateway;
pub use policy::{PolicyDecision, PolicyEvaluator, RegoPolicy};
pub use principal::{NewPrincipal, Principal};
pub use session::{IssuedSession, SessionService};
pub use token::BearerToken;
pub use value::{Cell, QueryResult, Row, Value};
