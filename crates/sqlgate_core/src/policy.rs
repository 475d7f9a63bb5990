//! Policy gate.
//!
//! The gateway hands a [`PolicyEvaluator`] the principal and the statement
//! metadata and gets back allow/deny plus an optional reason. The production
//! evaluator runs a Rego document with `regorus`; the document is read once
//! at startup and never changes for the life of the process.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::classify::{StatementKind, StatementMetadata};
use crate::principal::Principal;

/// Rule read for the allow/deny decision unless configured otherwise.
pub const DEFAULT_ALLOW_RULE: &str = "data.sql.allow";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy document failed to compile: {0}")]
    Compile(String),

    #[error("policy evaluation failed: {0}")]
    Evaluation(String),

    #[error("rule `{0}` did not evaluate to a boolean")]
    NotBoolean(String),
}

/// Stateless per call. Implementations must be safe to share across
/// request tasks.
pub trait PolicyEvaluator: Send + Sync {
    fn evaluate(
        &self,
        principal: &Principal,
        metadata: &StatementMetadata,
    ) -> Result<PolicyDecision, PolicyError>;
}

// ── Fact set ──────────────────────────────────────────────────

/// The structured input document every policy sees.
#[derive(Debug, Serialize)]
pub struct PolicyFacts<'a> {
    pub wildcard_selected: bool,
    pub columns: &'a BTreeSet<String>,
    pub tables: &'a BTreeSet<String>,
    pub functions: &'a BTreeSet<String>,
    pub kind: StatementKind,
    pub principal: PrincipalFacts<'a>,
}

#[derive(Debug, Serialize)]
pub struct PrincipalFacts<'a> {
    pub id: Uuid,
    pub display_name: &'a str,
    pub email: &'a str,
    pub database_role: &'a str,
}

impl<'a> PolicyFacts<'a> {
    pub fn new(principal: &'a Principal, metadata: &'a StatementMetadata) -> Self {
        Self {
            wildcard_selected: metadata.wildcard,
            columns: &metadata.columns,
            tables: &metadata.tables,
            functions: &metadata.functions,
            kind: metadata.kind,
            principal: PrincipalFacts {
                id: principal.id,
                display_name: &principal.display_name,
                email: &principal.email,
                database_role: &principal.database_role,
            },
        }
    }
}

// ── RegoPolicy ────────────────────────────────────────────────

/// Rego document evaluated with regorus.
///
/// The document is parsed once, in [`RegoPolicy::from_source`]; each
/// evaluation runs on a clone of that compiled engine with its own input.
/// `allow_rule` must produce a boolean (undefined counts as deny). A sibling
/// `reason` rule, if the document defines one, supplies the denial text. It
/// may be a string or a set of strings.
#[derive(Debug, Clone)]
pub struct RegoPolicy {
    origin: String,
    engine: regorus::Engine,
    allow_rule: String,
    reason_rule: String,
}

impl RegoPolicy {
    /// Read, compile and check a policy file. Any failure here is meant to
    /// stop the process.
    pub fn load(path: impl AsRef<Path>, allow_rule: &str) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read policy file {}", path.display()))?;
        let policy = Self::from_source(path.display().to_string(), source, allow_rule)
            .with_context(|| format!("policy file {} is unusable", path.display()))?;
        tracing::info!(policy = %path.display(), rule = allow_rule, "policy loaded");
        Ok(policy)
    }

    pub fn from_source(
        origin: impl Into<String>,
        source: impl Into<String>,
        allow_rule: &str,
    ) -> Result<Self, PolicyError> {
        let origin = origin.into();
        let mut engine = regorus::Engine::new();
        engine
            .add_policy(origin.clone(), source.into())
            .map_err(|e| PolicyError::Compile(e.to_string()))?;

        let reason_rule = match allow_rule.rsplit_once('.') {
            Some((package, _)) => format!("{package}.reason"),
            None => "reason".to_string(),
        };
        let mut policy = Self {
            origin,
            engine,
            allow_rule: allow_rule.to_string(),
            reason_rule,
        };

        // Run once against a synthetic request so a document that compiles
        // but cannot be evaluated fails at startup rather than on the first
        // query. The stored engine keeps its analysis; clones reuse it.
        let principal = Principal {
            id: Uuid::nil(),
            display_name: "policy-check".into(),
            email: "check@localhost".into(),
            database_role: "sqlgate_check".into(),
        };
        Self::first_value(&mut policy.engine, &policy.allow_rule)?;
        policy.evaluate(&principal, &StatementMetadata::default())?;
        Ok(policy)
    }

    fn first_value(
        engine: &mut regorus::Engine,
        rule: &str,
    ) -> Result<Option<regorus::Value>, PolicyError> {
        let results = engine
            .eval_query(rule.to_string(), false)
            .map_err(|e| PolicyError::Evaluation(e.to_string()))?;
        Ok(results
            .result
            .into_iter()
            .next()
            .and_then(|r| r.expressions.into_iter().next())
            .map(|expr| expr.value))
    }

    /// A failing `reason` rule is logged; the decision stands without text.
    fn reason(&self, engine: &mut regorus::Engine) -> Option<String> {
        match Self::first_value(engine, &self.reason_rule) {
            Ok(Some(value)) => reason_text(&value),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(
                    policy = %self.origin,
                    rule = %self.reason_rule,
                    "reason rule failed: {e}"
                );
                None
            }
        }
    }
}

/// Strings are used as-is; a set or array of strings is joined in order.
fn reason_text(value: &regorus::Value) -> Option<String> {
    let parts: Vec<&str> = match value {
        regorus::Value::String(text) => return Some(text.to_string()),
        regorus::Value::Set(items) => items.iter().filter_map(string_item).collect(),
        regorus::Value::Array(items) => items.iter().filter_map(string_item).collect(),
        _ => return None,
    };
    (!parts.is_empty()).then(|| parts.join("; "))
}

fn string_item(value: &regorus::Value) -> Option<&str> {
    match value {
        regorus::Value::String(text) => Some(text.as_ref()),
        _ => None,
    }
}

impl PolicyEvaluator for RegoPolicy {
    fn evaluate(
        &self,
        principal: &Principal,
        metadata: &StatementMetadata,
    ) -> Result<PolicyDecision, PolicyError> {
        let facts = serde_json::to_string(&PolicyFacts::new(principal, metadata))
            .map_err(|e| PolicyError::Evaluation(e.to_string()))?;
        let input = regorus::Value::from_json_str(&facts)
            .map_err(|e| PolicyError::Evaluation(e.to_string()))?;

        let mut engine = self.engine.clone();
        engine.set_input(input);

        let allowed = match Self::first_value(&mut engine, &self.allow_rule)? {
            Some(regorus::Value::Bool(allowed)) => allowed,
            None | Some(regorus::Value::Undefined) => false,
            Some(_) => return Err(PolicyError::NotBoolean(self.allow_rule.clone())),
        };
        let reason = if allowed {
            None
        } else {
            self.reason(&mut engine)
        };

        Ok(PolicyDecision { allowed, reason })
    }
}
