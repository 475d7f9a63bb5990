//! Statement classification.
//!
//! Parses submitted SQL with `sqlparser` (PostgreSQL dialect) and derives the
//! metadata the policy gate needs: statement kind, referenced tables, called
//! functions, and the projected columns or a wildcard flag. Nothing here
//! touches a database.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    visit_expressions, visit_relations, visit_statements, Expr, Ident, ObjectName, SelectItem,
    SetExpr, Statement, TableFactor, Visit, Visitor,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::GateError;

// ── Types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// `SELECT`, set operations over selects, `VALUES`.
    Read,
    /// `INSERT`, `UPDATE`, `DELETE`, or a query with a data-modifying CTE.
    Write,
    #[default]
    Other,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a statement touches. Derived from the text alone, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatementMetadata {
    pub kind: StatementKind,
    /// Every relation referenced anywhere in the statement, schema-qualified
    /// when the SQL qualifies it.
    pub tables: BTreeSet<String>,
    /// Columns named in the projection (reads) or the target list (inserts).
    pub columns: BTreeSet<String>,
    /// `*` or `t.*` appears in a projection.
    pub wildcard: bool,
    /// Every function called anywhere in the statement, scalar or
    /// table-valued, schema-qualified when the SQL qualifies it. Functions
    /// such as `set_config` or `query_to_xml` act outside the table and
    /// column facts, so policy needs to see them by name.
    pub functions: BTreeSet<String>,
}

/// A single parsed statement, ready for the policy gate and the executor.
#[derive(Debug, Clone)]
pub struct ClassifiedStatement {
    sql: String,
    metadata: StatementMetadata,
}

impl ClassifiedStatement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn metadata(&self) -> &StatementMetadata {
        &self.metadata
    }

    pub fn kind(&self) -> StatementKind {
        self.metadata.kind
    }

    /// Executors only ever run `Read` or `Write`, and only when the caller
    /// asked for the kind the text actually is.
    pub fn expect_kind(&self, expected: StatementKind) -> Result<(), GateError> {
        let actual = self.kind();
        if expected == StatementKind::Other || actual != expected {
            return Err(GateError::IncorrectStatementType { expected, actual });
        }
        Ok(())
    }
}

// ── classify ──────────────────────────────────────────────────

/// Parse exactly one statement. Empty text, unparseable text and
/// multi-statement text are all `ParseFailure`; none of them is ever
/// downgraded to `Other`.
pub fn classify(sql: &str) -> Result<ClassifiedStatement, GateError> {
    let text = sql.trim();
    if text.is_empty() {
        return Err(GateError::ParseFailure("empty statement".into()));
    }

    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, text)
        .map_err(|e| GateError::ParseFailure(e.to_string()))?;
    let statement = match statements.len() {
        0 => return Err(GateError::ParseFailure("empty statement".into())),
        1 => statements.remove(0),
        n => {
            return Err(GateError::ParseFailure(format!(
                "expected one statement, found {n}"
            )))
        }
    };

    Ok(ClassifiedStatement {
        sql: text.to_string(),
        metadata: describe(&statement),
    })
}

fn describe(statement: &Statement) -> StatementMetadata {
    let mut metadata = StatementMetadata {
        kind: kind_of(statement),
        ..Default::default()
    };

    let _ = visit_relations(statement, |relation| {
        metadata.tables.insert(relation_name(relation));
        ControlFlow::<()>::Continue(())
    });

    let mut calls = FunctionCalls::default();
    let _ = statement.visit(&mut calls);
    metadata.functions = calls.0;

    match statement {
        Statement::Query(query) => collect_projection(&query.body, &mut metadata),
        Statement::Insert(insert) => {
            metadata
                .columns
                .extend(insert.columns.iter().map(fold_ident));
        }
        _ => {}
    }

    metadata
}

fn kind_of(statement: &Statement) -> StatementKind {
    match statement {
        Statement::Query(_) if modifies_data(statement) => StatementKind::Write,
        Statement::Query(_) => StatementKind::Read,
        Statement::Insert { .. } | Statement::Update { .. } | Statement::Delete { .. } => {
            StatementKind::Write
        }
        _ => StatementKind::Other,
    }
}

/// `WITH moved AS (INSERT ... RETURNING *) SELECT ...` reads like a query but
/// writes.
fn modifies_data(statement: &Statement) -> bool {
    visit_statements(statement, |nested| match nested {
        Statement::Insert { .. } | Statement::Update { .. } | Statement::Delete { .. } => {
            ControlFlow::Break(())
        }
        _ => ControlFlow::Continue(()),
    })
    .is_break()
}

#[derive(Default)]
struct FunctionCalls(BTreeSet<String>);

impl Visitor for FunctionCalls {
    type Break = ();

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        if let Expr::Function(function) = expr {
            self.0.insert(relation_name(&function.name));
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<()> {
        match factor {
            TableFactor::Table {
                name,
                args: Some(_),
                ..
            }
            | TableFactor::Function { name, .. } => {
                self.0.insert(relation_name(name));
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

fn collect_projection(body: &SetExpr, metadata: &mut StatementMetadata) {
    match body {
        SetExpr::Select(select) => {
            for item in &select.projection {
                match item {
                    SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                        metadata.wildcard = true
                    }
                    SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                        collect_columns(expr, &mut metadata.columns)
                    }
                }
            }
        }
        SetExpr::Query(query) => collect_projection(&query.body, metadata),
        SetExpr::SetOperation { left, right, .. } => {
            collect_projection(left, metadata);
            collect_projection(right, metadata);
        }
        _ => {}
    }
}

/// Every column identifier inside a projected expression, so `lower(email)`
/// reports `email`.
fn collect_columns(expr: &Expr, columns: &mut BTreeSet<String>) {
    let _ = visit_expressions(expr, |nested| {
        match nested {
            Expr::Identifier(ident) => {
                columns.insert(fold_ident(ident));
            }
            Expr::CompoundIdentifier(parts) => {
                if let Some(column) = parts.last() {
                    columns.insert(fold_ident(column));
                }
            }
            _ => {}
        }
        ControlFlow::<()>::Continue(())
    });
}

fn relation_name(name: &ObjectName) -> String {
    name.0.iter().map(fold_ident).collect::<Vec<_>>().join(".")
}

/// PostgreSQL folds unquoted identifiers to lower case.
fn fold_ident(ident: &Ident) -> String {
    if ident.quote_style.is_some() {
        ident.value.clone()
    } else {
        ident.value.to_lowercase()
    }
}
