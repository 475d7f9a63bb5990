//! Privilege-scoped statement execution.
//!
//! One statement per transaction, on one pooled connection:
//!
//! ```text
//! BEGIN
//!   set_config('statement_timeout', <ms>, true)
//!   set_config('role', <principal role>, true)
//!   <statement>
//!   RESET ROLE; RESET SESSION AUTHORIZATION; RESET ALL
//! COMMIT
//! ```
//!
//! Both settings are transaction-local, so a rollback also undoes the role
//! switch. The statement itself may change session settings
//! (`set_config(.., false)`); the trailing reset is the last write inside the
//! transaction, so it is what commits. A connection whose reset or rollback
//! fails is detached from the pool and closed.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{Column, Connection, PgPool, Postgres, Row as _, Transaction, TypeInfo};
use uuid::Uuid;

use sqlgate_core::classify::{ClassifiedStatement, StatementKind};
use sqlgate_core::error::GateError;
use sqlgate_core::ports::{Result, StatementExecutor};
use sqlgate_core::principal::Principal;
use sqlgate_core::value::{Cell, QueryResult, Row, Value};

use crate::pool::SESSION_RESET;

/// SQLSTATE `insufficient_privilege`.
const INSUFFICIENT_PRIVILEGE: &str = "42501";

pub struct PgScopedExecutor {
    pool: PgPool,
    statement_timeout: Duration,
}

/// An error plus whether the connection it happened on can be reused.
struct Aborted {
    error: GateError,
    reusable: bool,
}

impl Aborted {
    fn reusable(error: GateError) -> Self {
        Self {
            error,
            reusable: true,
        }
    }

    fn poisoned(error: GateError) -> Self {
        Self {
            error,
            reusable: false,
        }
    }
}

impl PgScopedExecutor {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    async fn scoped(
        &self,
        conn: &mut PoolConnection<Postgres>,
        principal: &Principal,
        statement: &ClassifiedStatement,
        kind: StatementKind,
    ) -> std::result::Result<QueryResult, Aborted> {
        let mut tx = conn
            .begin()
            .await
            .map_err(|e| Aborted::poisoned(GateError::Internal(anyhow!(e))))?;

        let timeout_ms = self.statement_timeout.as_millis().to_string();
        if let Err(e) = sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(&timeout_ms)
            .execute(&mut *tx)
            .await
        {
            return Err(rollback(tx, GateError::Internal(anyhow!(e))).await);
        }

        // Bound as a parameter; the role name never becomes SQL text.
        if let Err(e) = sqlx::query("SELECT set_config('role', $1, true)")
            .bind(&principal.database_role)
            .execute(&mut *tx)
            .await
        {
            tracing::warn!(
                principal_id = %principal.id,
                database_role = %principal.database_role,
                "role switch refused: {e}"
            );
            let error = GateError::UnknownOrDeniedRole(principal.database_role.clone());
            return Err(rollback(tx, error).await);
        }

        let outcome = match kind {
            StatementKind::Read => match sqlx::query(statement.sql()).fetch_all(&mut *tx).await {
                Ok(rows) => rows
                    .iter()
                    .map(decode_row)
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map(QueryResult::from_rows)
                    .map_err(|e| GateError::ExecutionFailed(e.to_string())),
                Err(e) => Err(statement_error(e)),
            },
            _ => sqlx::query(statement.sql())
                .execute(&mut *tx)
                .await
                .map(|done| QueryResult::affected(done.rows_affected()))
                .map_err(statement_error),
        };
        let result = match outcome {
            Ok(result) => result,
            Err(error) => return Err(rollback(tx, error).await),
        };

        if let Err(e) = sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(SESSION_RESET)).await {
            tracing::error!(database_role = %principal.database_role, "session reset failed: {e}");
            let aborted = rollback(tx, GateError::ExecutionFailed(e.to_string())).await;
            return Err(Aborted::poisoned(aborted.error));
        }

        tx.commit()
            .await
            .map_err(|e| Aborted::poisoned(GateError::ExecutionFailed(e.to_string())))?;
        Ok(result)
    }
}

#[async_trait]
impl StatementExecutor for PgScopedExecutor {
    async fn run(
        &self,
        principal: &Principal,
        statement: &ClassifiedStatement,
        kind: StatementKind,
    ) -> Result<QueryResult> {
        // No connection is touched for a statement of the wrong kind.
        statement.expect_kind(kind)?;

        let mut conn = self.pool.acquire().await.map_err(|e| anyhow!(e))?;
        let outcome = self.scoped(&mut conn, principal, statement, kind).await;
        match outcome {
            Ok(result) => Ok(result),
            Err(Aborted { error, reusable }) => {
                if !reusable {
                    tracing::warn!(
                        principal_id = %principal.id,
                        "closing connection with unknown session state"
                    );
                    if let Err(e) = conn.detach().close().await {
                        tracing::debug!("close after detach failed: {e}");
                    }
                }
                Err(error)
            }
        }
    }
}

async fn rollback(tx: Transaction<'_, Postgres>, error: GateError) -> Aborted {
    match tx.rollback().await {
        Ok(()) => Aborted::reusable(error),
        Err(e) => {
            tracing::error!("rollback failed: {e}");
            Aborted::poisoned(error)
        }
    }
}

/// Privilege failures are authorization outcomes, everything else is an
/// execution failure. Driver text stays in the error for logs only.
fn statement_error(e: sqlx::Error) -> GateError {
    let privilege = e
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == INSUFFICIENT_PRIVILEGE);
    if privilege {
        GateError::PrivilegeDenied(e.to_string())
    } else {
        GateError::ExecutionFailed(e.to_string())
    }
}

// ── Row decoding ──────────────────────────────────────────────

fn decode_row(row: &PgRow) -> std::result::Result<Row, sqlx::Error> {
    row.columns()
        .iter()
        .map(|column| {
            Ok(Cell {
                column: column.name().to_string(),
                value: decode_value(row, column.ordinal(), column.type_info().name())?,
            })
        })
        .collect()
}

fn decode_value(
    row: &PgRow,
    idx: usize,
    type_name: &str,
) -> std::result::Result<Value, sqlx::Error> {
    let value = match type_name {
        "BOOL" => nullable(row.try_get::<Option<bool>, _>(idx)?, Value::Bool),
        "INT2" => nullable(row.try_get::<Option<i16>, _>(idx)?, |v| Value::Int(v.into())),
        "INT4" => nullable(row.try_get::<Option<i32>, _>(idx)?, |v| Value::Int(v.into())),
        "INT8" => nullable(row.try_get::<Option<i64>, _>(idx)?, Value::Int),
        "FLOAT4" => nullable(row.try_get::<Option<f32>, _>(idx)?, |v| Value::Float(v.into())),
        "FLOAT8" => nullable(row.try_get::<Option<f64>, _>(idx)?, Value::Float),
        "NUMERIC" => nullable(row.try_get::<Option<Decimal>, _>(idx)?, Value::Numeric),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            nullable(row.try_get::<Option<String>, _>(idx)?, Value::Text)
        }
        "UUID" => nullable(row.try_get::<Option<Uuid>, _>(idx)?, Value::Uuid),
        "TIMESTAMPTZ" => nullable(
            row.try_get::<Option<DateTime<Utc>>, _>(idx)?,
            Value::Timestamp,
        ),
        "TIMESTAMP" => nullable(row.try_get::<Option<NaiveDateTime>, _>(idx)?, |v| {
            Value::Timestamp(v.and_utc())
        }),
        "DATE" => nullable(row.try_get::<Option<NaiveDate>, _>(idx)?, Value::Date),
        "JSON" | "JSONB" => nullable(
            row.try_get::<Option<serde_json::Value>, _>(idx)?,
            Value::Json,
        ),
        "BYTEA" => nullable(row.try_get::<Option<Vec<u8>>, _>(idx)?, Value::Bytes),
        other => Value::Unsupported(other.to_string()),
    };
    Ok(value)
}

fn nullable<T>(value: Option<T>, wrap: impl FnOnce(T) -> Value) -> Value {
    value.map(wrap).unwrap_or(Value::Null)
}
