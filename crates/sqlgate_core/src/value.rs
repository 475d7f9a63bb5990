//! Materialized query results.
//!
//! Every cell is a closed, tagged [`Value`]; there is no untyped container
//! anywhere between the database driver and the JSON response.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// One column value.
///
/// Serializes as plain JSON (`null`, numbers, strings, nested JSON).
/// `Bytes` renders as lower-case hex; `Unsupported` renders as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Numeric(Decimal),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Json(serde_json::Value),
    #[serde(serialize_with = "as_hex")]
    Bytes(Vec<u8>),
    /// Column type the gateway does not decode; carries the type name.
    #[serde(serialize_with = "as_null")]
    Unsupported(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

fn as_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

fn as_null<S: Serializer>(_type_name: &str, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_none()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    pub column: String,
    pub value: Value,
}

/// One result row, columns in the order the database returned them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row(pub Vec<Cell>);

impl Row {
    pub fn push(&mut self, column: impl Into<String>, value: Value) {
        self.0.push(Cell {
            column: column.into(),
            value,
        });
    }

    /// First cell with this column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|cell| cell.column == column)
            .map(|cell| &cell.value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|cell| cell.column.as_str())
    }
}

impl FromIterator<Cell> for Row {
    fn from_iter<I: IntoIterator<Item = Cell>>(iter: I) -> Self {
        Row(iter.into_iter().collect())
    }
}

/// Outcome of one executed statement. Reads fill `rows`; writes report
/// `rows_affected` and leave `rows` empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

impl QueryResult {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let rows_affected = rows.len() as u64;
        Self {
            rows,
            rows_affected,
        }
    }

    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
        }
    }
}
