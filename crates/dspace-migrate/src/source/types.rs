//! Row and table types for source reads.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

/// Source table metadata.
///
/// The id column is the immutable primary key the reader orders by, so
/// paging stays deterministic across a run.
#[derive(Debug, Clone)]
pub struct SourceTable {
    /// Table name (unqualified; the export lives in the public schema).
    pub name: String,

    /// Primary key column used for deterministic ordering.
    pub id_column: String,

    /// Row count at read start.
    pub row_count: i64,
}

impl SourceTable {
    /// Check if the table exceeds the chunking threshold.
    pub fn is_large(&self, threshold: i64) -> bool {
        self.row_count > threshold
    }
}

/// A single column value read from the source.
///
/// Owned subset of the usual SQL scalar types; anything more exotic is
/// carried as text.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    Text(String),
    Uuid(Uuid),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Json(serde_json::Value),
}

impl RowValue {
    /// Check if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, RowValue::Null)
    }

    /// Check if this value is absent for resolution purposes: NULL or
    /// whitespace-only text.
    pub fn is_empty(&self) -> bool {
        match self {
            RowValue::Null => true,
            RowValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Borrow the text content, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RowValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Render the value as a plain string for id/membership comparisons.
    pub fn to_plain_string(&self) -> String {
        match self {
            RowValue::Null => String::new(),
            RowValue::Bool(v) => v.to_string(),
            RowValue::I16(v) => v.to_string(),
            RowValue::I32(v) => v.to_string(),
            RowValue::I64(v) => v.to_string(),
            RowValue::F64(v) => v.to_string(),
            RowValue::Text(v) => v.clone(),
            RowValue::Uuid(v) => v.to_string(),
            RowValue::Date(v) => v.to_string(),
            RowValue::DateTime(v) => v.to_string(),
            RowValue::Json(v) => v.to_string(),
        }
    }

    /// Convert to a JSON value for the target payload.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            RowValue::Null => serde_json::Value::Null,
            RowValue::Bool(v) => serde_json::Value::Bool(*v),
            RowValue::I16(v) => serde_json::Value::from(*v),
            RowValue::I32(v) => serde_json::Value::from(*v),
            RowValue::I64(v) => serde_json::Value::from(*v),
            RowValue::F64(v) => serde_json::Value::from(*v),
            RowValue::Text(v) => serde_json::Value::String(v.clone()),
            RowValue::Uuid(v) => serde_json::Value::String(v.to_string()),
            RowValue::Date(v) => serde_json::Value::String(v.to_string()),
            RowValue::DateTime(v) => serde_json::Value::String(v.to_string()),
            RowValue::Json(v) => v.clone(),
        }
    }
}

impl From<&str> for RowValue {
    fn from(v: &str) -> Self {
        RowValue::Text(v.to_string())
    }
}

impl From<String> for RowValue {
    fn from(v: String) -> Self {
        RowValue::Text(v)
    }
}

impl From<i32> for RowValue {
    fn from(v: i32) -> Self {
        RowValue::I32(v)
    }
}

impl From<i64> for RowValue {
    fn from(v: i64) -> Self {
        RowValue::I64(v)
    }
}

impl From<bool> for RowValue {
    fn from(v: bool) -> Self {
        RowValue::Bool(v)
    }
}

/// A raw source row: column name to value.
pub type Row = BTreeMap<String, RowValue>;

/// A bounded page of rows, consumed and discarded immediately.
#[derive(Debug)]
pub struct RowBatch {
    /// Row offset of the first row within the ordered table read.
    pub offset: i64,

    /// Rows in primary-key order.
    pub rows: Vec<Row>,
}

impl RowBatch {
    pub fn new(offset: i64, rows: Vec<Row>) -> Self {
        Self { offset, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Convert a PostgreSQL row column to a RowValue, by declared type name.
///
/// Unknown types fall back to text; a failed typed get becomes NULL, which
/// matches how the export treats unreadable values.
pub(crate) fn convert_pg_value(row: &tokio_postgres::Row, idx: usize) -> RowValue {
    let ty = row.columns()[idx].type_().name();
    match ty {
        "bool" => row
            .try_get::<_, bool>(idx)
            .map(RowValue::Bool)
            .unwrap_or(RowValue::Null),
        "int2" => row
            .try_get::<_, i16>(idx)
            .map(RowValue::I16)
            .unwrap_or(RowValue::Null),
        "int4" => row
            .try_get::<_, i32>(idx)
            .map(RowValue::I32)
            .unwrap_or(RowValue::Null),
        "int8" => row
            .try_get::<_, i64>(idx)
            .map(RowValue::I64)
            .unwrap_or(RowValue::Null),
        "float4" => row
            .try_get::<_, f32>(idx)
            .map(|v| RowValue::F64(v as f64))
            .unwrap_or(RowValue::Null),
        "float8" => row
            .try_get::<_, f64>(idx)
            .map(RowValue::F64)
            .unwrap_or(RowValue::Null),
        "uuid" => row
            .try_get::<_, Uuid>(idx)
            .map(RowValue::Uuid)
            .unwrap_or(RowValue::Null),
        "date" => row
            .try_get::<_, NaiveDate>(idx)
            .map(RowValue::Date)
            .unwrap_or(RowValue::Null),
        "timestamp" => row
            .try_get::<_, NaiveDateTime>(idx)
            .map(RowValue::DateTime)
            .unwrap_or(RowValue::Null),
        "timestamptz" => row
            .try_get::<_, chrono::DateTime<chrono::FixedOffset>>(idx)
            .map(|v| RowValue::DateTime(v.naive_utc()))
            .unwrap_or(RowValue::Null),
        "json" | "jsonb" => row
            .try_get::<_, serde_json::Value>(idx)
            .map(RowValue::Json)
            .unwrap_or(RowValue::Null),
        _ => row
            .try_get::<_, String>(idx)
            .map(RowValue::Text)
            .unwrap_or(RowValue::Null),
    }
}

/// Convert a whole PostgreSQL row into a column-name map.
pub(crate) fn convert_pg_row(row: &tokio_postgres::Row) -> Row {
    let mut out = Row::new();
    for (idx, col) in row.columns().iter().enumerate() {
        out.insert(col.name().to_string(), convert_pg_value(row, idx));
    }
    out
}
