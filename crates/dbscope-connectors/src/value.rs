//! Dynamically-typed row values and the shared row materializer.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Serialize, Serializer};
use sqlx::{Column as _, TypeInfo as _, ValueRef as _};

/// A single scalar read from a result set.
///
/// The set of variants is closed: every dialect maps its driver types onto
/// these, and anything it has no mapping for is carried as `Text`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
    Uuid(uuid::Uuid),
}

/// One result row keyed by backend column name.
pub type Row = BTreeMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => s.serialize_none(),
            Value::Int(v) => s.serialize_i64(*v),
            Value::Float(v) => s.serialize_f64(*v),
            Value::Text(v) => s.serialize_str(v),
            Value::Bool(v) => s.serialize_bool(*v),
            Value::Bytes(v) => match std::str::from_utf8(v) {
                Ok(text) => s.serialize_str(text),
                Err(_) => s.serialize_str(&hex_literal(v)),
            },
            Value::Date(v) => s.collect_str(v),
            Value::Time(v) => s.collect_str(v),
            Value::Timestamp(v) => s.collect_str(&v.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::TimestampTz(v) => s.serialize_str(&v.to_rfc3339()),
            Value::Json(v) => v.serialize(s),
            Value::Uuid(v) => s.collect_str(v),
        }
    }
}

/// Render bytes the way Postgres prints `bytea`: `\x` followed by hex.
fn hex_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Decodes the non-null cell at `index`, given the driver's type name for it.
pub(crate) type CellDecoder<R> = fn(&R, usize, &str) -> Result<Value, sqlx::Error>;

/// Convert driver rows into [`Row`] maps, preserving cursor order.
pub(crate) fn materialize<R>(rows: &[R], decode: CellDecoder<R>) -> Result<Vec<Row>, sqlx::Error>
where
    R: sqlx::Row,
    usize: sqlx::ColumnIndex<R>,
{
    rows.iter().map(|row| materialize_row(row, decode)).collect()
}

fn materialize_row<R>(row: &R, decode: CellDecoder<R>) -> Result<Row, sqlx::Error>
where
    R: sqlx::Row,
    usize: sqlx::ColumnIndex<R>,
{
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            decode(row, i, &type_name)?
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}
