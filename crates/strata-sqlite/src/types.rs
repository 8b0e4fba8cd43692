//! Conversions between Strata values and SQLite storage classes.
//!
//! SQLite stores INTEGER, REAL, TEXT, BLOB and NULL. Booleans go in as 0/1,
//! dates, times, decimals and JSON as text; the row mapper coerces them
//! back by declared column type.

use rusqlite::types::{Value as SqliteValue, ValueRef};
use strata_core::convert::to_storage_text;
use strata_core::{ConversionError, Error, QueryError, QueryErrorKind, Result, Value};

/// Bind form of a parameter.
pub(crate) fn to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Int(i) => SqliteValue::Integer(i64::from(*i)),
        Value::BigInt(i) => SqliteValue::Integer(*i),
        Value::Double(f) => SqliteValue::Real(*f),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Bytes(b) => SqliteValue::Blob(b.clone()),
        Value::Decimal(_) | Value::Date(_) | Value::Time(_) | Value::Timestamp(_) | Value::Json(_) => {
            to_storage_text(value).map_or(SqliteValue::Null, SqliteValue::Text)
        }
    }
}

/// Read one column of a result row.
pub(crate) fn from_sqlite(value: ValueRef<'_>) -> Result<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::BigInt(i),
        ValueRef::Real(f) => Value::Double(f),
        ValueRef::Text(bytes) => Value::Text(
            std::str::from_utf8(bytes)
                .map_err(|e| {
                    Error::Conversion(ConversionError::new("TEXT", "BLOB").with_detail(e.to_string()))
                })?
                .to_string(),
        ),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    })
}

/// Classify a driver error.
pub(crate) fn query_error(err: &rusqlite::Error, sql: &str) -> Error {
    let kind = match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            QueryErrorKind::Constraint
        }
        rusqlite::Error::SqliteFailure(_, Some(msg))
            if msg.contains("syntax error") || msg.starts_with("no such") =>
        {
            QueryErrorKind::Syntax
        }
        _ => QueryErrorKind::Database,
    };
    Error::Query(QueryError {
        kind,
        message: err.to_string(),
        sql: Some(sql.to_string()),
    })
}
