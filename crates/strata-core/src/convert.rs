//! Type-directed conversion of raw driver values.
//!
//! Drivers hand back whatever storage class the database used (SQLite keeps
//! dates as TEXT and booleans as INTEGER). Row mapping coerces each raw value
//! to the column's declared [`SqlType`] before it reaches an entity setter.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{ConversionError, Error, Result};
use crate::row::Row;
use crate::types::SqlType;
use crate::value::Value;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Read one column and coerce it to `sql_type`.
///
/// NULL is detected with an explicit was-null check so that a NULL integer
/// column never silently becomes `0`.
pub fn read_column(row: &Row, column: &str, sql_type: SqlType) -> Result<Value> {
    if row.is_null(column) {
        return Ok(Value::Null);
    }
    let raw = row
        .get_by_name(column)
        .cloned()
        .ok_or_else(|| Error::Custom(format!("no column named '{column}' in row")))?;
    coerce(raw, sql_type)
}

/// Coerce a raw value to the declared type.
pub fn coerce(raw: Value, sql_type: SqlType) -> Result<Value> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    match sql_type {
        SqlType::Boolean => to_bool(raw),
        SqlType::Integer => to_int(raw),
        SqlType::BigInt => to_bigint(raw),
        SqlType::Double => to_double(raw),
        SqlType::Decimal { .. } => to_decimal(raw),
        SqlType::Text | SqlType::VarChar(_) => to_text(raw),
        SqlType::Blob => match raw {
            Value::Bytes(b) => Ok(Value::Bytes(b)),
            Value::Text(s) => Ok(Value::Bytes(s.into_bytes())),
            other => Err(fail("BLOB", &other, None)),
        },
        SqlType::Date => to_date(raw),
        SqlType::Time => to_time(raw),
        SqlType::Timestamp => to_timestamp(raw),
        SqlType::Json => match raw {
            Value::Json(j) => Ok(Value::Json(j)),
            Value::Text(s) => serde_json::from_str(&s)
                .map(Value::Json)
                .map_err(|e| fail("JSON", &Value::Text(s), Some(e.to_string()))),
            other => Err(fail("JSON", &other, None)),
        },
    }
}

fn fail(expected: &'static str, found: &Value, detail: Option<String>) -> Error {
    let mut err = ConversionError::new(expected, found.type_name());
    if let Some(d) = detail {
        err = err.with_detail(d);
    }
    Error::Conversion(err)
}

fn to_bool(raw: Value) -> Result<Value> {
    match raw {
        Value::Bool(b) => Ok(Value::Bool(b)),
        Value::Int(i) => Ok(Value::Bool(i != 0)),
        Value::BigInt(i) => Ok(Value::Bool(i != 0)),
        Value::Text(ref s) => match s.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Value::Bool(true)),
            "false" | "f" | "0" => Ok(Value::Bool(false)),
            _ => Err(fail("BOOLEAN", &raw, Some(s.clone()))),
        },
        other => Err(fail("BOOLEAN", &other, None)),
    }
}

fn to_int(raw: Value) -> Result<Value> {
    match to_bigint(raw)? {
        Value::BigInt(i) => i32::try_from(i)
            .map(Value::Int)
            .map_err(|_| fail("INTEGER", &Value::BigInt(i), Some(format!("{i} out of range")))),
        other => Err(fail("INTEGER", &other, None)),
    }
}

fn to_bigint(raw: Value) -> Result<Value> {
    match raw {
        Value::Bool(b) => Ok(Value::BigInt(i64::from(b))),
        Value::Int(i) => Ok(Value::BigInt(i64::from(i))),
        Value::BigInt(i) => Ok(Value::BigInt(i)),
        Value::Double(f) if f.fract() == 0.0 => Ok(Value::BigInt(f as i64)),
        Value::Text(ref s) | Value::Decimal(ref s) => s
            .trim()
            .parse::<i64>()
            .map(Value::BigInt)
            .map_err(|_| fail("BIGINT", &raw, Some(s.clone()))),
        other => Err(fail("BIGINT", &other, None)),
    }
}

fn to_double(raw: Value) -> Result<Value> {
    match raw {
        Value::Double(f) => Ok(Value::Double(f)),
        Value::Int(_) | Value::BigInt(_) | Value::Decimal(_) => raw
            .as_f64()
            .map(Value::Double)
            .ok_or_else(|| fail("DOUBLE", &raw, None)),
        Value::Text(ref s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| fail("DOUBLE", &raw, Some(s.clone()))),
        other => Err(fail("DOUBLE", &other, None)),
    }
}

fn to_decimal(raw: Value) -> Result<Value> {
    match raw {
        Value::Decimal(s) | Value::Text(s) => Ok(Value::Decimal(s)),
        Value::Int(i) => Ok(Value::Decimal(i.to_string())),
        Value::BigInt(i) => Ok(Value::Decimal(i.to_string())),
        Value::Double(f) => Ok(Value::Decimal(f.to_string())),
        other => Err(fail("DECIMAL", &other, None)),
    }
}

fn to_text(raw: Value) -> Result<Value> {
    match raw {
        Value::Text(s) | Value::Decimal(s) => Ok(Value::Text(s)),
        Value::Int(i) => Ok(Value::Text(i.to_string())),
        Value::BigInt(i) => Ok(Value::Text(i.to_string())),
        Value::Double(f) => Ok(Value::Text(f.to_string())),
        Value::Bytes(b) => String::from_utf8(b)
            .map(Value::Text)
            .map_err(|e| fail("TEXT", &Value::Bytes(Vec::new()), Some(e.to_string()))),
        other => Err(fail("TEXT", &other, None)),
    }
}

fn to_date(raw: Value) -> Result<Value> {
    match raw {
        Value::Date(d) => Ok(Value::Date(d)),
        Value::Timestamp(ts) => Ok(Value::Date(ts.date())),
        Value::Text(ref s) => {
            let head = s.get(..10).unwrap_or(s);
            NaiveDate::parse_from_str(head, DATE_FORMAT)
                .map(Value::Date)
                .map_err(|e| fail("DATE", &raw, Some(e.to_string())))
        }
        other => Err(fail("DATE", &other, None)),
    }
}

fn to_time(raw: Value) -> Result<Value> {
    match raw {
        Value::Time(t) => Ok(Value::Time(t)),
        Value::Timestamp(ts) => Ok(Value::Time(ts.time())),
        Value::Text(ref s) => NaiveTime::parse_from_str(s, TIME_FORMAT)
            .map(Value::Time)
            .map_err(|e| fail("TIME", &raw, Some(e.to_string()))),
        other => Err(fail("TIME", &other, None)),
    }
}

fn to_timestamp(raw: Value) -> Result<Value> {
    match raw {
        Value::Timestamp(ts) => Ok(Value::Timestamp(ts)),
        Value::Date(d) => Ok(Value::Timestamp(d.and_time(NaiveTime::MIN))),
        Value::BigInt(secs) => chrono::DateTime::from_timestamp(secs, 0)
            .map(|dt| Value::Timestamp(dt.naive_utc()))
            .ok_or_else(|| fail("TIMESTAMP", &Value::BigInt(secs), Some("out of range".into()))),
        Value::Text(ref s) => TIMESTAMP_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(s, DATE_FORMAT)
                    .ok()
                    .map(|d| d.and_time(NaiveTime::MIN))
            })
            .map(Value::Timestamp)
            .ok_or_else(|| fail("TIMESTAMP", &raw, Some(s.clone()))),
        other => Err(fail("TIMESTAMP", &other, None)),
    }
}

/// Render a value the way SQLite-style text storage expects it.
pub fn to_storage_text(value: &Value) -> Option<String> {
    match value {
        Value::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
        Value::Time(t) => Some(t.format(TIME_FORMAT).to_string()),
        Value::Timestamp(ts) => Some(ts.format(TIMESTAMP_FORMATS[0]).to_string()),
        Value::Json(j) => Some(j.to_string()),
        Value::Decimal(s) => Some(s.clone()),
        _ => None,
    }
}
