// used for persistence
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

// used for timestamps in the records
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
// used for decimal numbers
use bigdecimal::BigDecimal;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// used when parsing a string to a decimal
use std::str::FromStr;
// used to print out readable forms of a value
use std::fmt;
// used to overload common operations for decimals
use std::ops;

/// The type of a record field. Every field is one of these, and every filter
/// value is coerced to the type of the field it targets before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Decimal,
    DateTime,
    Boolean,
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "int",
            FieldType::Decimal => "decimal",
            FieldType::DateTime => "datetime",
            FieldType::Boolean => "bool",
        }
    }
    /// Whether `gt`/`ge`/`lt`/`le` make sense for this type.
    pub fn is_orderable(&self) -> bool {
        !matches!(self, FieldType::Boolean)
    }
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Integer | FieldType::Boolean => "INTEGER",
            FieldType::String | FieldType::Decimal | FieldType::DateTime => "TEXT",
        }
    }
}
impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A typed, non-null field value.
///
/// Ordering is only meaningful between values of the same variant, which the
/// filter builder guarantees by coercing every comparison value to the type
/// of its field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Decimal(Decimal),
    DateTime(NaiveDateTime),
    String(String),
}

impl Value {
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Boolean(_) => FieldType::Boolean,
            Value::Integer(_) => FieldType::Integer,
            Value::Decimal(_) => FieldType::Decimal,
            Value::DateTime(_) => FieldType::DateTime,
            Value::String(_) => FieldType::String,
        }
    }
    pub fn into_string(self) -> Option<String> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
    pub fn into_integer(self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(i),
            _ => None,
        }
    }
    pub fn into_decimal(self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(d),
            _ => None,
        }
    }
    pub fn into_datetime(self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(d) => Some(d),
            _ => None,
        }
    }
}
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::DateTime(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}
impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Boolean(b) => Ok(ToSqlOutput::from(*b)),
            Value::Integer(i) => Ok(ToSqlOutput::from(*i)),
            Value::Decimal(d) => d.to_sql(),
            Value::DateTime(d) => d.to_sql(),
            Value::String(s) => Ok(ToSqlOutput::from(s.as_str())),
        }
    }
}

#[derive(Eq, PartialEq, Hash, PartialOrd, Ord, Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Decimal (BigDecimal);

impl Decimal {
    pub fn from_str(s: &str) -> Option<Decimal> {
        match BigDecimal::from_str(s.trim()) {
            Ok(decimal) => Some(Decimal (decimal)),
            _ => None
        }
    }
}
impl From<i64> for Decimal {
    fn from(i: i64) -> Self {
        Decimal (BigDecimal::from(i))
    }
}
impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl FromSql for Decimal {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Text(text) => std::str::from_utf8(text)
                .ok()
                .and_then(Decimal::from_str)
                .ok_or(FromSqlError::InvalidType),
            ValueRef::Integer(i) => Ok(Decimal::from(i)),
            ValueRef::Real(r) => Decimal::from_str(&r.to_string()).ok_or(FromSqlError::InvalidType),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}
impl ToSql for Decimal {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.to_string()))
    }
}
impl ops::Deref for Decimal {
    type Target = BigDecimal;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ------------- Coercion --------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoercionError {
    #[error("value is null")]
    Null,
    #[error("cannot convert {value} to {target}")]
    Incompatible { value: String, target: FieldType },
}

fn incompatible(value: &serde_json::Value, target: FieldType) -> CoercionError {
    CoercionError::Incompatible { value: value.to_string(), target }
}

/// Converts an untyped scalar into a value of the given field type.
///
/// Date/time strings go through [`parse_datetime`], numbers are read as
/// decimals (and must be integral for integer fields), everything else uses
/// a plain conversion. Arrays and objects are never accepted.
pub fn coerce(value: &serde_json::Value, target: FieldType) -> Result<Value, CoercionError> {
    use serde_json::Value as Json;
    if value.is_null() {
        return Err(CoercionError::Null);
    }
    match target {
        FieldType::String => match value {
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Number(n) => Ok(Value::String(n.to_string())),
            Json::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(incompatible(value, target)),
        },
        FieldType::DateTime => match value {
            Json::String(s) => parse_datetime(s)
                .map(Value::DateTime)
                .ok_or_else(|| incompatible(value, target)),
            _ => Err(incompatible(value, target)),
        },
        FieldType::Decimal => scalar_text(value)
            .and_then(|text| Decimal::from_str(&text))
            .map(Value::Decimal)
            .ok_or_else(|| incompatible(value, target)),
        FieldType::Integer => scalar_text(value)
            .and_then(|text| parse_integer(&text))
            .map(Value::Integer)
            .ok_or_else(|| incompatible(value, target)),
        FieldType::Boolean => match value {
            Json::Bool(b) => Ok(Value::Boolean(*b)),
            Json::String(s) => parse_boolean(s)
                .map(Value::Boolean)
                .ok_or_else(|| incompatible(value, target)),
            Json::Number(n) => match n.as_i64() {
                Some(0) => Ok(Value::Boolean(false)),
                Some(1) => Ok(Value::Boolean(true)),
                _ => Err(incompatible(value, target)),
            },
            _ => Err(incompatible(value, target)),
        },
    }
}

fn scalar_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses an integer, accepting decimal notation as long as it is integral
/// (`"12"`, `"12.0"`, `1.2e1`).
pub fn parse_integer(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Some(i);
    }
    let decimal = BigDecimal::from_str(text).ok()?;
    if !decimal.is_integer() {
        return None;
    }
    decimal.with_scale(0).to_string().parse::<i64>().ok()
}

pub fn parse_boolean(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%Y-%m-%d %H:%M",
];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// Parses the date/time layouts found in filter input and dataset exports.
/// Offsets (RFC 3339) are normalised to UTC; bare dates mean midnight.
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(text, format) {
            return Some(d.and_time(NaiveTime::default()));
        }
    }
    None
}

/// Parses one raw text cell (CSV, query string) for a field type.
/// Blank or unparsable cells are treated as null.
pub fn parse_cell(text: &str, target: FieldType) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match target {
        FieldType::String => Some(Value::String(text.to_string())),
        FieldType::Integer => parse_integer(text).map(Value::Integer),
        FieldType::Decimal => Decimal::from_str(text).map(Value::Decimal),
        FieldType::DateTime => parse_datetime(text).map(Value::DateTime),
        FieldType::Boolean => parse_boolean(text).map(Value::Boolean),
    }
}
