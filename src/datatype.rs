// used for persistence
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};

// used for timestamps in the database
use chrono::{DateTime, SecondsFormat, Utc};

// used to print out readable forms of a data type
use std::fmt;

use crate::error::{QuartError, Result};

/// The closed set of storage types a column may declare.
///
/// Declarations accept the canonical names as well as a few common aliases
/// (`STRING` for `TEXT`, `INT` for `INTEGER`, `FLOAT` for `REAL`, `BOOL` for
/// `BOOLEAN`, `DATETIME` for `TIMESTAMP`), case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Text,
    Integer,
    Real,
    Blob,
    Boolean,
    Timestamp,
}

impl LogicalType {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "TEXT" | "STRING" => Ok(Self::Text),
            "INTEGER" | "INT" => Ok(Self::Integer),
            "REAL" | "FLOAT" => Ok(Self::Real),
            "BLOB" => Ok(Self::Blob),
            "BOOLEAN" | "BOOL" => Ok(Self::Boolean),
            "TIMESTAMP" | "DATETIME" => Ok(Self::Timestamp),
            other => Err(QuartError::Schema(format!(
                "unrecognized column type '{other}'"
            ))),
        }
    }

    /// The SQLite column affinity used when materializing the schema.
    /// Booleans are stored as 0/1 integers and timestamps as RFC 3339 text.
    pub fn affinity(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Blob => "BLOB",
            Self::Boolean => "INTEGER",
            Self::Timestamp => "TEXT",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Blob => "BLOB",
            Self::Boolean => "BOOLEAN",
            Self::Timestamp => "TIMESTAMP",
        };
        write!(f, "{name}")
    }
}

/// A tagged runtime value, matched against the declaring column's
/// [`LogicalType`] before any statement is executed.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Blob(Vec<u8>),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Text(_) => "TEXT",
            Self::Integer(_) => "INTEGER",
            Self::Real(_) => "REAL",
            Self::Blob(_) => "BLOB",
            Self::Boolean(_) => "BOOLEAN",
            Self::Timestamp(_) => "TIMESTAMP",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this value can be stored in a column of the given type.
    /// `Null` is acceptable for any column; nullability is checked separately.
    pub fn matches(&self, logical_type: LogicalType) -> bool {
        match (self, logical_type) {
            (Self::Null, _) => true,
            (Self::Text(_), LogicalType::Text) => true,
            (Self::Integer(_), LogicalType::Integer) => true,
            (Self::Real(_), LogicalType::Real) => true,
            // integers widen into real columns without loss of intent
            (Self::Integer(_), LogicalType::Real) => true,
            (Self::Blob(_), LogicalType::Blob) => true,
            (Self::Boolean(_), LogicalType::Boolean) => true,
            (Self::Timestamp(_), LogicalType::Timestamp) => true,
            _ => false,
        }
    }

    /// Hydrate a raw SQLite cell into a tagged value, guided by the column's
    /// declared type so that stored 0/1 integers come back as booleans and
    /// stored text comes back as timestamps where declared.
    pub(crate) fn from_sql_ref(cell: ValueRef<'_>, logical_type: LogicalType) -> Result<Value> {
        if let ValueRef::Null = cell {
            return Ok(Value::Null);
        }
        let mismatch = |detail: &str| {
            QuartError::Connection(format!(
                "stored value does not match declared type {logical_type}: {detail}"
            ))
        };
        match logical_type {
            LogicalType::Text => Ok(Value::Text(
                cell.as_str().map_err(|e| mismatch(&e.to_string()))?.to_owned(),
            )),
            LogicalType::Integer => Ok(Value::Integer(
                cell.as_i64().map_err(|e| mismatch(&e.to_string()))?,
            )),
            LogicalType::Real => match cell {
                ValueRef::Integer(i) => Ok(Value::Real(i as f64)),
                other => Ok(Value::Real(
                    other.as_f64().map_err(|e| mismatch(&e.to_string()))?,
                )),
            },
            LogicalType::Blob => Ok(Value::Blob(
                cell.as_blob().map_err(|e| mismatch(&e.to_string()))?.to_vec(),
            )),
            LogicalType::Boolean => Ok(Value::Boolean(
                cell.as_i64().map_err(|e| mismatch(&e.to_string()))? != 0,
            )),
            LogicalType::Timestamp => {
                let text = cell.as_str().map_err(|e| mismatch(&e.to_string()))?;
                let parsed = DateTime::parse_from_rfc3339(text)
                    .map_err(|e| mismatch(&e.to_string()))?;
                Ok(Value::Timestamp(parsed.with_timezone(&Utc)))
            }
        }
    }

    /// Render the value as a SQL literal. Used only for developer-declared
    /// column defaults in DDL; runtime values always travel as parameters.
    pub(crate) fn sql_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_owned(),
            Self::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Integer(i) => i.to_string(),
            Self::Real(r) => r.to_string(),
            Self::Blob(b) => {
                let mut hex = String::with_capacity(b.len() * 2 + 3);
                hex.push_str("X'");
                for byte in b {
                    hex.push_str(&format!("{byte:02X}"));
                }
                hex.push('\'');
                hex
            }
            Self::Boolean(b) => if *b { "1" } else { "0" }.to_owned(),
            Self::Timestamp(t) => {
                format!("'{}'", t.to_rfc3339_opts(SecondsFormat::Micros, true))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339_opts(SecondsFormat::Micros, true)),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Null => Ok(ToSqlOutput::from(rusqlite::types::Null)),
            Self::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
            Self::Integer(i) => Ok(ToSqlOutput::from(*i)),
            Self::Real(r) => Ok(ToSqlOutput::from(*r)),
            Self::Blob(b) => Ok(ToSqlOutput::from(b.as_slice())),
            Self::Boolean(b) => Ok(ToSqlOutput::from(*b as i64)),
            Self::Timestamp(t) => Ok(ToSqlOutput::from(
                t.to_rfc3339_opts(SecondsFormat::Micros, true),
            )),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i as i64)
    }
}
impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Self::Real(r)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}
impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}
impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Blob(b)
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}
