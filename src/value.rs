//! Attribute values as stored in and read from the embedded store

use crate::model::AttributeType;
use crate::{Error, Result};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single attribute value.
///
/// Serialized untagged so schema defaults and JSON output read naturally
/// (`"abc"`, `3`, `true`, `null`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the value's type, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
        }
    }

    /// Check whether this value can be stored in an attribute of `ty`.
    ///
    /// Null is accepted here; optionality is checked by the store.
    /// Integers are accepted for double attributes.
    pub fn conforms_to(&self, ty: AttributeType) -> bool {
        match (self, ty) {
            (Value::Null, _) => true,
            (Value::Boolean(_), AttributeType::Boolean) => true,
            (Value::Integer(_), AttributeType::Integer) => true,
            (Value::Integer(_), AttributeType::Double) => true,
            (Value::Double(_), AttributeType::Double) => true,
            (Value::String(_), AttributeType::String) => true,
            (Value::Binary(_), AttributeType::Binary) => true,
            _ => false,
        }
    }

    /// Parse text input (e.g. from the command line) as a value of `ty`.
    ///
    /// The literal `null` always parses to `Value::Null`.
    pub fn parse_as(text: &str, ty: AttributeType) -> Result<Self> {
        if text == "null" {
            return Ok(Value::Null);
        }
        let bad = || Error::Parse(format!("'{}' is not a valid {}", text, ty));
        match ty {
            AttributeType::String => Ok(Value::String(text.to_string())),
            AttributeType::Integer => text.parse().map(Value::Integer).map_err(|_| bad()),
            AttributeType::Double => text.parse().map(Value::Double).map_err(|_| bad()),
            AttributeType::Boolean => match text.to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Boolean(true)),
                "false" | "no" | "0" => Ok(Value::Boolean(false)),
                _ => Err(bad()),
            },
            AttributeType::Binary => Ok(Value::Binary(text.as_bytes().to_vec())),
        }
    }

    /// Rebuild a typed value from a raw SQLite cell.
    ///
    /// SQLite has no boolean storage class, so the declared attribute type
    /// decides how integers are read back.
    pub(crate) fn from_sql_ref(cell: ValueRef<'_>, ty: AttributeType) -> Self {
        match cell {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => match ty {
                AttributeType::Boolean => Value::Boolean(i != 0),
                AttributeType::Double => Value::Double(i as f64),
                _ => Value::Integer(i),
            },
            ValueRef::Real(f) => Value::Double(f),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Binary(b.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::from(rusqlite::types::Null),
            Value::Boolean(b) => ToSqlOutput::from(*b),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Double(f) => ToSqlOutput::from(*f),
            Value::String(s) => ToSqlOutput::from(s.as_str()),
            Value::Binary(b) => ToSqlOutput::from(b.as_slice()),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Double(f),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Binary(b.to_vec()),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{}", s),
            Value::Binary(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Double(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Binary(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conforms_to() {
        assert!(Value::from("x").conforms_to(AttributeType::String));
        assert!(Value::from(3).conforms_to(AttributeType::Double));
        assert!(!Value::from(3.5).conforms_to(AttributeType::Integer));
        assert!(!Value::from(true).conforms_to(AttributeType::String));
        assert!(Value::Null.conforms_to(AttributeType::Binary));
    }

    #[test]
    fn test_parse_as() {
        assert_eq!(Value::parse_as("42", AttributeType::Integer).unwrap(), Value::Integer(42));
        assert_eq!(Value::parse_as("yes", AttributeType::Boolean).unwrap(), Value::Boolean(true));
        assert_eq!(Value::parse_as("null", AttributeType::String).unwrap(), Value::Null);
        assert!(Value::parse_as("forty", AttributeType::Integer).is_err());
    }

    #[test]
    fn test_boolean_read_back_from_integer_cell() {
        let v = Value::from_sql_ref(ValueRef::Integer(1), AttributeType::Boolean);
        assert_eq!(v, Value::Boolean(true));
        let v = Value::from_sql_ref(ValueRef::Integer(2), AttributeType::Double);
        assert_eq!(v, Value::Double(2.0));
    }

    #[test]
    fn test_untagged_json() {
        let values: Vec<Value> = serde_json::from_str(r#"[null, true, 3, 1.5, "a"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Boolean(true),
                Value::Integer(3),
                Value::Double(1.5),
                Value::String("a".to_string()),
            ]
        );
    }
}
