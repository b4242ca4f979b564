use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Field name -> value mapping carried by every record.
///
/// Uses `BTreeMap` for deterministic iteration and serialization order.
pub type Values = BTreeMap<String, Value>;

/// Dynamically typed record value.
///
/// Supports every JSON-compatible shape. Validated against a
/// [`FieldType`](crate::schema::FieldType) at every write boundary rather
/// than trusted structurally.
///
/// Serializes untagged so exported records read as plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON integer (signed 64-bit).
    Int(i64),
    /// JSON floating-point (64-bit IEEE 754).
    Float(f64),
    /// JSON string (UTF-8).
    String(String),
    /// JSON array (ordered sequence of values).
    Array(Vec<Value>),
    /// JSON object (ordered map of string keys to values).
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Short name of the variant, used in validation and coercion messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the string slice if this is a `String` value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
            Self::Array(_) | Self::Map(_) => {
                let rendered = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&rendered)
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_untagged() {
        let mut values = Values::new();
        values.insert("amount".to_string(), Value::Int(10));
        values.insert("status".to_string(), Value::from("pending"));
        values.insert("ratio".to_string(), Value::Float(0.5));
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"{"amount":10,"ratio":0.5,"status":"pending"}"#);
    }

    #[test]
    fn deserializes_integers_before_floats() {
        let v: Value = serde_json::from_str("12").unwrap();
        assert_eq!(v, Value::Int(12));
        let v: Value = serde_json::from_str("12.5").unwrap();
        assert_eq!(v, Value::Float(12.5));
        let v: Value = serde_json::from_str("[1,2]").unwrap();
        assert_eq!(v, Value::Array(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn display_renders_nested_as_json() {
        let v = Value::Array(vec![Value::Bool(true), Value::Null]);
        assert_eq!(v.to_string(), "[true,null]");
        assert_eq!(Value::from("abc").to_string(), "abc");
    }
}
