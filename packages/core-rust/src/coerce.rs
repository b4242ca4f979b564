//! Value coercion between field types, used by `retypeField` migration steps.
//!
//! Every rule is idempotent: coercing an already-coerced value to the same
//! type returns it unchanged. Restarted migrations rely on this.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::schema::FieldType;
use crate::types::Value;

/// A value that has no representation in the target type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot coerce {found} value {rendered} to {target}")]
pub struct CoercionError {
    pub target: FieldType,
    /// Variant name of the offending value.
    pub found: &'static str,
    /// Offending value rendered for display, truncated.
    pub rendered: String,
}

impl CoercionError {
    fn new(target: FieldType, value: &Value) -> Self {
        let mut rendered = value.to_string();
        if rendered.len() > 64 {
            let cut = (0..=64).rev().find(|i| rendered.is_char_boundary(*i)).unwrap_or(0);
            rendered.truncate(cut);
            rendered.push_str("...");
        }
        Self {
            target,
            found: value.kind(),
            rendered: format!("{rendered:?}"),
        }
    }
}

/// Parses an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
#[must_use]
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn render_date(dt: DateTime<Utc>) -> Value {
    Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn parse_number(s: &str) -> Option<Value> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Int(i));
    }
    s.parse::<f64>()
        .ok()
        .filter(|x| x.is_finite())
        .map(Value::Float)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Converts `value` to `target`'s representation.
///
/// `Null` always coerces to `Null`.
///
/// # Errors
///
/// Returns [`CoercionError`] when the value has no meaning in the target type.
pub fn coerce(value: &Value, target: FieldType) -> Result<Value, CoercionError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let converted = match (target, value) {
        (FieldType::Json, v) => Some(v.clone()),

        (FieldType::Text, Value::String(_)) => Some(value.clone()),
        (FieldType::Text, v) => Some(Value::String(v.to_string())),

        (FieldType::Number, Value::Int(_)) => Some(value.clone()),
        (FieldType::Number, Value::Float(x)) => x.is_finite().then(|| value.clone()),
        (FieldType::Number, Value::String(s)) => parse_number(s),
        (FieldType::Number, Value::Bool(b)) => Some(Value::Int(i64::from(*b))),

        (FieldType::Boolean, Value::Bool(_)) => Some(value.clone()),
        (FieldType::Boolean, Value::String(s)) => parse_bool(s).map(Value::Bool),
        (FieldType::Boolean, Value::Int(0)) => Some(Value::Bool(false)),
        (FieldType::Boolean, Value::Int(1)) => Some(Value::Bool(true)),

        (FieldType::Date, Value::String(s)) => parse_date(s).map(render_date),
        (FieldType::Date, Value::Int(ms)) => DateTime::from_timestamp_millis(*ms).map(render_date),

        (FieldType::Relation, Value::String(s)) => (!s.is_empty()).then(|| value.clone()),
        (FieldType::Relation, Value::Int(i)) => Some(Value::String(i.to_string())),

        _ => None,
    };
    converted.ok_or_else(|| CoercionError::new(target, value))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn text_to_number() {
        assert_eq!(coerce(&Value::from("12.5"), FieldType::Number), Ok(Value::Float(12.5)));
        assert_eq!(coerce(&Value::from(" 42 "), FieldType::Number), Ok(Value::Int(42)));
        let err = coerce(&Value::from("abc"), FieldType::Number).unwrap_err();
        assert_eq!(err.target, FieldType::Number);
        assert_eq!(err.found, "string");
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        assert!(coerce(&Value::from("NaN"), FieldType::Number).is_err());
        assert!(coerce(&Value::from("inf"), FieldType::Number).is_err());
        assert!(coerce(&Value::Float(f64::INFINITY), FieldType::Number).is_err());
    }

    #[test]
    fn anything_to_text() {
        assert_eq!(coerce(&Value::Int(7), FieldType::Text), Ok(Value::from("7")));
        assert_eq!(coerce(&Value::Bool(true), FieldType::Text), Ok(Value::from("true")));
        let mut map = BTreeMap::new();
        map.insert("k".to_string(), Value::Int(1));
        assert_eq!(coerce(&Value::Map(map), FieldType::Text), Ok(Value::from(r#"{"k":1}"#)));
    }

    #[test]
    fn booleans() {
        assert_eq!(coerce(&Value::from("Yes"), FieldType::Boolean), Ok(Value::Bool(true)));
        assert_eq!(coerce(&Value::Int(0), FieldType::Boolean), Ok(Value::Bool(false)));
        assert!(coerce(&Value::Int(2), FieldType::Boolean).is_err());
        assert!(coerce(&Value::from("maybe"), FieldType::Boolean).is_err());
    }

    #[test]
    fn dates_normalise_to_utc() {
        assert_eq!(
            coerce(&Value::from("2024-05-01"), FieldType::Date),
            Ok(Value::from("2024-05-01T00:00:00Z"))
        );
        assert_eq!(
            coerce(&Value::from("2024-05-01T12:00:00+02:00"), FieldType::Date),
            Ok(Value::from("2024-05-01T10:00:00Z"))
        );
        assert_eq!(
            coerce(&Value::Int(0), FieldType::Date),
            Ok(Value::from("1970-01-01T00:00:00Z"))
        );
        assert!(coerce(&Value::Bool(true), FieldType::Date).is_err());
    }

    #[test]
    fn relations_need_non_empty_ids() {
        assert_eq!(coerce(&Value::Int(9), FieldType::Relation), Ok(Value::from("9")));
        assert!(coerce(&Value::from(""), FieldType::Relation).is_err());
    }

    #[test]
    fn null_passes_through_every_type() {
        for ty in [
            FieldType::Text,
            FieldType::Number,
            FieldType::Boolean,
            FieldType::Date,
            FieldType::Relation,
            FieldType::Json,
        ] {
            assert_eq!(coerce(&Value::Null, ty), Ok(Value::Null));
        }
    }

    #[test]
    fn coercion_is_idempotent() {
        let samples = [
            (Value::from("12.5"), FieldType::Number),
            (Value::from("2024-05-01"), FieldType::Date),
            (Value::Int(3), FieldType::Text),
            (Value::from("no"), FieldType::Boolean),
        ];
        for (value, ty) in samples {
            let once = coerce(&value, ty).unwrap();
            assert_eq!(coerce(&once, ty).unwrap(), once);
        }
    }

    #[test]
    fn long_values_are_truncated_in_errors() {
        let long = "x".repeat(500);
        let err = coerce(&Value::from(long), FieldType::Number).unwrap_err();
        assert!(err.rendered.len() < 80);
    }
}
