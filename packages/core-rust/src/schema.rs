//! Collection schemas: field definitions, structural validation, and
//! write-boundary value validation.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::coerce::parse_date;
use crate::types::{Value, Values};

static FIELD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static field-name pattern compiles")
});

static SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("static slug pattern compiles")
});

/// Supported field types.
///
/// The set is closed; adding a type means adding a coercion rule for it in
/// [`coerce`](crate::coerce).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    /// RFC 3339 timestamp string.
    Date,
    /// Id of a record in another collection.
    Relation,
    /// Arbitrary nested value, never checked.
    Json,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Relation => "relation",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

impl FieldType {
    /// Checks that a non-null value already has this type's shape.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the value does not conform.
    pub fn check(self, value: &Value) -> Result<(), String> {
        let ok = match (self, value) {
            (_, Value::Null) | (Self::Json, _) => true,
            (Self::Text, Value::String(_))
            | (Self::Number, Value::Int(_))
            | (Self::Boolean, Value::Bool(_)) => true,
            (Self::Number, Value::Float(x)) => x.is_finite(),
            (Self::Date, Value::String(s)) => parse_date(s).is_some(),
            (Self::Relation, Value::String(s)) => !s.is_empty(),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("expected {self}, got {}", value.kind()))
        }
    }
}

/// Single field definition within a collection schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    /// Field name, unique within the collection.
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the field must hold a non-null value in every record.
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Target collection slug. Set iff `field_type == Relation`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_target: Option<String>,
}

impl FieldDefinition {
    /// Creates an optional field with no default.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            default_value: None,
            relation_target: None,
        }
    }

    /// Creates a relation field pointing at `target`.
    #[must_use]
    pub fn relation(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            relation_target: Some(target.into()),
            ..Self::new(name, FieldType::Relation)
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// The value injected for records that lack this field.
    #[must_use]
    pub fn fill_value(&self) -> Value {
        self.default_value.clone().unwrap_or(Value::Null)
    }

    /// Checks this definition's own invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if !FIELD_NAME.is_match(&self.name) {
            return Err(SchemaError::InvalidFieldName {
                name: self.name.clone(),
            });
        }
        match (self.field_type, &self.relation_target) {
            (FieldType::Relation, None) => {
                return Err(SchemaError::MissingRelationTarget {
                    name: self.name.clone(),
                });
            }
            (FieldType::Relation, Some(target)) if target.is_empty() => {
                return Err(SchemaError::MissingRelationTarget {
                    name: self.name.clone(),
                });
            }
            (ty, Some(_)) if ty != FieldType::Relation => {
                return Err(SchemaError::UnexpectedRelationTarget {
                    name: self.name.clone(),
                });
            }
            _ => {}
        }
        if let Some(default) = &self.default_value {
            if default.is_null() && self.required {
                return Err(SchemaError::InvalidDefault {
                    name: self.name.clone(),
                    reason: "required field cannot default to null".to_string(),
                });
            }
            self.field_type
                .check(default)
                .map_err(|reason| SchemaError::InvalidDefault {
                    name: self.name.clone(),
                    reason,
                })?;
        }
        Ok(())
    }
}

/// Validates a whole field list: each definition plus name uniqueness.
///
/// # Errors
///
/// Returns the first violated invariant.
pub fn validate_fields(fields: &[FieldDefinition]) -> Result<(), SchemaError> {
    let mut seen = HashSet::with_capacity(fields.len());
    for field in fields {
        field.validate()?;
        if !seen.insert(field.name.as_str()) {
            return Err(SchemaError::DuplicateField {
                name: field.name.clone(),
            });
        }
    }
    Ok(())
}

/// Field schema of one collection at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    /// Globally unique, immutable once created.
    pub slug: String,
    /// Presentation label. Not record-affecting, so editable without a migration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub fields: Vec<FieldDefinition>,
    /// Monotonically increasing; starts at 1.
    pub version: u64,
}

impl CollectionSchema {
    /// Creates a schema at version 1.
    #[must_use]
    pub fn new(slug: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            slug: slug.into(),
            display_name: None,
            fields,
            version: 1,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Structural validation of slug and fields.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if !SLUG.is_match(&self.slug) {
            return Err(SchemaError::InvalidSlug {
                slug: self.slug.clone(),
            });
        }
        validate_fields(&self.fields)
    }

    /// Inserts each field's default for keys absent from `values`.
    ///
    /// Fields with neither a default nor a value are left absent.
    pub fn apply_defaults(&self, values: &mut Values) {
        for field in &self.fields {
            if values.contains_key(&field.name) {
                continue;
            }
            if let Some(default) = &field.default_value {
                values.insert(field.name.clone(), default.clone());
            }
        }
    }

    /// Validates record values against this schema.
    ///
    /// Rejects keys with no matching field, values of the wrong type, and
    /// required fields that are absent or null.
    #[must_use]
    pub fn validate_values(&self, values: &Values) -> ValidationResult {
        let mut errors = Vec::new();
        for (key, value) in values {
            match self.field(key) {
                None => errors.push(format!("unknown field '{key}'")),
                Some(field) => {
                    if let Err(reason) = field.field_type.check(value) {
                        errors.push(format!("field '{key}': {reason}"));
                    }
                }
            }
        }
        for field in self.fields.iter().filter(|f| f.required) {
            if values.get(&field.name).is_none_or(Value::is_null) {
                errors.push(format!("field '{}' is required", field.name));
            }
        }
        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid { errors }
        }
    }
}

/// Result of validating values against a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The values conform to the schema.
    Valid,
    /// The values violate one or more schema constraints.
    Invalid {
        /// Human-readable descriptions of each validation failure.
        errors: Vec<String>,
    },
}

impl ValidationResult {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Structural schema violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid collection slug '{slug}'")]
    InvalidSlug { slug: String },
    #[error("invalid field name '{name}': must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidFieldName { name: String },
    #[error("duplicate field name '{name}'")]
    DuplicateField { name: String },
    #[error("relation field '{name}' has no relation target")]
    MissingRelationTarget { name: String },
    #[error("non-relation field '{name}' declares a relation target")]
    UnexpectedRelationTarget { name: String },
    #[error("field '{name}' has an invalid default: {reason}")]
    InvalidDefault { name: String, reason: String },
    #[error("required field '{name}' is added without a default value")]
    RequiredWithoutDefault { name: String },
    /// `coerce` would fill unconvertible values with `null`.
    #[error("required field '{name}' is retyped under coerce without a default value")]
    RequiredWithoutFallback { name: String },
    #[error("rename of '{from}' to '{to}' is invalid: {reason}")]
    InvalidRename {
        from: String,
        to: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> CollectionSchema {
        CollectionSchema::new(
            "orders",
            vec![
                FieldDefinition::new("amount", FieldType::Number).required(),
                FieldDefinition::new("status", FieldType::Text).with_default("pending"),
                FieldDefinition::relation("customer", "customers"),
            ],
        )
    }

    #[test]
    fn valid_schema_passes() {
        assert!(orders().validate().is_ok());
    }

    #[test]
    fn rejects_bad_field_names() {
        for bad in ["", "1abc", "has space", "dash-ed"] {
            let schema = CollectionSchema::new("c", vec![FieldDefinition::new(bad, FieldType::Text)]);
            assert!(
                matches!(schema.validate(), Err(SchemaError::InvalidFieldName { .. })),
                "{bad:?} should be rejected"
            );
        }
        let ok = CollectionSchema::new("c", vec![FieldDefinition::new("_a1", FieldType::Text)]);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_names() {
        let schema = CollectionSchema::new(
            "c",
            vec![
                FieldDefinition::new("a", FieldType::Text),
                FieldDefinition::new("a", FieldType::Number),
            ],
        );
        assert_eq!(
            schema.validate(),
            Err(SchemaError::DuplicateField { name: "a".into() })
        );
    }

    #[test]
    fn relation_target_iff_relation_type() {
        let mut missing = FieldDefinition::new("owner", FieldType::Relation);
        assert!(matches!(
            missing.validate(),
            Err(SchemaError::MissingRelationTarget { .. })
        ));
        missing.relation_target = Some("users".into());
        assert!(missing.validate().is_ok());

        let mut text = FieldDefinition::new("title", FieldType::Text);
        text.relation_target = Some("users".into());
        assert!(matches!(
            text.validate(),
            Err(SchemaError::UnexpectedRelationTarget { .. })
        ));
    }

    #[test]
    fn default_must_match_type() {
        let field = FieldDefinition::new("amount", FieldType::Number).with_default("ten");
        assert!(matches!(
            field.validate(),
            Err(SchemaError::InvalidDefault { .. })
        ));
    }

    #[test]
    fn rejects_bad_slug() {
        let schema = CollectionSchema::new("bad slug", vec![]);
        assert!(matches!(schema.validate(), Err(SchemaError::InvalidSlug { .. })));
    }

    #[test]
    fn validate_values_reports_every_problem() {
        let schema = orders();
        let mut values = Values::new();
        values.insert("status".into(), Value::Int(3));
        values.insert("ghost".into(), Value::Null);
        let ValidationResult::Invalid { errors } = schema.validate_values(&values) else {
            panic!("expected invalid");
        };
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("unknown field 'ghost'")));
        assert!(errors.iter().any(|e| e.contains("'amount' is required")));
        assert!(errors.iter().any(|e| e.contains("field 'status'")));
    }

    #[test]
    fn apply_defaults_fills_only_absent_keys() {
        let schema = orders();
        let mut values = Values::new();
        values.insert("amount".into(), Value::Int(10));
        schema.apply_defaults(&mut values);
        assert_eq!(values.get("status"), Some(&Value::from("pending")));
        assert!(!values.contains_key("customer"));
        assert!(schema.validate_values(&values).is_valid());
    }

    #[test]
    fn date_fields_require_parseable_dates() {
        assert!(FieldType::Date.check(&Value::from("2024-05-01T10:00:00Z")).is_ok());
        assert!(FieldType::Date.check(&Value::from("yesterday")).is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_value(FieldDefinition::relation("owner", "users")).unwrap();
        assert_eq!(json["type"], "relation");
        assert_eq!(json["relationTarget"], "users");
        assert!(json.get("defaultValue").is_none());
    }
}
