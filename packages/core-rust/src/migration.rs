//! Migration planning and record transformation.
//!
//! [`plan`] diffs a collection's current fields against a desired field list
//! and produces an immutable [`MigrationPlan`]. [`MigrationPlan::apply`]
//! lazily transforms a record stream under the plan's [`ConflictPolicy`].
//! Neither touches storage: the server crate drives the gateway and commits
//! the schema.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coerce::{coerce, CoercionError};
use crate::record::Record;
use crate::schema::{validate_fields, CollectionSchema, FieldDefinition, FieldType, SchemaError};
use crate::types::{Value, Values};

/// What to do when a `retypeField` step cannot coerce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictPolicy {
    /// Abort the whole migration; the schema is left untouched.
    Fail,
    /// Replace the value with the field's default (or null).
    Coerce,
    /// Remove the field from the offending record only.
    DropInvalid,
}

/// A single record-affecting schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "step")]
pub enum MigrationStep {
    AddField { field: FieldDefinition },
    DropField { name: String },
    RetypeField {
        name: String,
        from: FieldType,
        to: FieldType,
        /// Replacement under [`ConflictPolicy::Coerce`].
        fallback: Option<Value>,
    },
    RenameField { from: String, to: String },
}

impl MigrationStep {
    /// Name of the field the step writes to.
    #[must_use]
    pub fn field_name(&self) -> &str {
        match self {
            Self::AddField { field } => &field.name,
            Self::DropField { name } | Self::RetypeField { name, .. } => name,
            Self::RenameField { to, .. } => to,
        }
    }
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddField { field } => write!(f, "addField({})", field.name),
            Self::DropField { name } => write!(f, "dropField({name})"),
            Self::RetypeField { name, from, to, .. } => {
                write!(f, "retypeField({name}: {from} -> {to})")
            }
            Self::RenameField { from, to } => write!(f, "renameField({from} -> {to})"),
        }
    }
}

/// Planned transition of one collection from `from_version` to `to_version`.
///
/// Computed once and never mutated while applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub slug: String,
    pub from_version: u64,
    pub to_version: u64,
    /// Applied to every record in this order.
    pub steps: Vec<MigrationStep>,
    pub conflict_policy: ConflictPolicy,
    /// Field list installed when the plan commits.
    pub target_fields: Vec<FieldDefinition>,
}

/// Why a single record failed a plan under [`ConflictPolicy::Fail`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub record_id: String,
    /// Display form of the failing step.
    pub step: String,
    pub error: CoercionError,
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record '{}' failed {}: {}", self.record_id, self.step, self.error)
    }
}

/// Per-record outcome of [`MigrationPlan::transform`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub record: Record,
    /// Whether `values` differ from the input.
    pub changed: bool,
    /// Fields replaced with their fallback under [`ConflictPolicy::Coerce`].
    pub coerced_to_default: usize,
    /// Fields removed under [`ConflictPolicy::DropInvalid`].
    pub dropped_invalid: usize,
}

/// Diffs `current` against `desired` by field name.
///
/// Shared names with a different type become `retypeField`, names only in
/// `current` become `dropField`, names only in `desired` become `addField`.
/// Reordering alone yields no steps; the plan still targets the next version.
///
/// # Errors
///
/// Returns [`SchemaError`] if `desired` is invalid, adds a required field
/// without a default, or retypes a required field without a default under
/// [`ConflictPolicy::Coerce`].
pub fn plan(
    current: &CollectionSchema,
    desired: Vec<FieldDefinition>,
    policy: ConflictPolicy,
) -> Result<MigrationPlan, SchemaError> {
    plan_with_renames(current, desired, &[], policy)
}

/// Like [`plan`], treating each `(old, new)` pair in `renames` as a rename
/// rather than a drop plus an add.
///
/// # Errors
///
/// Returns [`SchemaError`] for an invalid `desired` list or a rename whose
/// source is absent from `current` or whose target is absent from `desired`.
pub fn plan_with_renames(
    current: &CollectionSchema,
    desired: Vec<FieldDefinition>,
    renames: &[(String, String)],
    policy: ConflictPolicy,
) -> Result<MigrationPlan, SchemaError> {
    validate_fields(&desired)?;

    let desired_by_name: HashMap<&str, &FieldDefinition> =
        desired.iter().map(|f| (f.name.as_str(), f)).collect();

    // old name -> new name
    let mut renamed: HashMap<&str, &str> = HashMap::new();
    let mut rename_targets: HashSet<&str> = HashSet::new();
    for (from, to) in renames {
        let invalid = |reason: &str| SchemaError::InvalidRename {
            from: from.clone(),
            to: to.clone(),
            reason: reason.to_string(),
        };
        if current.field(from).is_none() {
            return Err(invalid("source field does not exist"));
        }
        if !desired_by_name.contains_key(to.as_str()) {
            return Err(invalid("target field is not in the desired schema"));
        }
        // Targets must be fresh names so renames stay independent of each
        // other and re-applying them is a no-op.
        if from != to && current.field(to).is_some() {
            return Err(invalid("target field already exists"));
        }
        if renamed.insert(from.as_str(), to.as_str()).is_some()
            || !rename_targets.insert(to.as_str())
        {
            return Err(invalid("field is renamed twice"));
        }
    }

    let mut renames_out = Vec::new();
    let mut drops = Vec::new();
    let mut retypes = Vec::new();
    let mut adds = Vec::new();

    for old in &current.fields {
        let name = renamed
            .get(old.name.as_str())
            .copied()
            .unwrap_or(old.name.as_str());
        if name != old.name {
            renames_out.push(MigrationStep::RenameField {
                from: old.name.clone(),
                to: name.to_string(),
            });
        }
        match desired_by_name.get(name) {
            Some(new) if new.field_type != old.field_type => {
                if policy == ConflictPolicy::Coerce && new.required && new.default_value.is_none() {
                    return Err(SchemaError::RequiredWithoutFallback {
                        name: new.name.clone(),
                    });
                }
                retypes.push(MigrationStep::RetypeField {
                    name: new.name.clone(),
                    from: old.field_type,
                    to: new.field_type,
                    fallback: new.default_value.clone(),
                });
            }
            Some(_) => {}
            None => drops.push(MigrationStep::DropField {
                name: old.name.clone(),
            }),
        }
    }

    for new in &desired {
        let kept = current.field(&new.name).is_some() && !renamed.contains_key(new.name.as_str());
        if kept || rename_targets.contains(new.name.as_str()) {
            continue;
        }
        if new.required && new.default_value.is_none() {
            return Err(SchemaError::RequiredWithoutDefault {
                name: new.name.clone(),
            });
        }
        adds.push(MigrationStep::AddField { field: new.clone() });
    }

    let mut steps = renames_out;
    steps.append(&mut drops);
    steps.append(&mut retypes);
    steps.append(&mut adds);

    tracing::debug!(
        slug = %current.slug,
        from_version = current.version,
        steps = steps.len(),
        "planned migration"
    );

    Ok(MigrationPlan {
        slug: current.slug.clone(),
        from_version: current.version,
        to_version: current.version + 1,
        steps,
        conflict_policy: policy,
        target_fields: desired,
    })
}

impl MigrationPlan {
    /// Whether the plan leaves every record as it is.
    #[must_use]
    pub fn is_cosmetic(&self) -> bool {
        self.steps.is_empty()
    }

    /// Schema installed on commit, built from `current`.
    #[must_use]
    pub fn target_schema(&self, current: &CollectionSchema) -> CollectionSchema {
        CollectionSchema {
            slug: current.slug.clone(),
            display_name: current.display_name.clone(),
            fields: self.target_fields.clone(),
            version: self.to_version,
        }
    }

    /// Applies every step, in order, to one record.
    ///
    /// Re-applying a plan to its own output is a no-op.
    ///
    /// # Errors
    ///
    /// Under [`ConflictPolicy::Fail`], returns the first coercion failure.
    pub fn transform(&self, record: Record) -> Result<Transformed, RecordFailure> {
        let mut values: Values = record.values.clone();
        let mut coerced_to_default = 0;
        let mut dropped_invalid = 0;

        for step in &self.steps {
            match step {
                MigrationStep::AddField { field } => {
                    if !values.contains_key(&field.name) {
                        values.insert(field.name.clone(), field.fill_value());
                    }
                }
                MigrationStep::DropField { name } => {
                    values.remove(name);
                }
                MigrationStep::RenameField { from, to } => {
                    if let Some(value) = values.remove(from) {
                        values.insert(to.clone(), value);
                    }
                }
                MigrationStep::RetypeField { name, to, fallback, .. } => {
                    let Some(value) = values.get(name) else {
                        continue;
                    };
                    match coerce(value, *to) {
                        Ok(converted) => {
                            values.insert(name.clone(), converted);
                        }
                        Err(error) => match self.conflict_policy {
                            ConflictPolicy::Fail => {
                                return Err(RecordFailure {
                                    record_id: record.id.clone(),
                                    step: step.to_string(),
                                    error,
                                });
                            }
                            ConflictPolicy::Coerce => {
                                let replacement =
                                    fallback.clone().unwrap_or(Value::Null);
                                values.insert(name.clone(), replacement);
                                coerced_to_default += 1;
                            }
                            ConflictPolicy::DropInvalid => {
                                values.remove(name);
                                dropped_invalid += 1;
                            }
                        },
                    }
                }
            }
        }

        let changed = values != record.values;
        Ok(Transformed {
            record: Record { values, ..record },
            changed,
            coerced_to_default,
            dropped_invalid,
        })
    }

    /// Lazily transforms a record stream.
    ///
    /// The stream ends right after the first failure; it can be restarted from
    /// the source but not resumed.
    pub fn apply<'a, I>(&'a self, records: I) -> Apply<'a, I::IntoIter>
    where
        I: IntoIterator<Item = Record>,
    {
        Apply {
            plan: self,
            source: records.into_iter(),
            failed: false,
        }
    }
}

/// Iterator returned by [`MigrationPlan::apply`].
pub struct Apply<'a, I> {
    plan: &'a MigrationPlan,
    source: I,
    failed: bool,
}

impl<I> Iterator for Apply<'_, I>
where
    I: Iterator<Item = Record>,
{
    type Item = Result<Transformed, RecordFailure>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let record = self.source.next()?;
        let result = self.plan.transform(record);
        self.failed = result.is_err();
        Some(result)
    }
}

impl<I> std::iter::FusedIterator for Apply<'_, I> where I: Iterator<Item = Record> {}
