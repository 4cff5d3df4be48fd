//! Snapshot validation.
//!
//! Runs before any transformation work. Both tiers run over the whole
//! snapshot and every violation is collected, so authors can fix a broken
//! snapshot in one pass:
//!
//! - Structural: known record type, unique non-empty id, required fields,
//!   value types, enum membership, numeric bounds, no undeclared fields
//! - Referential: every reference resolves to a record of the target type
//!   within the same snapshot

use crate::records::{FieldKind, FieldSpec, RawRecord, SchemaRegistry, Snapshot};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use tracing::{info, warn};

/// A single problem found in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Violation {
    pub record_type: String,
    pub id: String,
    /// `None` when the problem concerns the record as a whole
    pub field: Option<String>,
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{} '{}' field '{}': {}", self.record_type, self.id, field, self.reason),
            None => write!(f, "{} '{}': {}", self.record_type, self.id, self.reason),
        }
    }
}

/// Every violation found in a snapshot, sorted by record type, id and field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Violations for one record.
    pub fn for_record<'a>(&'a self, record_type: &'a str, id: &'a str) -> impl Iterator<Item = &'a Violation> {
        self.violations
            .iter()
            .filter(move |v| v.record_type == record_type && v.id == id)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} violation(s):", self.violations.len())?;
        for violation in &self.violations {
            writeln!(f, "  - {}", violation)?;
        }
        Ok(())
    }
}

/// A snapshot that passed validation. Only [`validate`] constructs one.
#[derive(Debug, Clone)]
pub struct ValidatedSnapshot {
    snapshot: Snapshot,
}

impl ValidatedSnapshot {
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn into_inner(self) -> Snapshot {
        self.snapshot
    }

    /// Skip validation. Used by tests that exercise builder invariants.
    #[cfg(test)]
    pub(crate) fn unchecked(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }
}

struct Collector<'a> {
    record: &'a RawRecord,
    violations: &'a mut Vec<Violation>,
}

impl Collector<'_> {
    fn push(&mut self, field: Option<&str>, reason: String) {
        self.violations.push(Violation {
            record_type: self.record.record_type.clone(),
            id: self.record.id.clone(),
            field: field.map(str::to_string),
            reason,
        });
    }
}

/// Validate a snapshot against the registered schemas.
///
/// Returns the full report on any violation; a partially valid snapshot is
/// never passed on.
pub fn validate(snapshot: Snapshot, schemas: &SchemaRegistry) -> Result<ValidatedSnapshot, ValidationReport> {
    let mut violations = Vec::new();

    for record_type in snapshot.record_types() {
        let schema = schemas.get(record_type);
        let mut seen_ids = HashSet::new();

        for record in snapshot.records_of(record_type) {
            let mut collector = Collector {
                record,
                violations: &mut violations,
            };

            let Some(schema) = schema else {
                collector.push(None, format!("unknown record type '{}'", record_type));
                continue;
            };

            if record.id.trim().is_empty() {
                collector.push(None, "id must not be empty".to_string());
            }
            if !seen_ids.insert(record.id.as_str()) {
                collector.push(None, "duplicate id".to_string());
            }

            for spec in &schema.fields {
                match record.fields.get(&spec.name) {
                    None | Some(Value::Null) => {
                        if spec.required {
                            collector.push(Some(&spec.name), "required field is missing".to_string());
                        }
                    }
                    Some(value) => check_value(&mut collector, spec, value, &snapshot),
                }
            }

            for name in record.fields.keys() {
                if schema.field(name).is_none() {
                    collector.push(Some(name), "field is not declared in the schema".to_string());
                }
            }
        }
    }

    if violations.is_empty() {
        info!("Snapshot {} passed validation ({} records)", snapshot.branch, snapshot.len());
        return Ok(ValidatedSnapshot { snapshot });
    }

    violations.sort();
    warn!(
        "Snapshot {} failed validation with {} violation(s)",
        snapshot.branch,
        violations.len()
    );
    Err(ValidationReport { violations })
}

fn check_value(collector: &mut Collector<'_>, spec: &FieldSpec, value: &Value, snapshot: &Snapshot) {
    let field = Some(spec.name.as_str());
    match &spec.kind {
        FieldKind::Text => {
            if !value.is_string() {
                collector.push(field, format!("expected text, got {}", type_name(value)));
            }
        }
        FieldKind::TextList => match value.as_array() {
            Some(items) if items.iter().all(Value::is_string) => {}
            Some(_) => collector.push(field, "expected a list of text values".to_string()),
            None => collector.push(field, format!("expected a list of text, got {}", type_name(value))),
        },
        FieldKind::Integer { min, max } => match value.as_i64() {
            Some(n) => {
                if let Some(min) = min.filter(|min| n < *min) {
                    collector.push(field, format!("{} is below the minimum {}", n, min));
                }
                if let Some(max) = max.filter(|max| n > *max) {
                    collector.push(field, format!("{} is above the maximum {}", n, max));
                }
            }
            None => collector.push(field, format!("expected an integer, got {}", type_name(value))),
        },
        FieldKind::Float { min } => match value.as_f64() {
            Some(n) => {
                if let Some(min) = min.filter(|min| n < *min) {
                    collector.push(field, format!("{} is below the minimum {}", n, min));
                }
            }
            None => collector.push(field, format!("expected a number, got {}", type_name(value))),
        },
        FieldKind::Bool => {
            if !value.is_boolean() {
                collector.push(field, format!("expected a boolean, got {}", type_name(value)));
            }
        }
        FieldKind::Enum { allowed } => match value.as_str() {
            Some(s) if allowed.iter().any(|a| a == s) => {}
            Some(s) => collector.push(
                field,
                format!("'{}' is not one of [{}]", s, allowed.join(", ")),
            ),
            None => collector.push(field, format!("expected one of [{}], got {}", allowed.join(", "), type_name(value))),
        },
        FieldKind::Reference { target } => match value.as_str() {
            Some(id) => check_reference(collector, spec, target, id, snapshot),
            None => collector.push(field, format!("expected a {} id, got {}", target, type_name(value))),
        },
        FieldKind::ReferenceList { target } => match value.as_array() {
            Some(items) => {
                for item in items {
                    match item.as_str() {
                        Some(id) => check_reference(collector, spec, target, id, snapshot),
                        None => collector.push(
                            field,
                            format!("expected a {} id, got {}", target, type_name(item)),
                        ),
                    }
                }
            }
            None => collector.push(field, format!("expected a list of {} ids, got {}", target, type_name(value))),
        },
    }
}

fn check_reference(collector: &mut Collector<'_>, spec: &FieldSpec, target: &str, id: &str, snapshot: &Snapshot) {
    if !snapshot.contains(target, id) {
        collector.push(
            Some(&spec.name),
            format!("references missing {} '{}'", target, id),
        );
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "an integer",
        Value::Number(_) => "a number",
        Value::String(_) => "text",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
