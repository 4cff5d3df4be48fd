//! Localization policy: which `(record_type, field)` pairs get translated.
//!
//! The policy is enumerated once from the schema registry, at registration
//! time, from the `localizable` marker on text fields. Lookups are total and
//! fail safe: anything the policy does not list is left untouched.

use crate::records::SchemaRegistry;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Declarative set of localizable fields, keyed by record type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalizationPolicy {
    fields: BTreeMap<String, BTreeSet<String>>,
}

impl LocalizationPolicy {
    /// Derive the policy from every registered schema.
    ///
    /// Markers on non-text fields are ignored with a warning; numbers,
    /// references and enums are never translated.
    pub fn from_schemas(schemas: &SchemaRegistry) -> Self {
        let mut policy = LocalizationPolicy::default();
        for schema in schemas.iter() {
            for field in schema.fields.iter().filter(|f| f.localizable) {
                if !field.kind.is_textual() {
                    warn!(
                        "Ignoring localizable marker on {}.{}: only text fields can be localized",
                        schema.record_type, field.name
                    );
                    continue;
                }
                policy.allow(&schema.record_type, &field.name);
            }
        }
        policy
    }

    /// Mark a single field as localizable.
    pub fn allow(&mut self, record_type: &str, field: &str) {
        self.fields
            .entry(record_type.to_string())
            .or_default()
            .insert(field.to_string());
    }

    /// Whether a field must be translated. Unknown pairs are not.
    pub fn is_localizable(&self, record_type: &str, field: &str) -> bool {
        self.fields
            .get(record_type)
            .is_some_and(|fields| fields.contains(field))
    }

    /// Localizable fields of one record type, sorted.
    pub fn localizable_fields<'a>(&'a self, record_type: &str) -> impl Iterator<Item = &'a str> {
        self.fields
            .get(record_type)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Number of localizable `(record_type, field)` pairs.
    pub fn len(&self) -> usize {
        self.fields.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
