//! Localization engine.
//!
//! Applies the [`LocalizationPolicy`] to domain objects for one language at a
//! time. Each invocation reads only the shared catalog and policy, so
//! languages can be localized in parallel without coordination.

use crate::domain::{DomainGraph, DomainObject, FieldValue};
use crate::i18n::{CoverageReport, LanguageCode, LocalizationPolicy, TranslationCatalog};
use std::collections::BTreeMap;
use tracing::debug;

/// A domain object with every localizable field substituted for one language.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalizedObject {
    pub language: LanguageCode,
    pub object: DomainObject,
}

/// All objects of a snapshot localized into one language.
#[derive(Debug, Clone)]
pub struct LocalizedGraph {
    pub language: LanguageCode,
    objects: BTreeMap<String, Vec<LocalizedObject>>,
    pub coverage: CoverageReport,
}

impl LocalizedGraph {
    pub fn record_types(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn objects_of(&self, record_type: &str) -> &[LocalizedObject] {
        self.objects.get(record_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All objects, by record type then id.
    pub fn iter(&self) -> impl Iterator<Item = &LocalizedObject> {
        self.objects.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.objects.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Catalog context for a field: `"{record_type}.{field}"`.
pub fn field_context(record_type: &str, field: &str) -> String {
    format!("{}.{}", record_type, field)
}

/// Localize one object, recording hits and misses in `coverage`.
///
/// Blank strings are left alone and not counted. Missing translations fall
/// back to the source text.
pub fn localize(
    object: &DomainObject,
    catalog: &TranslationCatalog,
    policy: &LocalizationPolicy,
    coverage: &mut CoverageReport,
) -> LocalizedObject {
    let mut localized = object.clone();

    for (name, value) in localized.fields.iter_mut() {
        if !policy.is_localizable(&object.record_type, name) {
            continue;
        }
        let context = field_context(&object.record_type, name);
        let mut translate = |text: &mut String| {
            if text.trim().is_empty() {
                return;
            }
            match catalog.lookup(&context, text) {
                Some(translated) => {
                    *text = translated.to_string();
                    coverage.record_hit();
                }
                None => coverage.record_miss(&object.record_type, &object.id, name, text),
            }
        };
        match value {
            FieldValue::Text(text) => translate(text),
            FieldValue::TextList(texts) => texts.iter_mut().for_each(translate),
            _ => {}
        }
    }

    LocalizedObject {
        language: catalog.language().clone(),
        object: localized,
    }
}

/// Localize a whole graph into the catalog's language.
pub fn localize_all(graph: &DomainGraph, catalog: &TranslationCatalog, policy: &LocalizationPolicy) -> LocalizedGraph {
    let language = catalog.language().clone();
    let mut coverage = CoverageReport::new(language.clone());
    let mut objects: BTreeMap<String, Vec<LocalizedObject>> = BTreeMap::new();

    for object in graph.iter() {
        let localized = localize(object, catalog, policy, &mut coverage);
        objects
            .entry(object.record_type.clone())
            .or_default()
            .push(localized);
    }

    debug!(
        "Localized {} objects into {} ({:.1}% coverage, {} missing)",
        graph.len(),
        language,
        coverage.coverage_percent,
        coverage.missing.len()
    );

    LocalizedGraph {
        language,
        objects,
        coverage,
    }
}
