//! Localization coverage reporting.
//!
//! One report per language per publish. Missing translations never fail a
//! publish; they degrade to source text and are listed here so translators
//! know what to fill in.

use crate::i18n::LanguageCode;
use serde::Serialize;

/// A localizable string that had no catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct MissingTranslation {
    pub record_type: String,
    pub id: String,
    pub field: String,
    pub source: String,
}

/// Translation coverage for one language.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    pub language: LanguageCode,

    /// Non-blank strings in localizable fields
    pub localizable_strings: usize,

    /// Strings replaced by a catalog entry
    pub translated: usize,

    /// Coverage as a percentage (0-100); 100 when nothing needed translating
    pub coverage_percent: f64,

    /// Strings left in source text, sorted
    pub missing: Vec<MissingTranslation>,
}

impl CoverageReport {
    pub fn new(language: LanguageCode) -> Self {
        Self {
            language,
            localizable_strings: 0,
            translated: 0,
            coverage_percent: 100.0,
            missing: Vec::new(),
        }
    }

    /// Record a string that was translated.
    pub fn record_hit(&mut self) {
        self.localizable_strings += 1;
        self.translated += 1;
        self.update_percent();
    }

    /// Record a string that stayed in source text.
    pub fn record_miss(&mut self, record_type: &str, id: &str, field: &str, source: &str) {
        self.localizable_strings += 1;
        self.missing.push(MissingTranslation {
            record_type: record_type.to_string(),
            id: id.to_string(),
            field: field.to_string(),
            source: source.to_string(),
        });
        self.update_percent();
    }

    /// Fold another partial report for the same language into this one.
    pub fn merge(&mut self, other: CoverageReport) {
        self.localizable_strings += other.localizable_strings;
        self.translated += other.translated;
        self.missing.extend(other.missing);
        self.missing.sort();
        self.update_percent();
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    fn update_percent(&mut self) {
        self.coverage_percent = if self.localizable_strings > 0 {
            (self.translated as f64 / self.localizable_strings as f64) * 100.0
        } else {
            100.0
        };
    }
}
