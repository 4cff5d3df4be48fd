//! Translation quality lint.
//!
//! Checks that a translated string keeps the format placeholders of its
//! source text (`{name}`, `{0}`, `%s`, `%1$d`, ...). Game code substitutes
//! these at runtime, so a dropped or renamed placeholder shows up as a
//! broken string in the client. Lint findings are warnings only.

use regex::Regex;
use std::sync::OnceLock;

/// Findings for a single catalog entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LintReport {
    pub warnings: Vec<String>,
}

impl LintReport {
    /// Check if the entry passed every lint
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Lint for format placeholders in catalog entries.
pub struct PlaceholderLint;

static BRACE_REGEX: OnceLock<Regex> = OnceLock::new();
static PRINTF_REGEX: OnceLock<Regex> = OnceLock::new();

impl PlaceholderLint {
    /// Compare placeholders between a source string and its translation.
    pub fn check(source: &str, translated: &str) -> LintReport {
        let mut report = LintReport::default();

        let orig_braces = Self::extract_brace_placeholders(source);
        let trans_braces = Self::extract_brace_placeholders(translated);
        if orig_braces != trans_braces {
            report.warnings.push(format!(
                "Placeholder mismatch: source has {:?}, translation has {:?}",
                orig_braces, trans_braces
            ));
        }

        let orig_printf = Self::extract_printf_placeholders(source);
        let trans_printf = Self::extract_printf_placeholders(translated);
        if orig_printf != trans_printf {
            report.warnings.push(format!(
                "Format specifier mismatch: source has {:?}, translation has {:?}",
                orig_printf, trans_printf
            ));
        }

        report
    }

    /// Extract `{name}` style placeholders, sorted so reordering is allowed
    fn extract_brace_placeholders(text: &str) -> Vec<String> {
        let regex =
            BRACE_REGEX.get_or_init(|| Regex::new(r"\{[A-Za-z0-9_]*\}").expect("static regex"));

        let mut found: Vec<String> = regex
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect();
        found.sort();
        found
    }

    /// Extract printf style specifiers, sorted so positional reordering is allowed
    fn extract_printf_placeholders(text: &str) -> Vec<String> {
        let regex = PRINTF_REGEX
            .get_or_init(|| Regex::new(r"%(?:\d+\$)?[sdif]").expect("static regex"));

        let mut found: Vec<String> = regex
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect();
        found.sort();
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_brace_placeholders() {
        let found = PlaceholderLint::extract_brace_placeholders("Deal {damage} to {target}");
        assert_eq!(found, vec!["{damage}", "{target}"]);
    }

    #[test]
    fn test_extract_printf_placeholders() {
        let found = PlaceholderLint::extract_printf_placeholders("%s has %d coins, %1$s");
        assert_eq!(found, vec!["%1$s", "%d", "%s"]);
    }

    #[test]
    fn test_check_clean_translation() {
        let report = PlaceholderLint::check("Collect {count} herbs", "Colete {count} ervas");
        assert!(report.is_clean());
    }

    #[test]
    fn test_check_allows_reordering() {
        let report = PlaceholderLint::check("{a} gives {b}", "{b} recebe de {a}");
        assert!(report.is_clean());
    }

    #[test]
    fn test_check_missing_placeholder() {
        let report = PlaceholderLint::check("Collect {count} herbs", "Colete ervas");
        assert!(!report.is_clean());
        assert!(report.warnings[0].contains("Placeholder mismatch"));
    }

    #[test]
    fn test_check_missing_format_specifier() {
        let report = PlaceholderLint::check("%d gold", "ouro");
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("Format specifier mismatch"));
    }

    #[test]
    fn test_check_plain_text() {
        assert!(PlaceholderLint::check("Iron Sword", "Espada de Ferro").is_clean());
    }
}
