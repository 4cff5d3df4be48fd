//! Language type: validated, normalized language tag.
//!
//! Catalogs arrive from the record store named by whatever tag the author
//! used (`pt_BR`, `pt-br`, `PT-BR`). `LanguageCode` normalizes them so that
//! artifact keys stay stable across publishes.

use anyhow::{bail, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

static TAG_REGEX: OnceLock<Regex> = OnceLock::new();

/// A validated language tag (e.g., "en", "pt-BR", "zh-Hant").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LanguageCode(String);

impl LanguageCode {
    /// Parse and normalize a language tag.
    ///
    /// The primary subtag is lowercased, two-letter and three-digit region
    /// subtags are uppercased, four-letter script subtags are title-cased and
    /// `_` separators become `-`.
    ///
    /// # Example
    /// ```ignore
    /// let code = LanguageCode::parse("pt_br")?;
    /// assert_eq!(code.as_str(), "pt-BR");
    /// ```
    pub fn parse(code: &str) -> Result<LanguageCode> {
        let code = code.trim();
        let regex = TAG_REGEX.get_or_init(|| {
            Regex::new(r"^[A-Za-z]{2,3}(?:[-_][A-Za-z0-9]{2,8})*$").expect("static regex")
        });
        if !regex.is_match(code) {
            bail!("Invalid language code: '{}'", code);
        }

        let normalized = code
            .split(['-', '_'])
            .enumerate()
            .map(|(index, part)| normalize_subtag(index, part))
            .collect::<Vec<_>>()
            .join("-");

        Ok(LanguageCode(normalized))
    }

    /// Get the normalized tag.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Primary language subtag (e.g., "pt" for "pt-BR").
    pub fn primary(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }
}

fn normalize_subtag(index: usize, part: &str) -> String {
    if index == 0 {
        return part.to_ascii_lowercase();
    }
    let is_alpha = part.chars().all(|c| c.is_ascii_alphabetic());
    let is_digit = part.chars().all(|c| c.is_ascii_digit());
    match part.len() {
        2 if is_alpha => part.to_ascii_uppercase(),
        3 if is_digit => part.to_string(),
        4 if is_alpha => {
            let lower = part.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => lower,
            }
        }
        _ => part.to_ascii_lowercase(),
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LanguageCode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        LanguageCode::parse(s)
    }
}

impl TryFrom<String> for LanguageCode {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        LanguageCode::parse(&value)
    }
}

impl From<LanguageCode> for String {
    fn from(code: LanguageCode) -> Self {
        code.0
    }
}
