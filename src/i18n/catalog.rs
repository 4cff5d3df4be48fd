//! Translation catalogs and the catalog loader.
//!
//! Catalogs arrive as raw bytes from the record store, either as gettext PO
//! files or as flat JSON objects. Both are parsed into a [`TranslationCatalog`]
//! keyed by source text, optionally qualified by a context string.
//!
//! The context convention is `"{record_type}.{field}"` (e.g. `item.name`), so
//! the same English phrase can be translated differently per field. JSON
//! catalogs express a context by prefixing the key with the context and the
//! gettext EOT separator (`"item.name\u0004Iron Sword"`).

use crate::error::CatalogParseError;
use crate::i18n::{LanguageCode, PlaceholderLint};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Separator between context and source text in JSON catalog keys.
pub const CONTEXT_SEPARATOR: char = '\u{4}';

/// A catalog payload as supplied by the record store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawCatalog {
    /// Language identifier as named by the store (not yet normalized)
    pub language: String,

    /// Catalog file contents
    #[serde(with = "content_as_string")]
    pub content: Vec<u8>,
}

mod content_as_string {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(String::into_bytes)
    }
}

impl RawCatalog {
    pub fn new(language: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            language: language.into(),
            content: content.into(),
        }
    }
}

/// Per-language mapping from source text to translated text.
///
/// Immutable once loaded; shared read-only across localization workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationCatalog {
    language: LanguageCode,

    /// Unqualified entries: source -> translation
    entries: HashMap<String, String>,

    /// Context-qualified entries: context -> source -> translation
    contextual: HashMap<String, HashMap<String, String>>,

    /// Number of entries that failed the placeholder lint
    lint_warnings: usize,
}

impl TranslationCatalog {
    /// An empty catalog, used for the pass-through source language.
    pub fn empty(language: LanguageCode) -> Self {
        Self {
            language,
            entries: HashMap::new(),
            contextual: HashMap::new(),
            lint_warnings: 0,
        }
    }

    /// Add an entry, returning the catalog.
    ///
    /// Blank sources and empty translations are ignored so that they pass
    /// through localization untouched.
    pub fn with_entry(mut self, context: Option<&str>, source: &str, translated: &str) -> Self {
        self.insert(context.map(str::to_string), source.to_string(), translated.to_string());
        self
    }

    fn insert(&mut self, context: Option<String>, source: String, translated: String) -> bool {
        if source.trim().is_empty() || translated.is_empty() {
            return false;
        }
        let previous = match context {
            Some(context) => self
                .contextual
                .entry(context)
                .or_default()
                .insert(source, translated),
            None => self.entries.insert(source, translated),
        };
        previous.is_some()
    }

    pub fn language(&self) -> &LanguageCode {
        &self.language
    }

    /// Total number of entries (qualified and unqualified).
    pub fn len(&self) -> usize {
        self.entries.len() + self.contextual.values().map(HashMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lint_warnings(&self) -> usize {
        self.lint_warnings
    }

    /// Look up a translation, preferring the context-qualified entry.
    pub fn lookup(&self, context: &str, source: &str) -> Option<&str> {
        self.contextual
            .get(context)
            .and_then(|entries| entries.get(source))
            .or_else(|| self.entries.get(source))
            .map(String::as_str)
    }
}

/// Result of loading every catalog supplied for a publish.
#[derive(Debug, Default)]
pub struct LoadedCatalogs {
    pub catalogs: Vec<TranslationCatalog>,
    pub failures: Vec<CatalogParseError>,
}

/// Load a single catalog, detecting PO or JSON syntax.
pub fn load_catalog(raw: &RawCatalog) -> Result<TranslationCatalog, CatalogParseError> {
    let fail = |line: usize, reason: String| CatalogParseError {
        language: raw.language.clone(),
        line,
        reason,
    };

    let language = LanguageCode::parse(&raw.language).map_err(|e| fail(0, e.to_string()))?;

    let text = std::str::from_utf8(&raw.content).map_err(|e| {
        let valid = &raw.content[..e.valid_up_to()];
        let line = valid.iter().filter(|b| **b == b'\n').count() + 1;
        fail(line, "invalid UTF-8".to_string())
    })?;

    let parsed = if text.trim_start().starts_with('{') {
        parse_json(text)
    } else {
        parse_po(text)
    }
    .map_err(|(line, reason)| fail(line, reason))?;

    let mut catalog = TranslationCatalog::empty(language);
    for entry in parsed {
        let lint = PlaceholderLint::check(&entry.source, &entry.translated);
        if !lint.is_clean() {
            catalog.lint_warnings += 1;
            warn!(
                "Catalog {} entry {:?}: {}",
                catalog.language,
                entry.source,
                lint.warnings.join("; ")
            );
        }
        let context = entry.context.clone();
        let source = entry.source.clone();
        if catalog.insert(entry.context, entry.source, entry.translated) {
            warn!(
                "Catalog {} has duplicate entry for {:?} (context {:?}), last one wins",
                catalog.language, source, context
            );
        }
    }

    debug!(
        "Loaded catalog {} with {} entries",
        catalog.language,
        catalog.len()
    );
    Ok(catalog)
}

/// Load every catalog, collecting failures instead of stopping at the first.
///
/// Two payloads that normalize to the same language are ambiguous; the
/// second one is reported as a failure.
pub fn load_catalogs(raws: &[RawCatalog]) -> LoadedCatalogs {
    let mut loaded = LoadedCatalogs::default();

    for raw in raws {
        match load_catalog(raw) {
            Ok(catalog) => {
                if loaded
                    .catalogs
                    .iter()
                    .any(|existing| existing.language() == catalog.language())
                {
                    loaded.failures.push(CatalogParseError {
                        language: raw.language.clone(),
                        line: 0,
                        reason: format!("duplicate catalog for language {}", catalog.language()),
                    });
                    continue;
                }
                loaded.catalogs.push(catalog);
            }
            Err(e) => {
                warn!("Skipping catalog: {}", e);
                loaded.failures.push(e);
            }
        }
    }

    loaded.catalogs.sort_by(|a, b| a.language().cmp(b.language()));
    loaded
}

// ==================== Parsers ====================

#[derive(Debug)]
struct ParsedEntry {
    context: Option<String>,
    source: String,
    translated: String,
}

type ParseResult<T> = Result<T, (usize, String)>;

fn parse_json(text: &str) -> ParseResult<Vec<ParsedEntry>> {
    let object: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(text).map_err(|e| (e.line(), e.to_string()))?;

    let mut entries = Vec::with_capacity(object.len());
    for (key, value) in object {
        let translated = match value {
            serde_json::Value::String(s) => s,
            other => {
                return Err((
                    0,
                    format!("value for {:?} must be a string, got {}", key, other),
                ))
            }
        };
        let (context, source) = match key.split_once(CONTEXT_SEPARATOR) {
            Some((context, source)) => (Some(context.to_string()), source.to_string()),
            None => (None, key),
        };
        entries.push(ParsedEntry {
            context,
            source,
            translated,
        });
    }
    Ok(entries)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoField {
    Context,
    Id,
    IdPlural,
    Str,
    /// Plural forms beyond the first are parsed but not used
    IgnoredPlural,
}

#[derive(Debug, Default)]
struct PoEntry {
    start_line: usize,
    context: Option<String>,
    id: Option<String>,
    plural: bool,
    translated: Option<String>,
    fuzzy: bool,
}

impl PoEntry {
    fn is_started(&self) -> bool {
        self.context.is_some() || self.id.is_some()
    }
}

fn parse_po(text: &str) -> ParseResult<Vec<ParsedEntry>> {
    let mut entries = Vec::new();
    let mut current = PoEntry::default();
    let mut field: Option<PoField> = None;
    let mut pending_fuzzy = false;

    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw_line.trim();

        if line.is_empty() {
            flush_po_entry(&mut current, &mut entries)?;
            field = None;
            continue;
        }

        if let Some(flags) = line.strip_prefix("#,") {
            if current.translated.is_some() {
                flush_po_entry(&mut current, &mut entries)?;
                field = None;
            }
            if flags.split(',').any(|flag| flag.trim() == "fuzzy") {
                pending_fuzzy = true;
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix("msgctxt") {
            if current.is_started() {
                flush_po_entry(&mut current, &mut entries)?;
            }
            start_po_entry(&mut current, line_no, &mut pending_fuzzy);
            current.context = Some(parse_quoted(rest, line_no)?);
            field = Some(PoField::Context);
        } else if let Some(rest) = line.strip_prefix("msgid_plural") {
            if current.id.is_none() {
                return Err((line_no, "msgid_plural without msgid".to_string()));
            }
            parse_quoted(rest, line_no)?;
            current.plural = true;
            field = Some(PoField::IdPlural);
        } else if let Some(rest) = line.strip_prefix("msgid") {
            if current.translated.is_some() || current.id.is_some() {
                flush_po_entry(&mut current, &mut entries)?;
            }
            if !current.is_started() {
                start_po_entry(&mut current, line_no, &mut pending_fuzzy);
            }
            current.id = Some(parse_quoted(rest, line_no)?);
            field = Some(PoField::Id);
        } else if let Some(rest) = line.strip_prefix("msgstr[") {
            if !current.plural {
                return Err((line_no, "msgstr[n] without msgid_plural".to_string()));
            }
            let (index, rest) = rest
                .split_once(']')
                .ok_or((line_no, "unterminated plural index".to_string()))?;
            let index: usize = index
                .trim()
                .parse()
                .map_err(|_| (line_no, format!("invalid plural index {:?}", index)))?;
            let value = parse_quoted(rest, line_no)?;
            if index == 0 {
                current.translated = Some(value);
                field = Some(PoField::Str);
            } else {
                field = Some(PoField::IgnoredPlural);
            }
        } else if let Some(rest) = line.strip_prefix("msgstr") {
            if current.id.is_none() {
                return Err((line_no, "msgstr without msgid".to_string()));
            }
            if current.plural {
                return Err((line_no, "plural entry requires msgstr[n]".to_string()));
            }
            current.translated = Some(parse_quoted(rest, line_no)?);
            field = Some(PoField::Str);
        } else if line.starts_with('"') {
            let value = parse_quoted(line, line_no)?;
            let target = match field {
                Some(PoField::Context) => current.context.as_mut(),
                Some(PoField::Id) => current.id.as_mut(),
                Some(PoField::Str) => current.translated.as_mut(),
                Some(PoField::IdPlural) | Some(PoField::IgnoredPlural) => continue,
                None => None,
            };
            match target {
                Some(target) => target.push_str(&value),
                None => return Err((line_no, "string continuation without keyword".to_string())),
            }
        } else {
            return Err((line_no, format!("unexpected line {:?}", line)));
        }
    }

    flush_po_entry(&mut current, &mut entries)?;
    Ok(entries)
}

fn start_po_entry(current: &mut PoEntry, line_no: usize, pending_fuzzy: &mut bool) {
    current.start_line = line_no;
    current.fuzzy = std::mem::take(pending_fuzzy);
}

fn flush_po_entry(current: &mut PoEntry, entries: &mut Vec<ParsedEntry>) -> ParseResult<()> {
    let entry = std::mem::take(current);
    if !entry.is_started() {
        return Ok(());
    }
    let Some(source) = entry.id else {
        return Err((entry.start_line, "msgctxt without msgid".to_string()));
    };
    let Some(translated) = entry.translated else {
        return Err((entry.start_line, "msgid without msgstr".to_string()));
    };
    // The header entry has an empty msgid; fuzzy and untranslated entries are
    // not trusted.
    if entry.fuzzy || source.trim().is_empty() || translated.is_empty() {
        return Ok(());
    }
    entries.push(ParsedEntry {
        context: entry.context,
        source,
        translated,
    });
    Ok(())
}

/// Parse a PO quoted string (`"..."`) with C-style escapes.
fn parse_quoted(rest: &str, line_no: usize) -> ParseResult<String> {
    let rest = rest.trim();
    let inner = rest
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .filter(|_| rest.len() >= 2)
        .ok_or((line_no, format!("expected quoted string, got {:?}", rest)))?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => return Err((line_no, format!("invalid escape \\{}", other))),
                None => return Err((line_no, "dangling escape".to_string())),
            },
            '"' => return Err((line_no, "unescaped quote inside string".to_string())),
            c => out.push(c),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn po(language: &str, content: &str) -> RawCatalog {
        RawCatalog::new(language, content)
    }

    // ==================== PO Parsing Tests ====================

    #[test]
    fn test_load_po_basic_entries() {
        let raw = po(
            "pt-BR",
            r#"
msgid ""
msgstr ""
"Content-Type: text/plain; charset=UTF-8\n"

msgid "Iron Sword"
msgstr "Espada de Ferro"

msgid "Healing Potion"
msgstr "Poção de Cura"
"#,
        );
        let catalog = load_catalog(&raw).unwrap();
        assert_eq!(catalog.language().as_str(), "pt-BR");
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.lookup("item.name", "Iron Sword"), Some("Espada de Ferro"));
        assert_eq!(catalog.lookup("item.name", "Healing Potion"), Some("Poção de Cura"));
    }

    #[test]
    fn test_load_po_header_is_skipped() {
        let raw = po("de", "msgid \"\"\nmsgstr \"Language: de\\n\"\n");
        let catalog = load_catalog(&raw).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_load_po_multiline_and_escapes() {
        let raw = po(
            "fr",
            "msgid \"\"\n\"Welcome, \\\"traveler\\\".\\n\"\n\"Rest here.\"\nmsgstr \"Bienvenue,\\tvoyageur.\"\n",
        );
        let catalog = load_catalog(&raw).unwrap();
        assert_eq!(
            catalog.lookup("npc.greeting", "Welcome, \"traveler\".\nRest here."),
            Some("Bienvenue,\tvoyageur.")
        );
    }

    #[test]
    fn test_load_po_context_qualified() {
        let raw = po(
            "pt",
            r#"
msgctxt "item.name"
msgid "Light"
msgstr "Leve"

msgctxt "location.name"
msgid "Light"
msgstr "Luz"

msgid "Light"
msgstr "Claro"
"#,
        );
        let catalog = load_catalog(&raw).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.lookup("item.name", "Light"), Some("Leve"));
        assert_eq!(catalog.lookup("location.name", "Light"), Some("Luz"));
        assert_eq!(catalog.lookup("npc.name", "Light"), Some("Claro"));
    }

    #[test]
    fn test_load_po_skips_fuzzy_and_untranslated() {
        let raw = po(
            "es",
            r#"
#, fuzzy
msgid "Iron Sword"
msgstr "Espada de Hierro?"

# translator comment
msgid "Shield"
msgstr ""

msgid "Bow"
msgstr "Arco"
"#,
        );
        let catalog = load_catalog(&raw).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.lookup("item.name", "Iron Sword"), None);
        assert_eq!(catalog.lookup("item.name", "Shield"), None);
        assert_eq!(catalog.lookup("item.name", "Bow"), Some("Arco"));
    }

    #[test]
    fn test_load_po_blank_source_never_produces_entry() {
        let raw = po("es", "msgid \"   \"\nmsgstr \"espacio\"\n");
        let catalog = load_catalog(&raw).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_load_po_plural_uses_singular_form() {
        let raw = po(
            "es",
            r#"
msgid "{count} arrow"
msgid_plural "{count} arrows"
msgstr[0] "{count} flecha"
msgstr[1] "{count} flechas"
"#,
        );
        let catalog = load_catalog(&raw).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.lookup("item.name", "{count} arrow"), Some("{count} flecha"));
    }

    #[test]
    fn test_load_po_entries_without_blank_separator() {
        let raw = po("es", "msgid \"a\"\nmsgstr \"x\"\nmsgid \"b\"\nmsgstr \"y\"\n");
        let catalog = load_catalog(&raw).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.lookup("c", "b"), Some("y"));
    }

    #[test]
    fn test_load_po_duplicate_last_wins() {
        let raw = po("es", "msgid \"a\"\nmsgstr \"x\"\n\nmsgid \"a\"\nmsgstr \"z\"\n");
        let catalog = load_catalog(&raw).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.lookup("c", "a"), Some("z"));
    }

    #[test]
    fn test_load_po_counts_lint_warnings() {
        let raw = po("es", "msgid \"{count} coins\"\nmsgstr \"monedas\"\n");
        let catalog = load_catalog(&raw).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.lint_warnings(), 1);
    }

    // ==================== PO Error Tests ====================

    #[test]
    fn test_load_po_unterminated_string() {
        let raw = po("es", "msgid \"Iron Sword\nmsgstr \"x\"\n");
        let err = load_catalog(&raw).unwrap_err();
        assert_eq!(err.language, "es");
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_load_po_msgstr_without_msgid() {
        let err = load_catalog(&po("es", "msgstr \"x\"\n")).unwrap_err();
        assert!(err.reason.contains("msgstr without msgid"));
    }

    #[test]
    fn test_load_po_msgid_without_msgstr() {
        let err = load_catalog(&po("es", "msgid \"a\"\n\nmsgid \"b\"\nmsgstr \"c\"\n")).unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.reason.contains("msgid without msgstr"));
    }

    #[test]
    fn test_load_po_garbage_line() {
        let err = load_catalog(&po("es", "msgid \"a\"\nmsgstr \"b\"\nthis is not po\n")).unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_load_po_invalid_escape() {
        let err = load_catalog(&po("es", "msgid \"a\\q\"\nmsgstr \"b\"\n")).unwrap_err();
        assert!(err.reason.contains("invalid escape"));
    }

    #[test]
    fn test_load_invalid_utf8_reports_line() {
        let mut content = b"msgid \"a\"\nmsgstr \"".to_vec();
        content.extend_from_slice(&[0xff, 0xfe]);
        content.extend_from_slice(b"\"\n");
        let err = load_catalog(&RawCatalog::new("es", content)).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.reason.contains("UTF-8"));
    }

    #[test]
    fn test_load_invalid_language_code() {
        let err = load_catalog(&po("not a language", "")).unwrap_err();
        assert_eq!(err.line, 0);
    }

    // ==================== JSON Parsing Tests ====================

    #[test]
    fn test_load_json_catalog() {
        let raw = po(
            "pt-BR",
            r#"{"Iron Sword": "Espada de Ferro", "item.name\u0004Light": "Leve", "  ": "x"}"#,
        );
        let catalog = load_catalog(&raw).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.lookup("item.name", "Iron Sword"), Some("Espada de Ferro"));
        assert_eq!(catalog.lookup("item.name", "Light"), Some("Leve"));
        assert_eq!(catalog.lookup("npc.name", "Light"), None);
    }

    #[test]
    fn test_load_json_rejects_nested_values() {
        let err = load_catalog(&po("es", r#"{"a": {"b": "c"}}"#)).unwrap_err();
        assert!(err.reason.contains("must be a string"));
    }

    #[test]
    fn test_load_json_syntax_error_reports_line() {
        let err = load_catalog(&po("es", "{\n\"a\": \"b\",\n\"c\": \n}")).unwrap_err();
        assert_eq!(err.line, 4);
    }

    // ==================== load_catalogs Tests ====================

    #[test]
    fn test_load_catalogs_collects_failures_and_continues() {
        let raws = vec![
            po("pt-BR", "msgid \"Iron Sword\"\nmsgstr \"Espada de Ferro\"\n"),
            po("de", "msgid \"broken\n"),
            po("es", "{\"Iron Sword\": \"Espada de Hierro\"}"),
        ];
        let loaded = load_catalogs(&raws);

        assert_eq!(loaded.catalogs.len(), 2);
        assert_eq!(loaded.failures.len(), 1);
        assert_eq!(loaded.failures[0].language, "de");
        // Sorted by language
        assert_eq!(loaded.catalogs[0].language().as_str(), "es");
        assert_eq!(loaded.catalogs[1].language().as_str(), "pt-BR");
    }

    #[test]
    fn test_load_catalogs_duplicate_language() {
        let raws = vec![po("pt_BR", "{}"), po("pt-br", "{}")];
        let loaded = load_catalogs(&raws);
        assert_eq!(loaded.catalogs.len(), 1);
        assert_eq!(loaded.failures.len(), 1);
        assert!(loaded.failures[0].reason.contains("duplicate"));
    }

    #[test]
    fn test_raw_catalog_deserializes_content_string() {
        let raw: RawCatalog =
            serde_json::from_str(r#"{"language": "es", "content": "msgid \"a\""}"#).unwrap();
        assert_eq!(raw.content, b"msgid \"a\"".to_vec());
    }
}
