//! Internationalization (i18n) module.
//!
//! Everything that turns authored source text into per-language text lives
//! here. Catalogs and languages are always passed explicitly; there is no
//! ambient "current language".
//!
//! # Architecture
//!
//! - `language`: validated, normalized language tags
//! - `catalog`: PO / JSON catalog loading
//! - `lint`: placeholder checks between source and translation
//! - `policy`: which record fields are localizable, derived from schemas
//! - `engine`: applies the policy and a catalog to domain objects
//! - `coverage`: per-language translation coverage reporting
//!
//! # Example
//!
//! ```rust,ignore
//! use gamedata_publish::i18n::{localize_all, load_catalog, LocalizationPolicy, RawCatalog};
//!
//! let policy = LocalizationPolicy::from_schemas(&schemas);
//! let catalog = load_catalog(&RawCatalog::new("pt-BR", po_bytes))?;
//! let localized = localize_all(&graph, &catalog, &policy);
//! println!("{:.1}% translated", localized.coverage.coverage_percent);
//! ```

mod catalog;
mod coverage;
mod engine;
mod language;
mod lint;
mod policy;

pub use catalog::{load_catalog, load_catalogs, LoadedCatalogs, RawCatalog, TranslationCatalog, CONTEXT_SEPARATOR};
pub use coverage::{CoverageReport, MissingTranslation};
pub use engine::{field_context, localize, localize_all, LocalizedGraph, LocalizedObject};
pub use language::LanguageCode;
pub use lint::{LintReport, PlaceholderLint};
pub use policy::LocalizationPolicy;
