use crate::codec::OutputFormat;
use crate::i18n::LanguageCode;
use crate::pipeline::PublishSettings;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Where design records and catalogs are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStoreLocation {
    Directory(PathBuf),
    Http(String),
}

impl RecordStoreLocation {
    fn parse(value: &str) -> Self {
        if value.starts_with("http://") || value.starts_with("https://") {
            RecordStoreLocation::Http(value.to_string())
        } else {
            RecordStoreLocation::Directory(PathBuf::from(value))
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,
    pub api_key: Option<String>,

    // Storage
    pub record_store: RecordStoreLocation,
    pub blob_store_dir: Option<PathBuf>,
    pub schema_file: Option<PathBuf>,

    // Publishing
    pub source_language: LanguageCode,
    pub target_languages: Option<BTreeSet<LanguageCode>>,
    pub output_formats: Vec<OutputFormat>,
    pub worker_limit: usize,

    // Version lifecycle
    pub retire_grace: Duration,
    pub gc_schedule: String,

    // Analytics
    pub analytics_url: Option<String>,
}

/// An environment variable that is set and not blank.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let source_language = optional_var("SOURCE_LANGUAGE")
            .unwrap_or_else(|| "en".to_string())
            .parse::<LanguageCode>()
            .context("SOURCE_LANGUAGE is not a valid language code")?;

        let target_languages = match optional_var("TARGET_LANGUAGES") {
            Some(list) => Some(
                list.split(',')
                    .map(str::trim)
                    .filter(|code| !code.is_empty())
                    .map(LanguageCode::parse)
                    .collect::<Result<BTreeSet<_>>>()
                    .context("TARGET_LANGUAGES contains an invalid language code")?,
            ),
            None => None,
        };

        let output_formats = OutputFormat::parse_list(
            &optional_var("OUTPUT_FORMATS").unwrap_or_else(|| "flash.json.deflate,ios.json.deflate".to_string()),
        )
        .context("OUTPUT_FORMATS is invalid")?;
        if output_formats.is_empty() {
            anyhow::bail!("OUTPUT_FORMATS must name at least one format");
        }

        Ok(Self {
            // Server
            port: optional_var("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            api_key: optional_var("API_KEY"),

            // Storage
            record_store: RecordStoreLocation::parse(
                &optional_var("RECORD_STORE").context("RECORD_STORE not set")?,
            ),
            blob_store_dir: optional_var("BLOB_STORE_DIR").map(PathBuf::from),
            schema_file: optional_var("SCHEMA_FILE").map(PathBuf::from),

            // Publishing
            source_language,
            target_languages,
            output_formats,
            worker_limit: optional_var("WORKER_LIMIT")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)),

            // Version lifecycle
            retire_grace: Duration::from_secs(
                optional_var("RETIRE_GRACE_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(3600),
            ),
            gc_schedule: optional_var("GC_SCHEDULE").unwrap_or_else(|| "0 */15 * * * *".to_string()),

            // Analytics
            analytics_url: optional_var("ANALYTICS_URL"),
        })
    }

    pub fn publish_settings(&self) -> PublishSettings {
        PublishSettings {
            source_language: self.source_language.clone(),
            target_languages: self.target_languages.clone(),
            formats: self.output_formats.clone(),
            worker_limit: self.worker_limit,
        }
    }
}
