//! The publish pipeline.
//!
//! `Publisher::publish` turns one branch reference into a live version:
//! snapshot and catalogs are loaded, the snapshot is validated and built into
//! a domain graph once, and then every target language is localized,
//! projected and rendered in its own blocking task. Artifacts are registered
//! as the tasks finish and the version goes live only when every planned
//! artifact is present.
//!
//! Any failure after the version is allocated cancels it, so a failed publish
//! never leaves a routable version behind.

use crate::analytics::{spawn_export, AnalyticsExport, AnalyticsSink, HttpAnalyticsSink};
use crate::artifact::{Artifact, ArtifactKey};
use crate::codec::{render, OutputFormat};
use crate::config::{Config, RecordStoreLocation};
use crate::domain::{DomainBuilder, DomainGraph};
use crate::dto::{Bundle, ALL_BUNDLE};
use crate::error::{CatalogParseError, CodecError, PublishError};
use crate::i18n::{
    load_catalogs, localize_all, CoverageReport, LanguageCode, LocalizationPolicy, TranslationCatalog,
};
use crate::records::{validate, FsRecordStore, HttpRecordStore, RecordStore, SchemaRegistry};
use crate::registry::{AccessToken, VersionId, VersionRegistry};
use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Per-deployment publish settings.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    /// Language the records are authored in; always published
    pub source_language: LanguageCode,

    /// When set, only these languages (plus the source language) are published
    pub target_languages: Option<BTreeSet<LanguageCode>>,

    pub formats: Vec<OutputFormat>,

    /// Maximum number of languages rendered concurrently
    pub worker_limit: usize,
}

impl PublishSettings {
    pub fn new(source_language: LanguageCode, formats: Vec<OutputFormat>) -> Self {
        Self {
            source_language,
            target_languages: None,
            formats,
            worker_limit: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
        }
    }

    fn wants(&self, language: &LanguageCode) -> bool {
        *language == self.source_language
            || self
                .target_languages
                .as_ref()
                .map_or(true, |targets| targets.contains(language))
    }
}

/// Result of a successful publish.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub version_id: VersionId,
    pub access_token: AccessToken,
    pub branch: String,
    pub languages: Vec<LanguageCode>,
    pub failed_catalogs: Vec<CatalogParseError>,
    pub coverage: Vec<CoverageReport>,
    pub artifact_count: usize,
}

/// Everything one language task produced.
struct LanguageOutput {
    coverage: CoverageReport,
    artifacts: Vec<Artifact>,
    failures: Vec<CodecError>,
}

pub struct Publisher {
    store: Arc<dyn RecordStore>,
    schemas: Arc<SchemaRegistry>,
    policy: Arc<LocalizationPolicy>,
    builder: DomainBuilder,
    registry: Arc<VersionRegistry>,
    settings: PublishSettings,
    analytics: Option<Arc<dyn AnalyticsSink>>,
}

impl Publisher {
    pub fn new(
        store: Arc<dyn RecordStore>,
        schemas: Arc<SchemaRegistry>,
        registry: Arc<VersionRegistry>,
        settings: PublishSettings,
    ) -> Self {
        let policy = Arc::new(LocalizationPolicy::from_schemas(&schemas));
        info!(
            "Localization policy covers {} fields across {} record types",
            policy.len(),
            schemas.iter().count()
        );
        Self {
            store,
            schemas,
            policy,
            builder: DomainBuilder::with_builtin_derivations(),
            registry,
            settings,
            analytics: None,
        }
    }

    /// Wire a publisher from configuration: record store, schemas and the
    /// optional analytics sink.
    pub fn from_config(config: &Config, registry: Arc<VersionRegistry>) -> anyhow::Result<Self> {
        let store: Arc<dyn RecordStore> = match &config.record_store {
            RecordStoreLocation::Directory(root) => {
                info!("Reading records from directory {}", root.display());
                Arc::new(FsRecordStore::new(root))
            }
            RecordStoreLocation::Http(url) => {
                info!("Reading records from {}", url);
                Arc::new(HttpRecordStore::new(url))
            }
        };

        let schemas = match &config.schema_file {
            Some(path) => SchemaRegistry::load(path)
                .with_context(|| format!("Failed to load schemas from {}", path.display()))?,
            None => SchemaRegistry::builtin(),
        };

        let mut publisher = Self::new(store, Arc::new(schemas), registry, config.publish_settings());
        if let Some(url) = &config.analytics_url {
            info!("Exporting published data to analytics at {}", url);
            publisher = publisher.with_analytics(Arc::new(HttpAnalyticsSink::new(url)));
        }
        Ok(publisher)
    }

    pub fn with_builder(mut self, builder: DomainBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_analytics(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(sink);
        self
    }

    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &PublishSettings {
        &self.settings
    }

    /// Publish one branch reference as a new version.
    pub async fn publish(&self, branch: &str) -> Result<PublishOutcome, PublishError> {
        info!("Publishing {}", branch);

        let (snapshot, raw_catalogs) = futures::try_join!(
            self.store.get_snapshot(branch),
            self.store.get_catalogs(branch)
        )?;
        let loaded = load_catalogs(&raw_catalogs);

        let validated = validate(snapshot, &self.schemas).map_err(|report| {
            warn!("Snapshot {} rejected: {}", branch, report);
            report
        })?;
        let graph = Arc::new(self.builder.build(&validated, &self.schemas)?);

        let catalogs = self.select_catalogs(loaded.catalogs);
        let languages: Vec<LanguageCode> = catalogs.iter().map(|c| c.language().clone()).collect();
        let bundles = self.bundle_names();

        let version_id = self.registry.begin_publish(branch);
        let guard = CancelOnDrop::new(self.registry.clone(), version_id);
        let result = self
            .render_and_register(version_id, &graph, catalogs, &bundles)
            .await;

        let (coverage, artifact_count, access_token) = match result {
            Ok(done) => {
                guard.disarm();
                done
            }
            Err(e) => {
                error!("Publish of {} failed: {}", branch, e);
                if let Err(cancel_err) = self.registry.cancel_publish(version_id).await {
                    warn!("Failed to cancel version {}: {}", version_id, cancel_err);
                }
                guard.disarm();
                return Err(e);
            }
        };

        if let Some(sink) = &self.analytics {
            let export = AnalyticsExport {
                version_id,
                branch: branch.to_string(),
                records: graph.iter().map(|o| o.as_ref().clone()).collect(),
            };
            spawn_export(sink.clone(), export);
        }

        info!(
            "Published {} as version {}: {} languages, {} artifacts, {} failed catalogs",
            branch,
            version_id,
            languages.len(),
            artifact_count,
            loaded.failures.len()
        );

        Ok(PublishOutcome {
            version_id,
            access_token,
            branch: branch.to_string(),
            languages,
            failed_catalogs: loaded.failures,
            coverage,
            artifact_count,
        })
    }

    /// Pick the catalogs to publish. The source language is always present,
    /// as a pass-through unless a catalog for it was supplied.
    fn select_catalogs(&self, loaded: Vec<TranslationCatalog>) -> Vec<Arc<TranslationCatalog>> {
        let source = &self.settings.source_language;
        let mut catalogs: Vec<Arc<TranslationCatalog>> = loaded
            .into_iter()
            .filter(|catalog| {
                let wanted = self.settings.wants(catalog.language());
                if !wanted {
                    info!("Skipping catalog {}: not a target language", catalog.language());
                }
                wanted
            })
            .map(Arc::new)
            .collect();

        if !catalogs.iter().any(|c| c.language() == source) {
            catalogs.push(Arc::new(TranslationCatalog::empty(source.clone())));
        }

        if let Some(targets) = &self.settings.target_languages {
            for target in targets {
                if !catalogs.iter().any(|c| c.language() == target) {
                    warn!("No catalog available for target language {}", target);
                }
            }
        }

        catalogs.sort_by(|a, b| a.language().cmp(b.language()));
        catalogs
    }

    /// One bundle per record type, plus the aggregate.
    fn bundle_names(&self) -> Vec<String> {
        self.schemas
            .record_types()
            .map(str::to_string)
            .chain(std::iter::once(ALL_BUNDLE.to_string()))
            .collect()
    }

    async fn render_and_register(
        &self,
        version_id: VersionId,
        graph: &Arc<DomainGraph>,
        catalogs: Vec<Arc<TranslationCatalog>>,
        bundles: &[String],
    ) -> Result<(Vec<CoverageReport>, usize, AccessToken), PublishError> {
        let formats = &self.settings.formats;
        let plan: Vec<ArtifactKey> = catalogs
            .iter()
            .flat_map(|catalog| {
                bundles.iter().flat_map(move |bundle| {
                    formats
                        .iter()
                        .map(move |format| ArtifactKey::new(bundle, catalog.language().clone(), *format))
                })
            })
            .collect();
        self.registry.expect_artifacts(version_id, plan).await?;

        let semaphore = Arc::new(Semaphore::new(self.settings.worker_limit.max(1)));
        let mut tasks = JoinSet::new();
        for catalog in catalogs {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| PublishError::Worker(e.to_string()))?;
            let graph = graph.clone();
            let policy = self.policy.clone();
            let bundles = bundles.to_vec();
            let formats = formats.clone();
            tasks.spawn_blocking(move || {
                let _permit = permit;
                render_language(&graph, &catalog, &policy, &bundles, &formats)
            });
        }

        let mut coverage = Vec::new();
        let mut artifact_count = 0;
        while let Some(joined) = tasks.join_next().await {
            let output = joined.map_err(|e| PublishError::Worker(e.to_string()))?;
            for failure in &output.failures {
                warn!("{}", failure);
            }
            for artifact in &output.artifacts {
                self.registry.register_artifact(version_id, artifact).await?;
                artifact_count += 1;
            }
            coverage.push(output.coverage);
        }
        coverage.sort_by(|a, b| a.language.cmp(&b.language));

        let token = self.registry.complete_publish(version_id).await?;
        Ok((coverage, artifact_count, token))
    }
}

/// Cancels a version whose publish future is dropped before it finishes,
/// e.g. when an HTTP client disconnects mid-publish.
struct CancelOnDrop {
    registry: Arc<VersionRegistry>,
    version_id: VersionId,
    armed: bool,
}

impl CancelOnDrop {
    fn new(registry: Arc<VersionRegistry>, version_id: VersionId) -> Self {
        Self {
            registry,
            version_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let registry = self.registry.clone();
        let version_id = self.version_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Publish of version {} was interrupted, cancelling", version_id);
                handle.spawn(async move {
                    if let Err(e) = registry.cancel_publish(version_id).await {
                        warn!("Failed to cancel interrupted version {}: {}", version_id, e);
                    }
                });
            }
            Err(_) => error!(
                "Publish of version {} was dropped outside a runtime and stays publishing",
                version_id
            ),
        }
    }
}

/// Localize, project and render every bundle for one language.
fn render_language(
    graph: &DomainGraph,
    catalog: &TranslationCatalog,
    policy: &LocalizationPolicy,
    bundles: &[String],
    formats: &[OutputFormat],
) -> LanguageOutput {
    let localized = localize_all(graph, catalog, policy);
    let mut artifacts = Vec::new();
    let mut failures = Vec::new();

    for bundle_name in bundles {
        for format in formats {
            let bundle = if bundle_name == ALL_BUNDLE {
                Bundle::from_objects(bundle_name, &localized.language, format.shape, localized.iter())
            } else {
                Bundle::from_objects(
                    bundle_name,
                    &localized.language,
                    format.shape,
                    localized.objects_of(bundle_name),
                )
            };
            let key = ArtifactKey::new(bundle_name, localized.language.clone(), *format);
            match render(&bundle, format) {
                Ok(bytes) => artifacts.push(Artifact::new(key, bytes)),
                Err(e) => failures.push(e),
            }
        }
    }

    LanguageOutput {
        coverage: localized.coverage,
        artifacts,
        failures,
    }
}
