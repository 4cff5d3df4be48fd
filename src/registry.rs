//! Version registry: versions, access tokens and artifact locations.
//!
//! A version moves `Publishing -> Live -> Retired`, or `Publishing ->
//! Abandoned` when its publish is cancelled. Only Live versions (and Retired
//! ones still inside the grace period) are routable by access token.
//!
//! Each version carries its own async mutex, so transitions on one version
//! never wait on another. The maps that index versions and tokens are only
//! held for the duration of a lookup.

use crate::artifact::{Artifact, ArtifactKey};
use crate::error::{BlobError, RegistryError};
use crate::storage::BlobStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Token that always routes to the promoted production version.
pub const DEFAULT_TOKEN: &str = "default";

/// Blob holding the id of the promoted version.
const DEFAULT_POINTER_KEY: &str = "default.json";

/// Time-ordered version identifier (UUIDv7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(Uuid);

impl VersionId {
    fn generate() -> Self {
        VersionId(Uuid::now_v7())
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for VersionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(VersionId)
    }
}

/// Opaque token handed to clients to fetch a version's artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    fn generate() -> Self {
        AccessToken(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Publishing,
    Live,
    Retired,
    Abandoned,
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VersionStatus::Publishing => "publishing",
            VersionStatus::Live => "live",
            VersionStatus::Retired => "retired",
            VersionStatus::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct VersionState {
    id: VersionId,
    branch: String,
    status: VersionStatus,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    retired_at: Option<DateTime<Utc>>,
    token: Option<AccessToken>,
    expected: BTreeSet<ArtifactKey>,
    /// Registered artifacts and their digests
    artifacts: BTreeMap<ArtifactKey, String>,
}

impl VersionState {
    fn require(&self, status: VersionStatus, operation: &'static str) -> Result<(), RegistryError> {
        if self.status == status {
            Ok(())
        } else {
            Err(RegistryError::InvalidState {
                version_id: self.id.to_string(),
                status: self.status.to_string(),
                operation,
            })
        }
    }

    fn is_routable(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        match (self.status, self.retired_at) {
            (VersionStatus::Live, _) => true,
            (VersionStatus::Retired, Some(retired_at)) => {
                retired_at.checked_add_signed(grace).map_or(true, |until| now < until)
            }
            _ => false,
        }
    }

    fn is_collectable(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        match (self.status, self.retired_at) {
            (VersionStatus::Abandoned, _) => true,
            (VersionStatus::Retired, Some(retired_at)) => {
                retired_at.checked_add_signed(grace).is_some_and(|until| now >= until)
            }
            _ => false,
        }
    }

    fn blob_keys(&self) -> Vec<String> {
        let id = self.id.to_string();
        self.artifacts
            .keys()
            .map(|key| key.storage_key(&id))
            .chain(std::iter::once(manifest_key(&self.id)))
            .collect()
    }
}

fn manifest_key(id: &VersionId) -> String {
    format!("{}/manifest.json", id)
}

/// Administrative view of a version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionSummary {
    pub version_id: VersionId,
    pub branch: String,
    pub status: VersionStatus,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
    pub access_token: Option<AccessToken>,
    pub artifact_count: usize,
    pub is_default: bool,
}

/// Durable description of a published version, stored next to its
/// artifacts and rewritten whenever its status changes.
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version_id: VersionId,
    branch: String,
    status: VersionStatus,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    retired_at: Option<DateTime<Utc>>,
    access_token: Option<AccessToken>,
    artifacts: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    #[serde(flatten)]
    key: ArtifactKey,
    storage_key: String,
    digest: String,
}

impl Manifest {
    fn of(state: &VersionState) -> Self {
        let id = state.id.to_string();
        Manifest {
            version_id: state.id,
            branch: state.branch.clone(),
            status: state.status,
            created_at: state.created_at,
            published_at: state.published_at,
            retired_at: state.retired_at,
            access_token: state.token.clone(),
            artifacts: state
                .artifacts
                .iter()
                .map(|(key, digest)| ManifestEntry {
                    key: key.clone(),
                    storage_key: key.storage_key(&id),
                    digest: digest.clone(),
                })
                .collect(),
        }
    }

    fn into_state(self) -> VersionState {
        let artifacts: BTreeMap<ArtifactKey, String> = self
            .artifacts
            .into_iter()
            .map(|entry| (entry.key, entry.digest))
            .collect();
        VersionState {
            id: self.version_id,
            branch: self.branch,
            status: self.status,
            created_at: self.created_at,
            published_at: self.published_at,
            retired_at: self.retired_at,
            token: self.access_token,
            expected: artifacts.keys().cloned().collect(),
            artifacts,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DefaultPointer {
    version_id: VersionId,
}

/// Outcome of rebuilding a registry from its blob store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub versions_restored: usize,
    pub orphaned_blobs_deleted: usize,
}

/// Outcome of a garbage-collection sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub versions_collected: usize,
    pub blobs_deleted: usize,
}

pub struct VersionRegistry {
    versions: RwLock<HashMap<VersionId, Arc<Mutex<VersionState>>>>,
    tokens: RwLock<HashMap<String, VersionId>>,
    default_version: RwLock<Option<VersionId>>,
    blobs: Arc<dyn BlobStore>,
    grace_period: chrono::Duration,
}

impl VersionRegistry {
    pub fn new(blobs: Arc<dyn BlobStore>, grace_period: std::time::Duration) -> Self {
        Self {
            versions: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            default_version: RwLock::new(None),
            blobs,
            grace_period: chrono::Duration::from_std(grace_period).unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    fn version(&self, id: VersionId) -> Result<Arc<Mutex<VersionState>>, RegistryError> {
        self.versions
            .read().unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(RegistryError::UnknownVersion)
    }

    /// Allocate a fresh version in `Publishing`.
    pub fn begin_publish(&self, branch: &str) -> VersionId {
        let id = VersionId::generate();
        let state = VersionState {
            id,
            branch: branch.to_string(),
            status: VersionStatus::Publishing,
            created_at: Utc::now(),
            published_at: None,
            retired_at: None,
            token: None,
            expected: BTreeSet::new(),
            artifacts: BTreeMap::new(),
        };
        self.versions.write().unwrap_or_else(PoisonError::into_inner).insert(id, Arc::new(Mutex::new(state)));
        debug!("Began publish of {} as version {}", branch, id);
        id
    }

    /// Declare artifacts that must be registered before the version can go live.
    pub async fn expect_artifacts(
        &self,
        id: VersionId,
        keys: impl IntoIterator<Item = ArtifactKey>,
    ) -> Result<(), RegistryError> {
        let version = self.version(id)?;
        let mut state = version.lock().await;
        state.require(VersionStatus::Publishing, "plan artifacts for")?;
        state.expected.extend(keys);
        Ok(())
    }

    /// Store an artifact's bytes and record it against the version.
    ///
    /// Registering the same key with the same digest again is a no-op;
    /// different content for an existing key is a conflict.
    pub async fn register_artifact(&self, id: VersionId, artifact: &Artifact) -> Result<(), RegistryError> {
        let version = self.version(id)?;
        let mut state = version.lock().await;
        state.require(VersionStatus::Publishing, "register artifacts for")?;

        if let Some(existing) = state.artifacts.get(&artifact.key) {
            if *existing == artifact.digest {
                return Ok(());
            }
            return Err(RegistryError::Conflict {
                key: artifact.key.to_string(),
            });
        }

        self.blobs
            .store(&artifact.key.storage_key(&id.to_string()), &artifact.bytes)
            .await?;
        state.artifacts.insert(artifact.key.clone(), artifact.digest.clone());
        Ok(())
    }

    /// Make the version live and issue its access token.
    ///
    /// Fails with `IncompletePublish` while any expected artifact is missing;
    /// the version then stays in `Publishing` and is not routable.
    pub async fn complete_publish(&self, id: VersionId) -> Result<AccessToken, RegistryError> {
        let version = self.version(id)?;
        let mut state = version.lock().await;
        state.require(VersionStatus::Publishing, "complete")?;

        let missing: Vec<String> = state
            .expected
            .iter()
            .filter(|key| !state.artifacts.contains_key(*key))
            .map(ToString::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(RegistryError::IncompletePublish {
                version_id: id.to_string(),
                missing,
            });
        }

        let published_at = Utc::now();
        let token = AccessToken::generate();
        let mut manifest = Manifest::of(&state);
        manifest.status = VersionStatus::Live;
        manifest.published_at = Some(published_at);
        manifest.access_token = Some(token.clone());
        self.store_manifest(&manifest).await?;

        state.status = VersionStatus::Live;
        state.published_at = Some(published_at);
        state.token = Some(token.clone());
        self.tokens.write().unwrap_or_else(PoisonError::into_inner).insert(token.0.clone(), id);

        info!(
            "Version {} of {} is live with {} artifacts",
            id,
            state.branch,
            state.artifacts.len()
        );
        Ok(token)
    }

    /// Resolve an access token to a servable version.
    pub async fn resolve(&self, token: &str) -> Result<VersionId, RegistryError> {
        self.resolve_at(token, Utc::now()).await
    }

    /// Resolve as of `now`. Retired versions stay resolvable for the grace period.
    pub async fn resolve_at(&self, token: &str, now: DateTime<Utc>) -> Result<VersionId, RegistryError> {
        let id = if token == DEFAULT_TOKEN {
            *self.default_version.read().unwrap_or_else(PoisonError::into_inner)
        } else {
            self.tokens.read().unwrap_or_else(PoisonError::into_inner).get(token).copied()
        }
        .ok_or(RegistryError::UnknownVersion)?;

        let version = self.version(id)?;
        let state = version.lock().await;
        if state.is_routable(now, self.grace_period) {
            Ok(id)
        } else {
            Err(RegistryError::UnknownVersion)
        }
    }

    /// Designate a live version as the production default.
    pub async fn promote(&self, id: VersionId) -> Result<(), RegistryError> {
        let version = self.version(id)?;
        let state = version.lock().await;
        state.require(VersionStatus::Live, "promote")?;
        let pointer = serde_json::to_vec(&DefaultPointer { version_id: id })?;
        self.blobs.store(DEFAULT_POINTER_KEY, &pointer).await?;
        *self.default_version.write().unwrap_or_else(PoisonError::into_inner) = Some(id);
        info!("Version {} promoted to default", id);
        Ok(())
    }

    /// Retire a live version. Its artifacts are deleted by a later sweep.
    pub async fn retire(&self, id: VersionId) -> Result<(), RegistryError> {
        let version = self.version(id)?;
        let mut state = version.lock().await;
        if state.status == VersionStatus::Retired {
            return Ok(());
        }
        state.require(VersionStatus::Live, "retire")?;

        let retired_at = Utc::now();
        let mut manifest = Manifest::of(&state);
        manifest.status = VersionStatus::Retired;
        manifest.retired_at = Some(retired_at);
        self.store_manifest(&manifest).await?;

        state.status = VersionStatus::Retired;
        state.retired_at = Some(retired_at);
        let was_default = {
            let mut default_version = self.default_version.write().unwrap_or_else(PoisonError::into_inner);
            let was_default = *default_version == Some(id);
            if was_default {
                *default_version = None;
            }
            was_default
        };
        if was_default {
            warn!("Retiring default version {}; no default is designated now", id);
            if let Err(e) = self.blobs.delete(DEFAULT_POINTER_KEY).await {
                warn!("Failed to clear the default pointer: {}", e);
            }
        }
        info!("Version {} retired", id);
        Ok(())
    }

    /// Abandon a publish that will not complete.
    pub async fn cancel_publish(&self, id: VersionId) -> Result<(), RegistryError> {
        let version = self.version(id)?;
        let mut state = version.lock().await;
        if state.status == VersionStatus::Abandoned {
            return Ok(());
        }
        state.require(VersionStatus::Publishing, "cancel")?;
        state.status = VersionStatus::Abandoned;
        warn!("Publish of version {} ({}) abandoned", id, state.branch);
        Ok(())
    }

    pub async fn collect_garbage(&self) -> Result<GcReport, RegistryError> {
        self.collect_garbage_at(Utc::now()).await
    }

    /// Delete the blobs of abandoned versions and of retired versions past
    /// the grace period, then forget them.
    pub async fn collect_garbage_at(&self, now: DateTime<Utc>) -> Result<GcReport, RegistryError> {
        let versions: Vec<_> = self.versions.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect();
        let mut report = GcReport::default();

        for version in versions {
            let state = version.lock().await;
            if !state.is_collectable(now, self.grace_period) {
                continue;
            }

            for key in state.blob_keys() {
                self.blobs.delete(&key).await?;
                report.blobs_deleted += 1;
            }

            if let Some(token) = &state.token {
                self.tokens.write().unwrap_or_else(PoisonError::into_inner).remove(token.as_str());
            }
            self.versions.write().unwrap_or_else(PoisonError::into_inner).remove(&state.id);
            report.versions_collected += 1;
            debug!("Collected version {} ({})", state.id, state.status);
        }

        if report.versions_collected > 0 {
            info!(
                "Garbage collection removed {} versions ({} blobs)",
                report.versions_collected, report.blobs_deleted
            );
        }
        Ok(report)
    }

    /// Fetch an artifact's stored bytes through an access token.
    pub async fn fetch(&self, token: &str, key: &ArtifactKey) -> Result<Vec<u8>, RegistryError> {
        let id = self.resolve(token).await?;
        let version = self.version(id)?;
        let state = version.lock().await;
        let storage_key = key.storage_key(&id.to_string());
        if !state.artifacts.contains_key(key) {
            return Err(BlobError::NotFound(storage_key).into());
        }
        Ok(self.blobs.fetch(&storage_key).await?)
    }

    pub async fn get(&self, id: VersionId) -> Option<VersionSummary> {
        let version = self.version(id).ok()?;
        let state = version.lock().await;
        Some(self.summarize(&state))
    }

    /// Every known version, oldest first.
    pub async fn list(&self) -> Vec<VersionSummary> {
        let versions: Vec<_> = self.versions.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect();
        let mut summaries = Vec::with_capacity(versions.len());
        for version in versions {
            summaries.push(self.summarize(&*version.lock().await));
        }
        summaries.sort_by_key(|summary| summary.version_id);
        summaries
    }

    /// Rebuild versions from the manifests in the blob store.
    ///
    /// Live and retired versions come back with their access tokens and the
    /// default designation. Blobs under a version id with no manifest belong
    /// to a publish that never completed and are deleted. Versions this
    /// registry already knows are left alone.
    pub async fn restore(&self) -> Result<RestoreReport, RegistryError> {
        let mut by_version: BTreeMap<VersionId, Vec<String>> = BTreeMap::new();
        for key in self.blobs.list_keys().await? {
            let Some(id) = key.split('/').next().and_then(|prefix| prefix.parse::<VersionId>().ok()) else {
                continue;
            };
            by_version.entry(id).or_default().push(key);
        }

        let mut report = RestoreReport::default();
        for (id, keys) in by_version {
            if self.version(id).is_ok() {
                continue;
            }

            let key = manifest_key(&id);
            if !keys.contains(&key) {
                warn!("Deleting {} blobs of unfinished version {}", keys.len(), id);
                for orphan in &keys {
                    self.blobs.delete(orphan).await?;
                    report.orphaned_blobs_deleted += 1;
                }
                continue;
            }

            let manifest: Manifest = match serde_json::from_slice(&self.blobs.fetch(&key).await?) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!("Skipping version {}: unreadable manifest: {}", id, e);
                    continue;
                }
            };
            let restorable = manifest.version_id == id
                && matches!(manifest.status, VersionStatus::Live | VersionStatus::Retired);
            if !restorable {
                warn!("Skipping version {}: manifest is not for a published version", id);
                continue;
            }

            let state = manifest.into_state();
            if let Some(token) = &state.token {
                self.tokens.write().unwrap_or_else(PoisonError::into_inner).insert(token.0.clone(), id);
            }
            self.versions.write().unwrap_or_else(PoisonError::into_inner).insert(id, Arc::new(Mutex::new(state)));
            report.versions_restored += 1;
        }

        match self.blobs.fetch(DEFAULT_POINTER_KEY).await {
            Ok(bytes) => match serde_json::from_slice::<DefaultPointer>(&bytes) {
                Ok(pointer) => {
                    let is_live = match self.version(pointer.version_id) {
                        Ok(version) => version.lock().await.status == VersionStatus::Live,
                        Err(_) => false,
                    };
                    if is_live {
                        *self.default_version.write().unwrap_or_else(PoisonError::into_inner) = Some(pointer.version_id);
                    } else {
                        warn!("Default pointer names version {}, which is not live", pointer.version_id);
                    }
                }
                Err(e) => warn!("Ignoring unreadable default pointer: {}", e),
            },
            Err(BlobError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        info!(
            "Restored {} versions ({} orphaned blobs deleted)",
            report.versions_restored, report.orphaned_blobs_deleted
        );
        Ok(report)
    }

    async fn store_manifest(&self, manifest: &Manifest) -> Result<(), RegistryError> {
        let bytes = serde_json::to_vec_pretty(manifest)?;
        self.blobs.store(&manifest_key(&manifest.version_id), &bytes).await?;
        Ok(())
    }

    fn summarize(&self, state: &VersionState) -> VersionSummary {
        VersionSummary {
            version_id: state.id,
            branch: state.branch.clone(),
            status: state.status,
            created_at: state.created_at,
            published_at: state.published_at,
            retired_at: state.retired_at,
            access_token: state.token.clone(),
            artifact_count: state.artifacts.len(),
            is_default: *self.default_version.read().unwrap_or_else(PoisonError::into_inner) == Some(state.id),
        }
    }
}
