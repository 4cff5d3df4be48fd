//! Record store adapters.
//!
//! The record store is an external, version-controlled system. The pipeline
//! only needs two reads from it: the full record snapshot for a branch
//! reference and the raw translation catalogs for the same reference.

use crate::error::SnapshotUnavailable;
use crate::i18n::RawCatalog;
use crate::records::{RawRecord, Snapshot};
use crate::retry::{with_retry_if, RetryConfig};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Source of snapshots and catalogs for a branch reference.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch every record for the branch reference. Partial snapshots are
    /// never returned.
    async fn get_snapshot(&self, branch: &str) -> Result<Snapshot, SnapshotUnavailable>;

    /// Fetch the raw translation catalogs for the branch reference.
    async fn get_catalogs(&self, branch: &str) -> Result<Vec<RawCatalog>, SnapshotUnavailable>;
}

fn unavailable(branch: &str, reason: impl fmt::Display) -> SnapshotUnavailable {
    SnapshotUnavailable {
        branch: branch.to_string(),
        reason: reason.to_string(),
    }
}

// ==================== Filesystem Store ====================

/// Record store backed by a directory checkout.
///
/// Layout:
/// ```text
/// <root>/<branch>/records/<record_type>.json   JSON array of {"id": ..., <fields>}
/// <root>/<branch>/catalogs/<language>.po       gettext catalog
/// <root>/<branch>/catalogs/<language>.json     flat JSON catalog
/// ```
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    root: PathBuf,
}

impl FsRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn branch_dir(&self, branch: &str) -> Result<PathBuf, SnapshotUnavailable> {
        let relative = Path::new(branch);
        let is_plain = !branch.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_plain {
            return Err(unavailable(branch, "invalid branch reference"));
        }
        Ok(self.root.join(relative))
    }
}

/// Parse a record file: a JSON array of objects, each carrying a string `id`.
fn parse_record_file(record_type: &str, bytes: &[u8]) -> Result<Vec<RawRecord>, String> {
    let objects: Vec<Map<String, Value>> = serde_json::from_slice(bytes)
        .map_err(|e| format!("{}.json is not a JSON array of objects: {}", record_type, e))?;

    objects
        .into_iter()
        .enumerate()
        .map(|(index, mut fields)| match fields.remove("id") {
            Some(Value::String(id)) => Ok(RawRecord {
                record_type: record_type.to_string(),
                id,
                fields: fields.into_iter().collect(),
            }),
            _ => Err(format!(
                "{}.json entry {} has no string \"id\"",
                record_type, index
            )),
        })
        .collect()
}

#[async_trait]
impl RecordStore for FsRecordStore {
    async fn get_snapshot(&self, branch: &str) -> Result<Snapshot, SnapshotUnavailable> {
        let records_dir = self.branch_dir(branch)?.join("records");
        let mut entries = tokio::fs::read_dir(&records_dir)
            .await
            .map_err(|e| unavailable(branch, format!("{}: {}", records_dir.display(), e)))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unavailable(branch, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(record_type) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| unavailable(branch, format!("{}: {}", path.display(), e)))?;
            let parsed = parse_record_file(record_type, &bytes).map_err(|e| unavailable(branch, e))?;
            debug!("Read {} {} record(s) from {}", parsed.len(), record_type, path.display());
            records.extend(parsed);
        }

        let snapshot = Snapshot::from_records(branch, records);
        info!("Loaded snapshot {} with {} record(s)", branch, snapshot.len());
        Ok(snapshot)
    }

    async fn get_catalogs(&self, branch: &str) -> Result<Vec<RawCatalog>, SnapshotUnavailable> {
        let catalogs_dir = self.branch_dir(branch)?.join("catalogs");
        let mut entries = match tokio::fs::read_dir(&catalogs_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No catalogs directory for {}, publishing source language only", branch);
                return Ok(Vec::new());
            }
            Err(e) => return Err(unavailable(branch, format!("{}: {}", catalogs_dir.display(), e))),
        };

        let mut catalogs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unavailable(branch, e))?
        {
            let path = entry.path();
            let is_catalog = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("po") | Some("json")
            );
            let Some(language) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_catalog {
                continue;
            }
            let content = tokio::fs::read(&path)
                .await
                .map_err(|e| unavailable(branch, format!("{}: {}", path.display(), e)))?;
            catalogs.push(RawCatalog::new(language, content));
        }

        catalogs.sort_by(|a, b| a.language.cmp(&b.language));
        Ok(catalogs)
    }
}

// ==================== HTTP Store ====================

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    records: Vec<RawRecord>,
}

/// Failure of a single HTTP fetch, classified for retry decisions.
#[derive(Debug)]
enum FetchError {
    Status(StatusCode, String),
    Network(reqwest::Error),
    Decode(reqwest::Error),
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status(status, _) => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            FetchError::Network(_) => true,
            FetchError::Decode(_) => false,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Status(status, body) => write!(f, "record store returned {}: {}", status, body),
            FetchError::Network(e) => write!(f, "record store request failed: {}", e),
            FetchError::Decode(e) => write!(f, "record store response was malformed: {}", e),
        }
    }
}

/// Record store reached over HTTP.
///
/// - `GET {base}/snapshots/{branch}` returns `{"records": [RawRecord, ...]}`
/// - `GET {base}/catalogs/{branch}` returns `[{"language": ..., "content": ...}]`
///
/// The branch reference is always sent as a single percent-encoded segment.
#[derive(Debug, Clone)]
pub struct HttpRecordStore {
    client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpRecordStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryConfig::record_store(),
        }
    }

    /// Override the retry policy (tests use short delays).
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// `{base}/{resource}/{branch}`, with the branch as one percent-encoded
    /// path segment (`feature/loot` becomes `feature%2Floot`).
    fn resource_url(&self, resource: &str, branch: &str) -> Result<reqwest::Url, String> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| format!("invalid record store URL {}: {}", self.base_url, e))?;
        url.path_segments_mut()
            .map_err(|_| format!("record store URL {} cannot carry a path", self.base_url))?
            .pop_if_empty()
            .push(resource)
            .push(branch);
        Ok(url)
    }

    async fn fetch_json<T>(&self, branch: &str, resource: &str) -> Result<T, SnapshotUnavailable>
    where
        T: serde::de::DeserializeOwned + Send,
    {
        let url = self.resource_url(resource, branch).map_err(|e| unavailable(branch, e))?;
        let operation_name = format!("Fetch {} for {}", resource, branch);

        with_retry_if(
            &self.retry,
            &operation_name,
            || async {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(FetchError::Network)?;

                let status = response.status();
                if !status.is_success() {
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
                    return Err(FetchError::Status(status, body));
                }

                response.json::<T>().await.map_err(FetchError::Decode)
            },
            FetchError::is_retryable,
        )
        .await
        .map_err(|e| unavailable(branch, e))
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn get_snapshot(&self, branch: &str) -> Result<Snapshot, SnapshotUnavailable> {
        let response: SnapshotResponse = self.fetch_json(branch, "snapshots").await?;
        let snapshot = Snapshot::from_records(branch, response.records);
        info!("Fetched snapshot {} with {} record(s)", branch, snapshot.len());
        Ok(snapshot)
    }

    async fn get_catalogs(&self, branch: &str) -> Result<Vec<RawCatalog>, SnapshotUnavailable> {
        let mut catalogs: Vec<RawCatalog> = self.fetch_json(branch, "catalogs").await?;
        catalogs.sort_by(|a, b| a.language.cmp(&b.language));
        Ok(catalogs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn write(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(3, Duration::from_millis(5))
    }

    // ==================== FsRecordStore Tests ====================

    #[tokio::test]
    async fn test_fs_store_reads_snapshot() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "main/records/item.json",
            r#"[{"id": "sword01", "name": "Iron Sword", "price": 100}]"#,
        );
        write(
            temp.path(),
            "main/records/npc.json",
            r#"[{"id": "smith", "name": "Brom"}]"#,
        );
        write(temp.path(), "main/records/README.txt", "ignored");

        let store = FsRecordStore::new(temp.path());
        let snapshot = store.get_snapshot("main").await.unwrap();

        assert_eq!(snapshot.len(), 2);
        let sword = snapshot.get("item", "sword01").unwrap();
        assert_eq!(sword.fields["name"], json!("Iron Sword"));
        assert!(!sword.fields.contains_key("id"));
    }

    #[tokio::test]
    async fn test_fs_store_nested_branch() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "feature/loot/records/item.json", r#"[{"id": "a"}]"#);

        let store = FsRecordStore::new(temp.path());
        let snapshot = store.get_snapshot("feature/loot").await.unwrap();
        assert_eq!(snapshot.branch, "feature/loot");
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_fs_store_missing_branch_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let store = FsRecordStore::new(temp.path());
        let err = store.get_snapshot("nope").await.unwrap_err();
        assert_eq!(err.branch, "nope");
    }

    #[tokio::test]
    async fn test_fs_store_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let store = FsRecordStore::new(temp.path());
        for branch in ["../etc", "/abs", "", "a/../b"] {
            let err = store.get_snapshot(branch).await.unwrap_err();
            assert!(err.reason.contains("invalid branch"), "branch {:?}", branch);
        }
    }

    #[tokio::test]
    async fn test_fs_store_record_without_id_is_unavailable() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "main/records/item.json", r#"[{"name": "x"}]"#);
        let store = FsRecordStore::new(temp.path());
        let err = store.get_snapshot("main").await.unwrap_err();
        assert!(err.reason.contains("no string \"id\""));
    }

    #[tokio::test]
    async fn test_fs_store_malformed_file_is_unavailable() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "main/records/item.json", "{not json");
        let store = FsRecordStore::new(temp.path());
        assert!(store.get_snapshot("main").await.is_err());
    }

    #[tokio::test]
    async fn test_fs_store_reads_catalogs() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "main/catalogs/pt-BR.po", "msgid \"a\"\nmsgstr \"b\"\n");
        write(temp.path(), "main/catalogs/es.json", "{}");
        write(temp.path(), "main/catalogs/notes.md", "ignored");

        let store = FsRecordStore::new(temp.path());
        let catalogs = store.get_catalogs("main").await.unwrap();

        let languages: Vec<_> = catalogs.iter().map(|c| c.language.as_str()).collect();
        assert_eq!(languages, vec!["es", "pt-BR"]);
    }

    #[tokio::test]
    async fn test_fs_store_missing_catalogs_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "main/records/item.json", "[]");
        let store = FsRecordStore::new(temp.path());
        assert!(store.get_catalogs("main").await.unwrap().is_empty());
    }

    // ==================== HttpRecordStore Tests ====================

    #[tokio::test]
    async fn test_http_store_fetches_snapshot() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/snapshots/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "records": [
                    {"recordType": "item", "id": "sword01", "fields": {"name": "Iron Sword"}}
                ]
            })))
            .mount(&mock_server)
            .await;

        let store = HttpRecordStore::new(&mock_server.uri()).with_retry(fast_retry());
        let snapshot = store.get_snapshot("main").await.unwrap();
        assert!(snapshot.contains("item", "sword01"));
    }

    #[tokio::test]
    async fn test_http_store_fetches_catalogs() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/catalogs/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"language": "pt-BR", "content": "msgid \"a\"\nmsgstr \"b\"\n"}
            ])))
            .mount(&mock_server)
            .await;

        let store = HttpRecordStore::new(&format!("{}/", mock_server.uri())).with_retry(fast_retry());
        let catalogs = store.get_catalogs("main").await.unwrap();
        assert_eq!(catalogs.len(), 1);
        assert_eq!(catalogs[0].language, "pt-BR");
    }

    #[tokio::test]
    async fn test_http_store_encodes_branch_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/records/snapshots/feature%2Floot%231%3Fdraft"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": []})))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpRecordStore::new(&format!("{}/records/", server.uri()));
        let snapshot = store.get_snapshot("feature/loot#1?draft").await.unwrap();
        assert_eq!(snapshot.branch, "feature/loot#1?draft");
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_http_store_invalid_base_url_is_unavailable() {
        let store = HttpRecordStore::new("not a url");
        let err = store.get_snapshot("main").await.unwrap_err();
        assert!(err.reason.contains("invalid record store URL"));
    }

    #[tokio::test]
    async fn test_http_store_retries_server_errors() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/snapshots/main"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/snapshots/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": []})))
            .mount(&mock_server)
            .await;

        let store = HttpRecordStore::new(&mock_server.uri()).with_retry(fast_retry());
        let snapshot = store.get_snapshot("main").await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_http_store_does_not_retry_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/snapshots/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such branch"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = HttpRecordStore::new(&mock_server.uri()).with_retry(fast_retry());
        let err = store.get_snapshot("gone").await.unwrap_err();
        assert!(err.reason.contains("404"));
        assert!(err.reason.contains("no such branch"));
    }

    #[tokio::test]
    async fn test_http_store_malformed_response_is_unavailable() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/snapshots/main"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let store = HttpRecordStore::new(&mock_server.uri()).with_retry(fast_retry());
        let err = store.get_snapshot("main").await.unwrap_err();
        assert!(err.reason.contains("malformed"));
    }
}
