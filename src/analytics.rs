//! Optional export of published domain data to an analytics collector.
//!
//! Exports are fire-and-forget: they run on a spawned task after a version
//! goes live and can never fail or delay the publish.

use crate::domain::DomainObject;
use crate::registry::VersionId;
use crate::retry::{with_retry, RetryConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Payload sent for every live version.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsExport {
    pub version_id: VersionId,
    pub branch: String,
    pub records: Vec<DomainObject>,
}

#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn export(&self, export: &AnalyticsExport) -> Result<()>;
}

/// Posts exports as JSON to a collector URL.
#[derive(Debug, Clone)]
pub struct HttpAnalyticsSink {
    client: reqwest::Client,
    url: String,
    retry: RetryConfig,
}

impl HttpAnalyticsSink {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            retry: RetryConfig::analytics(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl AnalyticsSink for HttpAnalyticsSink {
    async fn export(&self, export: &AnalyticsExport) -> Result<()> {
        with_retry(&self.retry, "Analytics export", || async {
            let response = self
                .client
                .post(&self.url)
                .json(export)
                .send()
                .await
                .context("Failed to send analytics export")?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("Analytics collector error ({}): {}", status, body);
            }
            Ok(())
        })
        .await
    }
}

/// Spawn an export in the background. Errors are logged and dropped.
pub fn spawn_export(sink: Arc<dyn AnalyticsSink>, export: AnalyticsExport) {
    tokio::spawn(async move {
        match sink.export(&export).await {
            Ok(()) => debug!(
                "Exported {} records of version {} to analytics",
                export.records.len(),
                export.version_id
            ),
            Err(e) => warn!("Analytics export for version {} failed: {:#}", export.version_id, e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use wiremock::{
        matchers::{body_partial_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn export() -> AnalyticsExport {
        AnalyticsExport {
            version_id: "0190c2a4-0000-7000-8000-000000000000".parse().unwrap(),
            branch: "main".to_string(),
            records: vec![DomainObject {
                record_type: "item".to_string(),
                id: "sword01".to_string(),
                fields: BTreeMap::new(),
                derived: BTreeMap::new(),
            }],
        }
    }

    #[tokio::test]
    async fn test_http_sink_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ingest"))
            .and(body_partial_json(serde_json::json!({"branch": "main"})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpAnalyticsSink::new(&format!("{}/ingest", server.uri()));
        sink.export(&export()).await.unwrap();
    }

    #[tokio::test]
    async fn test_http_sink_reports_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let sink = HttpAnalyticsSink::new(&server.uri())
            .with_retry(RetryConfig::new(2, Duration::from_millis(5)));
        let err = sink.export(&export()).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
