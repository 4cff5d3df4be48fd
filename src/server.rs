//! HTTP surface: publish trigger, version administration and artifact serving.
//!
//! Publishing and administration require the `x-api-key` header. Artifact
//! routes are public; possession of an access token is the authorization.

use crate::artifact::ArtifactKey;
use crate::codec::{decompress, OutputFormat};
use crate::error::{BlobError, PublishError, RegistryError};
use crate::i18n::LanguageCode;
use crate::pipeline::Publisher;
use crate::registry::VersionId;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

pub const API_KEY_HEADER: &str = "x-api-key";

pub struct AppState {
    pub publisher: Arc<Publisher>,
    /// Admin routes reject every request when unset
    pub api_key: Option<String>,
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str),
    NotFound(String),
    Publish(PublishError),
    Registry(RegistryError),
    Internal(String),
}

impl From<PublishError> for ApiError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::Registry(e) => ApiError::Registry(e),
            other => ApiError::Publish(other),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        ApiError::Registry(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(reason) => (StatusCode::UNAUTHORIZED, reason.to_string()),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what),
            ApiError::Publish(PublishError::Validation(report)) => {
                let body = json!({
                    "error": format!("snapshot failed validation with {} violation(s)", report.violations.len()),
                    "violations": report.violations,
                });
                return (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response();
            }
            ApiError::Publish(PublishError::SnapshotUnavailable(e)) => (StatusCode::BAD_GATEWAY, e.to_string()),
            ApiError::Publish(e) => {
                error!("Publish failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::Registry(RegistryError::UnknownVersion) => {
                (StatusCode::NOT_FOUND, RegistryError::UnknownVersion.to_string())
            }
            ApiError::Registry(RegistryError::Storage(BlobError::NotFound(key))) => {
                (StatusCode::NOT_FOUND, format!("artifact '{}' not found", key))
            }
            ApiError::Registry(e @ RegistryError::InvalidState { .. }) => (StatusCode::CONFLICT, e.to_string()),
            ApiError::Registry(e) => {
                error!("Registry operation failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::Internal(reason) => {
                error!("Internal error: {}", reason);
                (StatusCode::INTERNAL_SERVER_ERROR, reason)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn require_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.api_key.as_deref() else {
        return Err(ApiError::Unauthorized("admin API is disabled"));
    };
    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if constant_time_compare(provided, expected) {
        Ok(())
    } else {
        warn!("Rejected request with missing or invalid API key");
        Err(ApiError::Unauthorized("invalid API key"))
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/publish", post(publish))
        .route("/versions", get(list_versions))
        .route("/versions/:id/promote", post(promote_version))
        .route("/versions/:id/retire", post(retire_version))
        .route("/artifacts/:token/:bundle/:language/:format", get(get_artifact))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub branch: String,
}

async fn publish(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<PublishRequest>,
) -> Result<Response, ApiError> {
    require_api_key(&state, &headers)?;
    let outcome = state.publisher.publish(&request.branch).await?;
    Ok(Json(outcome).into_response())
}

async fn list_versions(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response, ApiError> {
    require_api_key(&state, &headers)?;
    Ok(Json(state.publisher.registry().list().await).into_response())
}

fn parse_version_id(id: &str) -> Result<VersionId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::NotFound(format!("version '{}' not found", id)))
}

async fn promote_version(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_api_key(&state, &headers)?;
    state.publisher.registry().promote(parse_version_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn retire_version(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_api_key(&state, &headers)?;
    state.publisher.registry().retire(parse_version_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct ArtifactQuery {
    #[serde(default)]
    pub decompress: bool,
}

async fn get_artifact(
    State(state): State<Arc<AppState>>,
    Path((token, bundle, language, format)): Path<(String, String, String, String)>,
    Query(query): Query<ArtifactQuery>,
) -> Result<Response, ApiError> {
    let not_found = || ApiError::NotFound(format!("artifact {}/{}/{} not found", bundle, language, format));
    let language = LanguageCode::parse(&language).map_err(|_| not_found())?;
    let format: OutputFormat = format.parse().map_err(|_| not_found())?;
    let key = ArtifactKey::new(&bundle, language, format);

    let bytes = state.publisher.registry().fetch(&token, &key).await?;
    let body = if query.decompress {
        decompress(&bytes, format.compression).map_err(|e| ApiError::Internal(e.to_string()))?
    } else {
        bytes
    };

    Ok(([(header::CONTENT_TYPE, format.content_type(query.decompress))], body).into_response())
}
