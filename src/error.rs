//! Error taxonomy for the publish pipeline.
//!
//! Catalog and validation errors are collected and reported in full; every
//! other error aborts the publish that raised it.

use crate::records::ValidationReport;
use serde::Serialize;
use thiserror::Error;

/// A translation catalog could not be parsed. Only the affected language is
/// dropped from the publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("catalog '{language}' is malformed at line {line}: {reason}")]
pub struct CatalogParseError {
    /// Language identifier as supplied by the record store
    pub language: String,
    /// 1-based line number (0 when the whole payload is rejected)
    pub line: usize,
    pub reason: String,
}

/// The record store could not supply a complete snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("snapshot '{branch}' is unavailable: {reason}")]
pub struct SnapshotUnavailable {
    pub branch: String,
    pub reason: String,
}

/// An internal invariant was violated while building domain objects.
///
/// This only happens when validation let something through that it should
/// not have, so it is a defect rather than an authoring mistake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to build {record_type} '{id}': {reason}")]
pub struct BuildError {
    pub record_type: String,
    pub id: String,
    pub reason: String,
}

/// Rendering a bundle into one output format failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to encode bundle '{bundle}' as {format}: {reason}")]
pub struct CodecError {
    pub bundle: String,
    pub format: String,
    pub reason: String,
}

/// Errors raised by a [`BlobStore`](crate::storage::BlobStore).
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob '{0}' not found")]
    NotFound(String),

    #[error("invalid blob key '{0}'")]
    InvalidKey(String),

    #[error("blob store I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the [`VersionRegistry`](crate::registry::VersionRegistry).
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The token or version id does not route to a servable version.
    #[error("unknown version")]
    UnknownVersion,

    /// The same artifact key was registered twice with different content.
    #[error("artifact '{key}' was already registered with different content")]
    Conflict { key: String },

    /// Some expected artifacts never registered.
    #[error("version {version_id} is missing {} artifact(s)", missing.len())]
    IncompletePublish {
        version_id: String,
        missing: Vec<String>,
    },

    /// The operation is not allowed in the version's current state.
    #[error("cannot {operation} version {version_id} while it is {status}")]
    InvalidState {
        version_id: String,
        status: String,
        operation: &'static str,
    },

    #[error(transparent)]
    Storage(#[from] BlobError),

    #[error("failed to encode version manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Errors returned from [`Publisher::publish`](crate::pipeline::Publisher::publish).
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    SnapshotUnavailable(#[from] SnapshotUnavailable),

    #[error("snapshot failed validation with {} violation(s)", .0.violations.len())]
    Validation(ValidationReport),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("publish worker failed: {0}")]
    Worker(String),
}

impl From<ValidationReport> for PublishError {
    fn from(report: ValidationReport) -> Self {
        PublishError::Validation(report)
    }
}
