//! Artifacts: the immutable published unit.

use crate::codec::OutputFormat;
use crate::i18n::LanguageCode;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifies one artifact within a version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    /// Record type, or `all` for the aggregate bundle
    pub bundle: String,
    pub language: LanguageCode,
    #[serde(serialize_with = "format_as_string", deserialize_with = "format_from_string")]
    pub format: OutputFormat,
}

fn format_as_string<S: Serializer>(format: &OutputFormat, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(format)
}

fn format_from_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OutputFormat, D::Error> {
    let name = String::deserialize(deserializer)?;
    name.parse().map_err(serde::de::Error::custom)
}

impl ArtifactKey {
    pub fn new(bundle: &str, language: LanguageCode, format: OutputFormat) -> Self {
        Self {
            bundle: bundle.to_string(),
            language,
            format,
        }
    }

    /// Blob store key: `{version_id}/{bundle}/{language}/{format}`.
    pub fn storage_key(&self, version_id: &str) -> String {
        format!("{}/{}", version_id, self)
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.bundle, self.language, self.format)
    }
}

/// Rendered, compressed bytes for one key, with their SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: ArtifactKey,
    pub bytes: Vec<u8>,
    pub digest: String,
}

impl Artifact {
    pub fn new(key: ArtifactKey, bytes: Vec<u8>) -> Self {
        let digest = digest(&bytes);
        Self { key, bytes, digest }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Lowercase hex SHA-256.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ArtifactKey {
        ArtifactKey::new(
            "item",
            LanguageCode::parse("pt_br").unwrap(),
            "flash.json.deflate".parse().unwrap(),
        )
    }

    #[test]
    fn test_storage_key_format() {
        assert_eq!(key().storage_key("v1"), "v1/item/pt-BR/flash.json.deflate");
    }

    #[test]
    fn test_digest_is_sha256_hex() {
        let artifact = Artifact::new(key(), b"hello".to_vec());
        assert_eq!(
            artifact.digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(artifact.len(), 5);
    }

    #[test]
    fn test_key_serializes_format_name() {
        let json = serde_json::to_value(key()).unwrap();
        assert_eq!(json["format"], "flash.json.deflate");
        assert_eq!(json["language"], "pt-BR");
    }

    #[test]
    fn test_key_reads_back_from_manifest_json() {
        let parsed: ArtifactKey = serde_json::from_value(serde_json::json!({
            "bundle": "item",
            "language": "pt_BR",
            "format": "flash.json.deflate"
        }))
        .unwrap();
        assert_eq!(parsed, key());

        let bad = serde_json::from_value::<ArtifactKey>(serde_json::json!({
            "bundle": "item",
            "language": "en",
            "format": "flash.xml"
        }));
        assert!(bad.is_err());
    }
}
