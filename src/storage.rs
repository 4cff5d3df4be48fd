//! Blob storage for published artifacts.
//!
//! Keys are `/`-separated paths such as
//! `0190c2a4-.../item/pt-BR/flash.json.deflate`. Each segment is restricted to
//! a conservative character set so keys are safe to map onto a filesystem.

use crate::error::BlobError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Content-addressable-by-key byte storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError>;
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, BlobError>;
    /// Delete a blob. Deleting a missing blob is not an error.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
    /// Every stored key, sorted.
    async fn list_keys(&self) -> Result<Vec<String>, BlobError>;
}

/// Whether `segment` may appear between the `/` separators of a key.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Reject empty, absolute and traversing keys.
pub fn validate_key(key: &str) -> Result<(), BlobError> {
    let valid = !key.is_empty() && key.split('/').all(is_valid_segment);
    if valid {
        Ok(())
    } else {
        Err(BlobError::InvalidKey(key.to_string()))
    }
}

/// In-process blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError> {
        validate_key(key)?;
        self.blobs.write().unwrap_or_else(PoisonError::into_inner).insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        validate_key(key)?;
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        validate_key(key)?;
        self.blobs.write().unwrap_or_else(PoisonError::into_inner).remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, BlobError> {
        Ok(self.keys())
    }
}

/// Blob store rooted at a directory. Writes go through a temporary file and
/// a rename, so readers never see a partial blob.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, segment| path.join(segment)))
    }
}

/// Marker in the names of in-flight temporary files (`<name>.tmp-<uuid>`).
const TMP_MARKER: &str = ".tmp-";

fn io_error(key: &str, source: std::io::Error) -> BlobError {
    BlobError::Io {
        key: key.to_string(),
        source,
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_error(key, e))?;
        }

        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes).await.map_err(|e| io_error(key, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error(key, e));
        }

        debug!("Stored blob {} ({} bytes)", key, bytes.len());
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound(key.to_string())),
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>, BlobError> {
        let mut keys = Vec::new();
        let mut pending: Vec<(PathBuf, String)> = vec![(self.root.clone(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&prefix, e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&prefix, e))? {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let key = join_key(&prefix, &name);
                let file_type = entry.file_type().await.map_err(|e| io_error(&key, e))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), key));
                } else if !name.contains(TMP_MARKER) && validate_key(&key).is_ok() {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

fn join_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ==================== Key Tests ====================

    #[test]
    fn test_valid_keys() {
        assert!(validate_key("v1/item/pt-BR/flash.json.deflate").is_ok());
        assert!(validate_key("v1/manifest.json").is_ok());
    }

    #[test]
    fn test_invalid_keys() {
        for key in ["", "/abs", "a//b", "a/../b", "a/./b", "a/b c", "a\\b", "a/"] {
            assert!(
                matches!(validate_key(key), Err(BlobError::InvalidKey(_))),
                "expected {:?} to be rejected",
                key
            );
        }
    }

    // ==================== Memory Store Tests ====================

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryBlobStore::new();
        store.store("v1/a", b"bytes").await.unwrap();

        assert_eq!(store.fetch("v1/a").await.unwrap(), b"bytes");
        assert_eq!(store.keys(), vec!["v1/a".to_string()]);

        store.delete("v1/a").await.unwrap();
        assert!(matches!(store.fetch("v1/a").await, Err(BlobError::NotFound(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_survives_poisoned_lock() {
        let store = std::sync::Arc::new(MemoryBlobStore::new());
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.blobs.write().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(store.blobs.is_poisoned());

        store.store("v1/a", b"bytes").await.unwrap();
        assert_eq!(store.fetch("v1/a").await.unwrap(), b"bytes");
        assert_eq!(store.list_keys().await.unwrap(), vec!["v1/a".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_store_delete_missing_is_ok() {
        let store = MemoryBlobStore::new();
        assert!(store.delete("v1/missing").await.is_ok());
    }

    // ==================== Filesystem Store Tests ====================

    #[tokio::test]
    async fn test_fs_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.store("v1/item/en/flash.json", b"{}").await.unwrap();
        assert!(dir.path().join("v1/item/en/flash.json").exists());
        assert_eq!(store.fetch("v1/item/en/flash.json").await.unwrap(), b"{}");

        // Overwrite replaces content
        store.store("v1/item/en/flash.json", b"[]").await.unwrap();
        assert_eq!(store.fetch("v1/item/en/flash.json").await.unwrap(), b"[]");
    }

    #[tokio::test]
    async fn test_fs_store_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        store.store("v1/a.json", b"1").await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path().join("v1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["a.json".to_string()]);
    }

    #[tokio::test]
    async fn test_fs_store_missing_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        assert!(matches!(store.fetch("v1/nope").await, Err(BlobError::NotFound(_))));
        assert!(store.delete("v1/nope").await.is_ok());

        store.store("v1/x", b"x").await.unwrap();
        store.delete("v1/x").await.unwrap();
        assert!(matches!(store.fetch("v1/x").await, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fs_store_lists_keys() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        store.store("v2/manifest.json", b"{}").await.unwrap();
        store.store("v1/item/en/flash.json", b"{}").await.unwrap();
        std::fs::write(dir.path().join("v1/item/en/flash.json.tmp-abc"), b"partial").unwrap();

        assert_eq!(
            store.list_keys().await.unwrap(),
            vec!["v1/item/en/flash.json".to_string(), "v2/manifest.json".to_string()]
        );
    }

    #[tokio::test]
    async fn test_fs_store_lists_nothing_for_missing_root() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path().join("absent"));
        assert!(store.list_keys().await.unwrap().is_empty());
    }

    #[test]
    fn test_segments() {
        assert!(is_valid_segment("pt-BR"));
        assert!(is_valid_segment("flash.json.deflate"));
        assert!(!is_valid_segment("boss fight"));
        assert!(!is_valid_segment(".."));
        assert!(!is_valid_segment(""));
    }

    #[tokio::test]
    async fn test_fs_store_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(matches!(store.store("../escape", b"x").await, Err(BlobError::InvalidKey(_))));
    }
}
