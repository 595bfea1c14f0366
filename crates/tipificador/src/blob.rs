//! Object store seam for batch archive hand-off.
//!
//! Large batch archives can bypass the HTTP upload path: the client asks for
//! an upload URL, pushes the archive to the object store, then points the
//! service at the object. The trait keeps the service oblivious to which
//! store backs it; the bundled implementation is a plain directory tree,
//! which is all a single-host deployment needs.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{Result, TipificadorError};

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    /// URL a client can upload the object to.
    async fn upload_url(&self, key: &str) -> Result<String>;
    /// URL a client can fetch the object from.
    async fn download_url(&self, key: &str) -> Result<String>;
}

/// Filesystem-backed blob store rooted at a configured directory.
pub struct FsBlobStore {
    root: PathBuf,
    prefix: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|part| part.is_empty() || part == "..")
        {
            return Err(TipificadorError::bad_input(format!("invalid object key: {key}")));
        }
        Ok(self.root.join(&self.prefix).join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|_| TipificadorError::not_found(format!("object not found: {key}")))
    }

    async fn upload_url(&self, key: &str) -> Result<String> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(format!("file://{}", path.display()))
    }

    async fn download_url(&self, key: &str) -> Result<String> {
        let path = self.object_path(key)?;
        Ok(format!("file://{}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path(), "tipificador");
        store.put("uploads/batch.zip", b"archive").await.unwrap();
        let bytes = store.get("uploads/batch.zip").await.unwrap();
        assert_eq!(bytes, b"archive");
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path(), "tipificador");
        assert!(store.get("../escape").await.is_err());
        assert!(store.get("/absolute").await.is_err());
        assert!(store.get("a//b").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path(), "tipificador");
        let err = store.get("uploads/nope.zip").await.unwrap_err();
        assert!(matches!(err, TipificadorError::NotFound(_)));
    }
}
