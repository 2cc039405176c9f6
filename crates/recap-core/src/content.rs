//! Generated Content Storage
//!
//! Blob store for generated retrospective documents. Blobs are keyed by a
//! storage path derived from the job id (`retrospectives/{id}/content.json`).

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::job::JobId;

/// Durable reference to a stored content blob
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentRef(String);

impl ContentRef {
    /// Storage path for a job's content document
    pub fn for_job(job_id: &JobId) -> Self {
        Self(format!("retrospectives/{job_id}/content.json"))
    }

    /// Parse a stored reference, refusing absolute paths and `..` segments
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        let path = Path::new(&s);
        let relative = !s.is_empty()
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if relative {
            Ok(Self(s))
        } else {
            Err(CoreError::InvalidId(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content blob storage trait
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store the document for a job, replacing any previous version
    async fn put_content(&self, job_id: &JobId, bytes: Vec<u8>) -> Result<ContentRef>;

    /// Read a stored document. Missing blobs are `CoreError::NotFound`.
    async fn get_content(&self, content_ref: &ContentRef) -> Result<Vec<u8>>;

    /// Check whether a blob exists
    async fn exists(&self, content_ref: &ContentRef) -> Result<bool>;
}

fn content_not_found(content_ref: &ContentRef) -> CoreError {
    CoreError::NotFound {
        kind: "content",
        id: content_ref.to_string(),
    }
}

/// In-memory content store (for development and tests)
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<ContentRef, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put_content(&self, job_id: &JobId, bytes: Vec<u8>) -> Result<ContentRef> {
        let content_ref = ContentRef::for_job(job_id);
        self.blobs.write().insert(content_ref.clone(), bytes);
        Ok(content_ref)
    }

    async fn get_content(&self, content_ref: &ContentRef) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .get(content_ref)
            .cloned()
            .ok_or_else(|| content_not_found(content_ref))
    }

    async fn exists(&self, content_ref: &ContentRef) -> Result<bool> {
        Ok(self.blobs.read().contains_key(content_ref))
    }
}

/// Filesystem content store rooted at a directory
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, content_ref: &ContentRef) -> PathBuf {
        self.root.join(content_ref.as_str())
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn put_content(&self, job_id: &JobId, bytes: Vec<u8>) -> Result<ContentRef> {
        let content_ref = ContentRef::for_job(job_id);
        let path = self.path_of(&content_ref);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so readers never see a partial document
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::debug!(content_ref = %content_ref, bytes = bytes.len(), "Stored content");
        Ok(content_ref)
    }

    async fn get_content(&self, content_ref: &ContentRef) -> Result<Vec<u8>> {
        match tokio::fs::read(self.path_of(content_ref)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(content_not_found(content_ref))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, content_ref: &ContentRef) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_of(content_ref)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_ref_parse() {
        assert!(ContentRef::parse("retrospectives/abc/content.json").is_ok());
        assert!(ContentRef::parse("../secret").is_err());
        assert!(ContentRef::parse("/etc/passwd").is_err());
        assert!(ContentRef::parse("").is_err());
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let store = MemoryContentStore::new();
        let id = JobId::new();
        let content_ref = store.put_content(&id, b"{\"a\":1}".to_vec()).await.unwrap();

        assert_eq!(content_ref, ContentRef::for_job(&id));
        assert_eq!(store.get_content(&content_ref).await.unwrap(), b"{\"a\":1}");
    }

    #[tokio::test]
    async fn test_fs_round_trip_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());
        let id = JobId::new();
        let bytes = "{\n  \"titulo\": \"Ana & Bia ✨\"\n}".as_bytes().to_vec();

        let content_ref = store.put_content(&id, bytes.clone()).await.unwrap();
        assert!(store.exists(&content_ref).await.unwrap());
        assert_eq!(store.get_content(&content_ref).await.unwrap(), bytes);

        // Overwrite wins
        store.put_content(&id, b"{}".to_vec()).await.unwrap();
        assert_eq!(store.get_content(&content_ref).await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());
        let missing = ContentRef::for_job(&JobId::new());

        let err = store.get_content(&missing).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.exists(&missing).await.unwrap());
    }
}
