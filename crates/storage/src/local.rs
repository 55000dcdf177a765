// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem-backed `ObjectStore`. Stands in for the provider's blob store
//! in a single-machine or test deployment: each bucket is a subdirectory of
//! `root`, each object a file named by its key.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::store::{ObjectStore, StorageError};

#[derive(Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    known_buckets: Arc<Mutex<HashSet<String>>>,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), known_buckets: Arc::new(Mutex::new(HashSet::new())) }
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.bucket_dir(bucket).join(key)
    }

    fn require_known(&self, bucket: &str) -> Result<(), StorageError> {
        if self.known_buckets.lock().contains(bucket) {
            Ok(())
        } else {
            Err(StorageError::BucketNotFound(bucket.to_string()))
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload_file(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
    ) -> Result<(), StorageError> {
        self.require_known(bucket)?;
        let bytes = tokio::fs::read(local_path).await?;
        self.upload_bytes(bucket, key, &bytes).await
    }

    async fn download_file(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
    ) -> Result<(), StorageError> {
        let bytes = self.download_bytes(bucket, key).await?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, bytes).await?;
        Ok(())
    }

    async fn upload_bytes(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.require_known(bucket)?;
        let path = self.object_path(bucket, key);
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(bucket, key, bytes = bytes.len(), "uploaded object");
        Ok(())
    }

    async fn download_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.require_known(bucket)?;
        let path = self.object_path(bucket, key);
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::ObjectNotFound { bucket: bucket.to_string(), key: key.to_string() }
            } else {
                StorageError::Io(e)
            }
        })
    }

    async fn ensure_bucket(&self, name: &str) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(self.bucket_dir(name)).await?;
        self.known_buckets.lock().insert(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_bytes_through_an_ensured_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store.ensure_bucket("acct1-files").await.unwrap();
        store.upload_bytes("acct1-files", "task-1", b"hello").await.unwrap();
        let bytes = store.download_bytes("acct1-files", "task-1").await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn rejects_access_to_an_unensured_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let err = store.upload_bytes("acct1-files", "task-1", b"hi").await.unwrap_err();
        assert!(matches!(err, StorageError::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn missing_object_is_reported_distinctly_from_other_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store.ensure_bucket("acct1-files").await.unwrap();
        let err = store.download_bytes("acct1-files", "nope").await.unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
    }
}
