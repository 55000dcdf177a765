// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory `ObjectStore` for unit tests, shaped after the fleet's other
//! `Fake*` adapters: a cloneable handle over shared state, no I/O.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::store::{ObjectStore, StorageError};

#[derive(Default)]
struct FakeState {
    buckets: HashMap<String, HashMap<String, Vec<u8>>>,
}

#[derive(Clone, Default)]
pub struct FakeObjectStore {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        self.inner.lock().buckets.get(bucket).map_or(0, |b| b.len())
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn upload_file(&self, local_path: &Path, bucket: &str, key: &str) -> Result<(), StorageError> {
        let bytes = tokio::fs::read(local_path).await?;
        self.upload_bytes(bucket, key, &bytes).await
    }

    async fn download_file(&self, bucket: &str, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let bytes = self.download_bytes(bucket, key).await?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, bytes).await?;
        Ok(())
    }

    async fn upload_bytes(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut state = self.inner.lock();
        let b = state.buckets.get_mut(bucket).ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        b.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn download_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let state = self.inner.lock();
        let b = state.buckets.get(bucket).ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        b.get(key)
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound { bucket: bucket.to_string(), key: key.to_string() })
    }

    async fn ensure_bucket(&self, name: &str) -> Result<(), StorageError> {
        self.inner.lock().buckets.entry(name.to_string()).or_default();
        Ok(())
    }
}
