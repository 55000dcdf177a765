// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `ObjectStore` capability: upload/download by bucket + key, and
//! administrative bucket creation. Modeled as an `async_trait` capability in
//! the same shape as the fleet's notification and provider adapters — a
//! plain trait object shared across tasks, with a real and a fake impl.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),
    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Upload and download of opaque byte payloads, keyed by bucket and object
/// key. FC, D, and W each hold one instance; D mints keys for task payloads
/// at submission, and every process ships its own log fragments under a key
/// derived from its instance id.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn upload_file(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
    ) -> Result<(), StorageError>;

    async fn download_file(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
    ) -> Result<(), StorageError>;

    async fn upload_bytes(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    async fn download_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn ensure_bucket(&self, name: &str) -> Result<(), StorageError>;
}
