// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log shipping. Every process accumulates structured log lines and flushes
//! them to the logging bucket on `loggingInterval`, zstd-compressed.

use crate::store::{ObjectStore, StorageError};
use parking_lot::Mutex;
use std::sync::Arc;

pub fn log_key(instance_id: &str, timestamp_secs: u64) -> String {
    format!("{instance_id}_{timestamp_secs}.log")
}

/// Accumulates log lines in memory and ships them as a single zstd-compressed
/// object on each `flush`. The buffer is cleared on a successful upload so a
/// failed upload simply retries with the next, larger, batch.
pub struct LogShipper<S> {
    store: Arc<S>,
    bucket: String,
    instance_id: String,
    buffer: Mutex<Vec<u8>>,
}

impl<S: ObjectStore> LogShipper<S> {
    pub fn new(store: Arc<S>, bucket: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self { store, bucket: bucket.into(), instance_id: instance_id.into(), buffer: Mutex::new(Vec::new()) }
    }

    pub fn append_line(&self, line: &str) {
        let mut buf = self.buffer.lock();
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Compress the buffered lines and upload them under a timestamped key.
    /// Leaves the buffer intact on failure so the next flush retries with
    /// everything accumulated so far.
    pub async fn flush(&self, now_epoch_secs: u64) -> Result<(), StorageError> {
        let snapshot = self.buffer.lock().clone();
        if snapshot.is_empty() {
            return Ok(());
        }
        let compressed = zstd::encode_all(snapshot.as_slice(), 0).map_err(StorageError::Io)?;
        let key = log_key(&self.instance_id, now_epoch_secs);
        self.store.upload_bytes(&self.bucket, &key, &compressed).await?;
        self.buffer.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalObjectStore;

    #[tokio::test]
    async fn flush_uploads_compressed_bytes_and_clears_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalObjectStore::new(dir.path()));
        store.ensure_bucket("acct1-logging").await.unwrap();
        let shipper = LogShipper::new(store.clone(), "acct1-logging", "inst-w1");
        shipper.append_line("task done: argmax=2");
        shipper.flush(1_700_000_000).await.unwrap();
        assert!(shipper.is_empty());

        let key = log_key("inst-w1", 1_700_000_000);
        let bytes = store.download_bytes("acct1-logging", &key).await.unwrap();
        let decompressed = zstd::decode_all(bytes.as_slice()).unwrap();
        assert_eq!(decompressed, b"task done: argmax=2\n");
    }

    #[tokio::test]
    async fn flush_on_empty_buffer_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalObjectStore::new(dir.path()));
        store.ensure_bucket("acct1-logging").await.unwrap();
        let shipper = LogShipper::new(store, "acct1-logging", "inst-w1");
        shipper.flush(1_700_000_000).await.unwrap();
    }
}
