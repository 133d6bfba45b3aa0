//! Blob store gateway.
//!
//! Sealed chunk snapshots are uploaded file-by-file under a
//! `<chunk_id>/` prefix, byte-for-byte identical to the local files.
//! The [`BlobStore`] trait is the seam the roll over path depends on;
//! [`ObjectStoreBlobFs`] is the `object_store`-backed implementation
//! (in-memory for dev/test, S3 for production).

use crate::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Durable blob storage for sealed chunk snapshots.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload local files under `prefix`, returning the object keys written.
    async fn upload_files(&self, prefix: &str, files: &[PathBuf]) -> Result<Vec<String>>;

    /// List object keys under `prefix`.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete every object under `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    /// Display URI of the backing store, e.g. `s3://bucket`.
    fn base_uri(&self) -> String;
}

/// [`BlobStore`] over any [`object_store::ObjectStore`] backend.
pub struct ObjectStoreBlobFs {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectStoreBlobFs {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl BlobStore for ObjectStoreBlobFs {
    async fn upload_files(&self, prefix: &str, files: &[PathBuf]) -> Result<Vec<String>> {
        let mut keys = Vec::with_capacity(files.len());
        for file in files {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    crate::Error::Internal(format!("unusable file name: {}", file.display()))
                })?;
            let key = format!("{prefix}/{name}");
            let bytes = tokio::fs::read(file).await?;
            debug!(key = %key, size_bytes = bytes.len(), "uploading snapshot file");
            self.store.put(&ObjectPath::from(key.as_str()), bytes.into()).await?;
            keys.push(key);
        }
        info!(prefix, files = keys.len(), "uploaded files to blob store");
        Ok(keys)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix_path = ObjectPath::from(prefix);
        let mut keys = Vec::new();
        let mut stream = self.store.list(Some(&prefix_path));
        while let Some(meta) = stream.try_next().await? {
            keys.push(meta.location.to_string());
        }
        Ok(keys)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.list_prefix(prefix).await?;
        for key in &keys {
            self.store.delete(&ObjectPath::from(key.as_str())).await?;
        }
        info!(prefix, deleted = keys.len(), "deleted blob prefix");
        Ok(keys.len())
    }

    fn base_uri(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}
