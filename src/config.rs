//! Node configuration and environment-based component factory.

use crate::metadata::ConnectOptions;
use crate::{Error, Result};
use object_store::{aws::AmazonS3Builder, memory::InMemory, ObjectStore};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn ensure_non_empty(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Config(format!("{what} must not be empty")));
    }
    Ok(())
}

fn ensure_positive(value: u64, what: &str) -> Result<()> {
    if value == 0 {
        return Err(Error::Config(format!("{what} must be a positive number")));
    }
    Ok(())
}

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub chunk: ChunkManagerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        self.chunk.validate()?;
        self.metadata.validate()?;
        self.storage.validate()
    }
}

/// Chunk manager configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkManagerConfig {
    /// On-disk and catalog namespace for this node's chunks.
    #[serde(default = "default_chunk_data_prefix")]
    pub chunk_data_prefix: String,
    /// Directory under which chunk directories live.
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
    /// Roll over once a chunk has indexed this many bytes.
    #[serde(default = "default_rollover_bytes_threshold")]
    pub rollover_bytes_threshold: u64,
    /// Roll over once a chunk has indexed this many messages.
    #[serde(default = "default_rollover_messages_threshold")]
    pub rollover_messages_threshold: u64,
    /// How long `close` waits for an in-flight roll over.
    #[serde(default = "default_rollover_future_timeout_ms")]
    pub rollover_future_timeout_ms: u64,
}

fn default_chunk_data_prefix() -> String {
    "chunks".to_string()
}

fn default_data_directory() -> PathBuf {
    PathBuf::from("/tmp/logmill")
}

fn default_rollover_bytes_threshold() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_rollover_messages_threshold() -> u64 {
    5_000_000
}

fn default_rollover_future_timeout_ms() -> u64 {
    crate::chunk::DEFAULT_ROLLOVER_FUTURE_TIMEOUT_MS
}

impl Default for ChunkManagerConfig {
    fn default() -> Self {
        Self {
            chunk_data_prefix: default_chunk_data_prefix(),
            data_directory: default_data_directory(),
            rollover_bytes_threshold: default_rollover_bytes_threshold(),
            rollover_messages_threshold: default_rollover_messages_threshold(),
            rollover_future_timeout_ms: default_rollover_future_timeout_ms(),
        }
    }
}

impl ChunkManagerConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.chunk_data_prefix, "chunk_data_prefix")?;
        if self.data_directory.as_os_str().is_empty() {
            return Err(Error::Config("data_directory must not be empty".to_string()));
        }
        ensure_positive(self.rollover_bytes_threshold, "rollover_bytes_threshold")?;
        ensure_positive(
            self.rollover_messages_threshold,
            "rollover_messages_threshold",
        )?;
        ensure_positive(
            self.rollover_future_timeout_ms,
            "rollover_future_timeout_ms",
        )
    }

    pub fn rollover_future_timeout(&self) -> Duration {
        Duration::from_millis(self.rollover_future_timeout_ms)
    }
}

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_zk_host")]
    pub zk_host: String,
    /// Root under which every metadata path of this node lives.
    #[serde(default = "default_zk_path_prefix")]
    pub zk_path_prefix: String,
    #[serde(default = "default_zk_session_timeout_ms")]
    pub zk_session_timeout_ms: u64,
    #[serde(default = "default_zk_connection_timeout_ms")]
    pub zk_connection_timeout_ms: u64,
    #[serde(default = "default_zk_retry_count")]
    pub zk_retry_count: u32,
    #[serde(default = "default_zk_retry_delay_ms")]
    pub zk_retry_delay_ms: u64,
}

fn default_zk_host() -> String {
    "localhost:2181".to_string()
}

fn default_zk_path_prefix() -> String {
    "/logmill".to_string()
}

fn default_zk_session_timeout_ms() -> u64 {
    15_000
}

fn default_zk_connection_timeout_ms() -> u64 {
    15_000
}

fn default_zk_retry_count() -> u32 {
    3
}

fn default_zk_retry_delay_ms() -> u64 {
    500
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            zk_host: default_zk_host(),
            zk_path_prefix: default_zk_path_prefix(),
            zk_session_timeout_ms: default_zk_session_timeout_ms(),
            zk_connection_timeout_ms: default_zk_connection_timeout_ms(),
            zk_retry_count: default_zk_retry_count(),
            zk_retry_delay_ms: default_zk_retry_delay_ms(),
        }
    }
}

impl MetadataConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.zk_host, "zk_host")?;
        ensure_non_empty(&self.zk_path_prefix, "zk_path_prefix")?;
        ensure_positive(self.zk_session_timeout_ms, "zk_session_timeout_ms")?;
        ensure_positive(self.zk_connection_timeout_ms, "zk_connection_timeout_ms")
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            namespace: self.zk_path_prefix.clone(),
            session_timeout: Duration::from_millis(self.zk_session_timeout_ms),
            connection_timeout: Duration::from_millis(self.zk_connection_timeout_ms),
            retry_count: self.zk_retry_count,
            retry_delay: Duration::from_millis(self.zk_retry_delay_ms),
        }
    }
}

/// Blob storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub s3_bucket: String,
    #[serde(default = "default_s3_region")]
    pub s3_region: String,
    #[serde(default)]
    pub s3_endpoint: Option<String>,
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            s3_bucket: "logmill-data".to_string(),
            s3_region: default_s3_region(),
            s3_endpoint: None,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.s3_bucket, "s3_bucket")?;
        ensure_non_empty(&self.s3_region, "s3_region")
    }
}

/// Builds components from environment and configuration, enabling easy
/// switching between development and production backends.
pub struct ComponentFactory;

impl ComponentFactory {
    /// Create the blob object store.
    ///
    /// Environment variables:
    /// - `STORAGE_BACKEND`: "memory" (default) or "s3"
    /// - `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`: credentials for
    ///   "s3" (falls back to the instance role when unset)
    pub fn create_object_store(storage: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
        let backend = std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "memory".to_string());

        match backend.as_str() {
            "memory" => {
                info!("using in-memory object store (development mode)");
                Ok(Arc::new(InMemory::new()))
            }
            "s3" => {
                storage.validate()?;
                info!(
                    bucket = %storage.s3_bucket,
                    region = %storage.s3_region,
                    "using S3 object store"
                );

                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(&storage.s3_bucket)
                    .with_region(&storage.s3_region);

                if let Some(endpoint) = &storage.s3_endpoint {
                    info!(endpoint = %endpoint, "using custom S3 endpoint");
                    builder = builder.with_endpoint(endpoint).with_allow_http(true);
                }
                if let Ok(key) = std::env::var("AWS_ACCESS_KEY_ID") {
                    builder = builder.with_access_key_id(&key);
                }
                if let Ok(secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
                    builder = builder.with_secret_access_key(&secret);
                }

                Ok(Arc::new(builder.build()?))
            }
            _ => Err(Error::Config(format!(
                "unknown STORAGE_BACKEND: {backend}. Use 'memory' or 's3'"
            ))),
        }
    }
}
