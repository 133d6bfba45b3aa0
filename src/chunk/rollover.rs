//! Roll over: sealing a full chunk and uploading its snapshot.

use super::{ChunkState, ReadWriteChunk};
use crate::blob::BlobStore;
use crate::clock::MonotonicClock;
use crate::logstore::LogMessage;
use crate::metadata::ChunkCatalog;
use crate::metrics::{Counter, Gauge, MetricsRegistry};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub const ROLLOVERS_INITIATED: &str = "rollovers_initiated";
pub const ROLLOVERS_COMPLETED: &str = "rollovers_completed";
pub const ROLLOVERS_FAILED: &str = "rollovers_failed";
pub const ROLLOVER_LAST_DURATION_MS: &str = "rollover_last_duration_ms";

/// Pure predicate deciding when the active chunk is full.
///
/// Implementations must be monotone non-decreasing: once true for
/// `(bytes, messages)`, true for any component-wise larger pair.
/// Otherwise the manager would oscillate between rolling and refilling.
pub trait RolloverStrategy: Send + Sync {
    fn should_roll_over(&self, bytes_indexed: u64, messages_indexed: u64) -> bool;
}

/// Roll over when either axis reaches its threshold.
#[derive(Debug, Clone, Copy)]
pub struct SizeOrMessageCountStrategy {
    max_bytes_per_chunk: u64,
    max_messages_per_chunk: u64,
}

impl SizeOrMessageCountStrategy {
    pub fn new(max_bytes_per_chunk: u64, max_messages_per_chunk: u64) -> Self {
        Self {
            max_bytes_per_chunk,
            max_messages_per_chunk,
        }
    }
}

impl RolloverStrategy for SizeOrMessageCountStrategy {
    fn should_roll_over(&self, bytes_indexed: u64, messages_indexed: u64) -> bool {
        bytes_indexed >= self.max_bytes_per_chunk
            || messages_indexed >= self.max_messages_per_chunk
    }
}

/// The unit of work run by the roll over executor.
///
/// Steps, each failing the whole task: commit the chunk's index, take a
/// reference-counted snapshot, upload every snapshot file under
/// `<chunk_id>/`, then record the `Uploaded` state (and catalog entry).
/// The snapshot reference is released on every exit path; the chunk is
/// sealed read-only before any upload begins.
pub struct RolloverTask<T: LogMessage> {
    chunk: Arc<ReadWriteChunk<T>>,
    blob_store: Arc<dyn BlobStore>,
    catalog: Option<Arc<ChunkCatalog>>,
    clock: Arc<MonotonicClock>,
    initiated: Counter,
    completed: Counter,
    failed: Counter,
    last_duration_ms: Gauge,
}

impl<T: LogMessage> RolloverTask<T> {
    pub fn new(
        chunk: Arc<ReadWriteChunk<T>>,
        blob_store: Arc<dyn BlobStore>,
        catalog: Option<Arc<ChunkCatalog>>,
        clock: Arc<MonotonicClock>,
        metrics: &MetricsRegistry,
    ) -> Self {
        Self {
            chunk,
            blob_store,
            catalog,
            clock,
            initiated: metrics.counter(ROLLOVERS_INITIATED),
            completed: metrics.counter(ROLLOVERS_COMPLETED),
            failed: metrics.counter(ROLLOVERS_FAILED),
            last_duration_ms: metrics.gauge(ROLLOVER_LAST_DURATION_MS),
        }
    }

    /// Run the roll over to completion. The returned flag is the terminal
    /// event observed by the chunk manager: `false` arrests ingestion.
    pub async fn run(self) -> bool {
        let chunk_id = self.chunk.id();
        let started = Instant::now();
        self.initiated.increment();
        info!(chunk_id = %chunk_id, "starting chunk roll over");

        self.chunk.mark_read_only(self.clock.now_epoch_secs());

        let outcome = self.run_inner(&chunk_id).await;
        self.last_duration_ms
            .set(started.elapsed().as_millis() as i64);

        match outcome {
            Ok(uploaded_files) => {
                self.completed.increment();
                info!(
                    chunk_id = %chunk_id,
                    uploaded_files,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "chunk roll over completed"
                );
                true
            }
            Err(e) => {
                self.failed.increment();
                self.chunk.mark_failed(self.clock.now_epoch_secs());
                warn!(chunk_id = %chunk_id, error = %e, "chunk roll over failed");
                false
            }
        }
    }

    async fn run_inner(&self, chunk_id: &str) -> Result<usize> {
        self.chunk.commit()?;

        let snapshot = self.chunk.take_snapshot()?;
        // Upload while the snapshot pins the segment files; the guard is
        // dropped even when the upload fails.
        let upload_result = self
            .blob_store
            .upload_files(chunk_id, snapshot.files())
            .await;
        drop(snapshot);
        let uploaded = upload_result?;

        let snapshot_path = format!("{}/{}", self.blob_store.base_uri(), chunk_id);
        if let Some(catalog) = &self.catalog {
            let mut info = self.chunk.info();
            info.state = ChunkState::Uploaded;
            info.snapshot_path = Some(snapshot_path.clone());
            info.last_updated_epoch_secs = self.clock.now_epoch_secs();
            catalog.upsert_chunk(&info).await?;
        }
        self.chunk
            .mark_uploaded(snapshot_path, self.clock.now_epoch_secs());
        Ok(uploaded.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::ObjectStoreBlobFs;
    use crate::logstore::{LocalLogStore, LogRecord, LogStore};
    use object_store::memory::InMemory;
    use tempfile::TempDir;

    #[test]
    fn test_strategy_triggers_on_either_axis() {
        let strategy = SizeOrMessageCountStrategy::new(1_000, 10);
        assert!(!strategy.should_roll_over(999, 9));
        assert!(strategy.should_roll_over(1_000, 0));
        assert!(strategy.should_roll_over(0, 10));
        assert!(strategy.should_roll_over(5_000, 50));
    }

    #[test]
    fn test_strategy_is_monotone() {
        let strategy = SizeOrMessageCountStrategy::new(100, 10);
        for bytes in 0..200 {
            for messages in 0..20 {
                if strategy.should_roll_over(bytes, messages) {
                    assert!(strategy.should_roll_over(bytes + 1, messages));
                    assert!(strategy.should_roll_over(bytes, messages + 1));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_task_uploads_and_marks_chunk() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalLogStore::open(dir.path()).unwrap());
        let chunk = Arc::new(ReadWriteChunk::new(
            "c1".to_string(),
            "logs".to_string(),
            store as Arc<dyn crate::logstore::LogStore<LogRecord>>,
            100,
        ));
        chunk
            .append(&LogRecord::new("m1", "api", 1_000, "one"), 10, 0)
            .unwrap();

        let blob: Arc<dyn BlobStore> =
            Arc::new(ObjectStoreBlobFs::new(Arc::new(InMemory::new()), "bucket"));
        let metrics = MetricsRegistry::new();
        let task = RolloverTask::new(
            Arc::clone(&chunk),
            Arc::clone(&blob),
            None,
            Arc::new(MonotonicClock::new()),
            &metrics,
        );

        assert!(task.run().await);

        let info = chunk.info();
        assert_eq!(info.state, ChunkState::Uploaded);
        assert_eq!(info.snapshot_path.as_deref(), Some("s3://bucket/c1"));
        assert_eq!(blob.list_prefix("c1").await.unwrap().len(), 1);
        assert_eq!(metrics.counter_value(ROLLOVERS_COMPLETED), 1);
        assert_eq!(metrics.counter_value(ROLLOVERS_FAILED), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_marks_chunk_failed() {
        struct FailingBlobStore;

        #[async_trait::async_trait]
        impl BlobStore for FailingBlobStore {
            async fn upload_files(
                &self,
                _prefix: &str,
                _files: &[std::path::PathBuf],
            ) -> Result<Vec<String>> {
                Err(crate::Error::Internal("upload refused".to_string()))
            }
            async fn list_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
                Ok(Vec::new())
            }
            async fn delete_prefix(&self, _prefix: &str) -> Result<usize> {
                Ok(0)
            }
            fn base_uri(&self) -> String {
                "s3://failing".to_string()
            }
        }

        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalLogStore::open(dir.path()).unwrap());
        let chunk = Arc::new(ReadWriteChunk::new(
            "c1".to_string(),
            "logs".to_string(),
            Arc::clone(&store) as Arc<dyn crate::logstore::LogStore<LogRecord>>,
            100,
        ));
        chunk
            .append(&LogRecord::new("m1", "api", 1_000, "one"), 10, 0)
            .unwrap();

        let metrics = MetricsRegistry::new();
        let task = RolloverTask::new(
            Arc::clone(&chunk),
            Arc::new(FailingBlobStore),
            None,
            Arc::new(MonotonicClock::new()),
            &metrics,
        );

        assert!(!task.run().await);
        assert_eq!(chunk.info().state, ChunkState::Failed);
        assert_eq!(metrics.counter_value(ROLLOVERS_FAILED), 1);
        // Snapshot guard was released on the failure path.
        store.cleanup().unwrap();
    }
}
