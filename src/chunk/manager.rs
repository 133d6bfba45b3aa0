//! The chunk manager: single-writer ingestion over rolled-over chunks.

use super::{ChunkInfo, ReadWriteChunk, RolloverStrategy, RolloverTask};
use crate::blob::BlobStore;
use crate::clock::MonotonicClock;
use crate::logstore::{
    HitsAndHistogramAggregator, LogMessage, LogStoreFactory, SearchQuery, SearchResult,
    SearchResultAggregator,
};
use crate::metadata::ChunkCatalog;
use crate::metrics::{Gauge, MetricsRegistry};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const LIVE_MESSAGES_INDEXED: &str = "live_messages_indexed";
pub const LIVE_BYTES_INDEXED: &str = "live_bytes_indexed";
pub const DEFAULT_ROLLOVER_FUTURE_TIMEOUT_MS: u64 = 30_000;

/// Unified write and query API over all the chunks on this node.
///
/// The `add_message` path is used by the single writer, the `query` path
/// by any number of readers. Internally the manager keeps a map of
/// chunks of which at most one is active; writes go to the active chunk
/// until the roll over strategy reports it full, at which point the
/// chunk is sealed and handed to the roll over executor and a fresh
/// chunk becomes active on the next append.
///
/// For capacity planning only one roll over may be in flight at a time:
/// a second submission is rejected synchronously rather than queued, and
/// the indexer is arrested, since falling behind on roll overs means we
/// will never catch up.
pub struct ChunkManager<T: LogMessage> {
    data_directory: PathBuf,
    chunk_data_prefix: String,
    chunk_map: Mutex<HashMap<String, Arc<ReadWriteChunk<T>>>>,
    /// Mutated only by the writer thread; readers take short-lived clones.
    active_chunk: Mutex<Option<Arc<ReadWriteChunk<T>>>>,
    rollover_strategy: Arc<dyn RolloverStrategy>,
    blob_store: Arc<dyn BlobStore>,
    catalog: Option<Arc<ChunkCatalog>>,
    log_store_factory: LogStoreFactory<T>,
    /// Roll over admission control: capacity exactly one, reject on busy.
    rollover_permits: Arc<Semaphore>,
    rollover_future: Mutex<Option<JoinHandle<bool>>>,
    rollover_future_timeout: Duration,
    /// Write-once flag read on every append. Set from the roll over
    /// observer with release ordering; the process is expected to
    /// terminate shortly after it flips.
    stop_ingestion: Arc<AtomicBool>,
    live_messages_indexed: Gauge,
    live_bytes_indexed: Gauge,
    metrics: MetricsRegistry,
    clock: Arc<MonotonicClock>,
}

impl<T: LogMessage> ChunkManager<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chunk_data_prefix: impl Into<String>,
        data_directory: impl Into<PathBuf>,
        rollover_strategy: Arc<dyn RolloverStrategy>,
        blob_store: Arc<dyn BlobStore>,
        catalog: Option<Arc<ChunkCatalog>>,
        log_store_factory: LogStoreFactory<T>,
        rollover_future_timeout: Duration,
        metrics: MetricsRegistry,
    ) -> Self {
        let chunk_data_prefix = chunk_data_prefix.into();
        let data_directory = data_directory.into();
        info!(
            chunk_data_prefix = %chunk_data_prefix,
            data_directory = %data_directory.display(),
            "created chunk manager"
        );
        Self {
            data_directory,
            chunk_data_prefix,
            chunk_map: Mutex::new(HashMap::new()),
            active_chunk: Mutex::new(None),
            rollover_strategy,
            blob_store,
            catalog,
            log_store_factory,
            rollover_permits: Arc::new(Semaphore::new(1)),
            rollover_future: Mutex::new(None),
            rollover_future_timeout,
            stop_ingestion: Arc::new(AtomicBool::new(false)),
            live_messages_indexed: metrics.gauge(LIVE_MESSAGES_INDEXED),
            live_bytes_indexed: metrics.gauge(LIVE_BYTES_INDEXED),
            metrics,
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    /// Ingest one record into the active chunk, creating it if needed,
    /// and initiate a roll over once the strategy reports the chunk full.
    ///
    /// Assumes a single writer; any number of concurrent readers.
    pub async fn add_message(&self, message: &T, msg_size_bytes: u64, offset: i64) -> Result<()> {
        if self.stop_ingestion.load(Ordering::Acquire) {
            warn!("refusing append: ingestion stopped after a roll over failure");
            return Err(Error::IngestionStopped);
        }

        let chunk = self.get_or_create_active_chunk().await?;
        chunk.append(message, msg_size_bytes, offset)?;
        let messages_indexed = self.live_messages_indexed.increment();
        let bytes_indexed = self.live_bytes_indexed.add(msg_size_bytes as i64);

        if self
            .rollover_strategy
            .should_roll_over(bytes_indexed as u64, messages_indexed as u64)
        {
            info!(
                messages_indexed,
                bytes_indexed,
                chunk_id = %chunk.id(),
                "rolling over chunk"
            );
            self.do_rollover(chunk)?;
        }
        Ok(())
    }

    /// Detach the chunk from the write path and submit it to the roll
    /// over executor.
    fn do_rollover(&self, chunk: Arc<ReadWriteChunk<T>>) -> Result<()> {
        // Detach first so the next append opens a fresh chunk.
        *self.active_chunk.lock() = None;
        self.live_bytes_indexed.set(0);
        self.live_messages_indexed.set(0);
        chunk.set_last_updated(self.clock.now_epoch_secs());

        let permit = match Arc::clone(&self.rollover_permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                // The previous roll over has not finished: the indexer is
                // over-subscribed and cannot keep up. Arrest ingestion.
                self.stop_ingestion.store(true, Ordering::Release);
                return Err(Error::RolloverInProgress(chunk.id()));
            }
        };

        let task = RolloverTask::new(
            Arc::clone(&chunk),
            Arc::clone(&self.blob_store),
            self.catalog.clone(),
            Arc::clone(&self.clock),
            &self.metrics,
        );
        let stop_ingestion = Arc::clone(&self.stop_ingestion);
        let handle = tokio::spawn(async move {
            let success = task.run().await;
            if !success {
                stop_ingestion.store(true, Ordering::Release);
            }
            drop(permit);
            success
        });
        *self.rollover_future.lock() = Some(handle);
        Ok(())
    }

    /// Roll over the active chunk, if any. Used on shutdown so the data
    /// is persisted to the remote store before the node goes away.
    pub fn roll_over_active_chunk(&self) -> Result<()> {
        let active = self.active_chunk.lock().clone();
        match active {
            Some(chunk) => {
                info!(chunk_id = %chunk.id(), "rolling over active chunk");
                self.do_rollover(chunk)
            }
            None => Ok(()),
        }
    }

    async fn get_or_create_active_chunk(&self) -> Result<Arc<ReadWriteChunk<T>>> {
        if let Some(chunk) = self.active_chunk.lock().clone() {
            return Ok(chunk);
        }

        let chunk_id = Uuid::new_v4().to_string();
        let chunk_dir = self
            .data_directory
            .join(&self.chunk_data_prefix)
            .join(&chunk_id);
        let store = (self.log_store_factory)(&chunk_dir)?;
        let chunk = Arc::new(ReadWriteChunk::new(
            chunk_id.clone(),
            self.chunk_data_prefix.clone(),
            store,
            self.clock.now_epoch_secs(),
        ));
        {
            let mut chunk_map = self.chunk_map.lock();
            chunk_map.insert(chunk_id.clone(), Arc::clone(&chunk));
            *self.active_chunk.lock() = Some(Arc::clone(&chunk));
        }

        if let Some(catalog) = &self.catalog {
            if let Err(e) = catalog.register_chunk(&chunk.info()).await {
                warn!(chunk_id = %chunk_id, error = %e, "failed to register chunk in catalog");
            }
        }
        Ok(chunk)
    }

    /// Query every chunk whose data intersects the query's time range
    /// and merge the per-chunk results.
    ///
    /// Per-chunk failures are counted into the result's `failed_chunks`;
    /// the merged successful portion is still returned.
    pub fn query(&self, query: &SearchQuery) -> SearchResult<T> {
        let started = Instant::now();
        let chunks: Vec<Arc<ReadWriteChunk<T>>> =
            self.chunk_map.lock().values().cloned().collect();

        let start_secs = query.start_time_epoch_ms / 1000;
        let end_secs = query.end_time_epoch_ms / 1000;
        let mut results = Vec::new();
        let mut failed_chunks = 0;
        for chunk in chunks {
            if !chunk.contains_data_in_time_range(start_secs, end_secs) {
                continue;
            }
            debug!(chunk_id = %chunk.id(), "searching chunk");
            match chunk.query(query) {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(chunk_id = %chunk.id(), error = %e, "chunk query failed");
                    failed_chunks += 1;
                }
            }
        }

        let mut merged = HitsAndHistogramAggregator.aggregate(results, query);
        merged.failed_chunks += failed_chunks;
        merged.took_micros = started.elapsed().as_micros() as u64;
        merged
    }

    /// Evict chunks by id: remove from the map, then close and clean up.
    /// Failures are logged per entry and do not halt the batch.
    pub fn remove_stale_chunks(&self, stale_chunk_ids: &[String]) {
        if stale_chunk_ids.is_empty() {
            return;
        }
        info!(?stale_chunk_ids, "removing stale chunks");
        if self.chunk_map.lock().is_empty() {
            warn!("chunk map is empty while removing stale chunks, possible race");
        }

        for chunk_id in stale_chunk_ids {
            // Remove from the map first so queries stop seeing it.
            let removed = self.chunk_map.lock().remove(chunk_id);
            match removed {
                Some(chunk) => {
                    if let Err(e) = chunk.close() {
                        warn!(chunk_id = %chunk_id, error = %e, "failed to close stale chunk");
                    }
                    if let Err(e) = chunk.cleanup() {
                        warn!(chunk_id = %chunk_id, error = %e, "failed to clean up stale chunk");
                    }
                    info!(chunk_id = %chunk_id, "deleted and cleaned up stale chunk");
                }
                None => {
                    warn!(chunk_id = %chunk_id, "stale chunk not found in chunk map");
                }
            }
        }
    }

    /// Close the manager: stop accepting roll overs, wait for the
    /// in-flight roll over up to the configured timeout, then close every
    /// chunk. Never fails; the close pass must complete for data
    /// integrity.
    pub async fn close(&self) {
        info!("closing chunk manager");

        // Stop the roll over executor from taking on new tasks.
        self.rollover_permits.close();

        let pending = self.rollover_future.lock().take();
        if let Some(handle) = pending {
            info!("waiting for in-flight roll over before closing");
            match tokio::time::timeout(self.rollover_future_timeout, handle).await {
                Ok(Ok(success)) => info!(success, "roll over completed before close"),
                Ok(Err(e)) => warn!(error = %e, "roll over task failed during close"),
                // The roll over itself is not cancelled; we accept the
                // possibility of orphan snapshot work.
                Err(_) => warn!("timed out waiting for in-flight roll over"),
            }
        }

        let chunks: Vec<Arc<ReadWriteChunk<T>>> =
            self.chunk_map.lock().values().cloned().collect();
        for chunk in chunks {
            if let Err(e) = chunk.close() {
                warn!(chunk_id = %chunk.id(), error = %e, "failed to close chunk");
            }
        }
        info!("closed chunk manager");
    }

    /// Await the most recently submitted roll over, returning its outcome.
    pub async fn await_pending_rollover(&self) -> Option<bool> {
        let handle = self.rollover_future.lock().take();
        match handle {
            Some(handle) => handle.await.ok(),
            None => None,
        }
    }

    pub fn active_chunk(&self) -> Option<Arc<ReadWriteChunk<T>>> {
        self.active_chunk.lock().clone()
    }

    pub fn chunk_infos(&self) -> Vec<ChunkInfo> {
        self.chunk_map.lock().values().map(|c| c.info()).collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_map.lock().len()
    }

    pub fn is_ingestion_stopped(&self) -> bool {
        self.stop_ingestion.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }
}
