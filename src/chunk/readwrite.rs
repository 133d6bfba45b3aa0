//! A single read-write chunk.

use super::{ChunkInfo, ChunkState};
use crate::logstore::{IndexSnapshot, LogMessage, LogStore, SearchQuery, SearchResult};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// One chunk: exactly one log store for its lifetime plus the metadata
/// record tracking its bounds and lifecycle state.
///
/// The writer appends through the chunk manager; readers query
/// concurrently. Mutation of the info record is guarded by a lock held
/// only across the field updates, never across store I/O.
pub struct ReadWriteChunk<T: LogMessage> {
    store: Arc<dyn LogStore<T>>,
    info: RwLock<ChunkInfo>,
}

impl<T: LogMessage> ReadWriteChunk<T> {
    pub fn new(
        chunk_id: String,
        chunk_prefix: String,
        store: Arc<dyn LogStore<T>>,
        created_epoch_secs: i64,
    ) -> Self {
        info!(chunk_id = %chunk_id, chunk_prefix = %chunk_prefix, "created new chunk");
        Self {
            store,
            info: RwLock::new(ChunkInfo::new(chunk_id, chunk_prefix, created_epoch_secs)),
        }
    }

    pub fn id(&self) -> String {
        self.info.read().chunk_id.clone()
    }

    pub fn info(&self) -> ChunkInfo {
        self.info.read().clone()
    }

    /// Append one record. Only a `Live` chunk accepts appends.
    pub fn append(&self, message: &T, msg_size_bytes: u64, offset: i64) -> Result<()> {
        {
            let info = self.info.read();
            if info.state != ChunkState::Live {
                return Err(Error::ReadOnlyChunk(info.chunk_id.clone()));
            }
        }
        self.store.append(message)?;

        let mut info = self.info.write();
        info.track_data_time(message.timestamp_ms() / 1000);
        info.message_count += 1;
        info.bytes_indexed += msg_size_bytes;
        info.max_offset = info.max_offset.max(offset);
        Ok(())
    }

    /// Whether this chunk holds data intersecting `[start_secs, end_secs]`.
    pub fn contains_data_in_time_range(&self, start_secs: i64, end_secs: i64) -> bool {
        self.info
            .read()
            .contains_data_in_time_range(start_secs, end_secs)
    }

    pub fn query(&self, query: &SearchQuery) -> Result<SearchResult<T>> {
        self.store.search(query)
    }

    pub fn commit(&self) -> Result<()> {
        self.store.commit()
    }

    pub fn take_snapshot(&self) -> Result<IndexSnapshot> {
        self.store.take_snapshot()
    }

    pub fn set_last_updated(&self, epoch_secs: i64) {
        self.info.write().last_updated_epoch_secs = epoch_secs;
    }

    /// Seal the chunk: no more appends.
    pub fn mark_read_only(&self, epoch_secs: i64) {
        let mut info = self.info.write();
        info.state = ChunkState::ReadOnly;
        info.last_updated_epoch_secs = epoch_secs;
    }

    pub fn mark_uploaded(&self, snapshot_path: String, epoch_secs: i64) {
        let mut info = self.info.write();
        info.state = ChunkState::Uploaded;
        info.snapshot_path = Some(snapshot_path);
        info.last_updated_epoch_secs = epoch_secs;
    }

    pub fn mark_failed(&self, epoch_secs: i64) {
        let mut info = self.info.write();
        info.state = ChunkState::Failed;
        info.last_updated_epoch_secs = epoch_secs;
    }

    pub fn close(&self) -> Result<()> {
        self.store.close()
    }

    /// Remove the chunk's on-disk directory.
    pub fn cleanup(&self) -> Result<()> {
        self.store.cleanup()
    }
}
