//! Chunked storage: one chunk per index store, rolled over as it fills.
//!
//! Log data is stored as chunks, each backed by a single log store
//! instance, so a chunk is identical to a shard. The chunk manager
//! funnels the single writer into the active chunk and fans readers out
//! over every chunk whose time range intersects the query. When the
//! active chunk reaches the roll over point it is sealed, its snapshot
//! is uploaded to the blob store, and a fresh chunk takes over.

mod manager;
mod readwrite;
mod rollover;

pub use manager::{ChunkManager, DEFAULT_ROLLOVER_FUTURE_TIMEOUT_MS, LIVE_BYTES_INDEXED, LIVE_MESSAGES_INDEXED};
pub use readwrite::ReadWriteChunk;
pub use rollover::{
    RolloverStrategy, RolloverTask, SizeOrMessageCountStrategy, ROLLOVERS_COMPLETED,
    ROLLOVERS_FAILED, ROLLOVERS_INITIATED, ROLLOVER_LAST_DURATION_MS,
};

use serde::{Deserialize, Serialize};

/// Lifecycle state of a chunk.
///
/// `Live` → `ReadOnly` (roll over start) → `Uploaded` (roll over
/// success) or `Failed` (roll over failure). There is no transition out
/// of `Uploaded` or `Failed` back to writable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkState {
    Live,
    ReadOnly,
    Uploaded,
    Failed,
}

/// Metadata record describing one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub chunk_id: String,
    /// Logical namespace shared by every chunk of this node.
    pub chunk_prefix: String,
    /// Minimum record timestamp; meaningful once `message_count > 0`.
    pub data_start_epoch_secs: i64,
    /// Maximum record timestamp; meaningful once `message_count > 0`.
    pub data_end_epoch_secs: i64,
    pub created_epoch_secs: i64,
    pub last_updated_epoch_secs: i64,
    pub message_count: u64,
    pub bytes_indexed: u64,
    /// Highest source offset ingested, for at-least-once resume.
    pub max_offset: i64,
    pub state: ChunkState,
    /// Blob store location of the uploaded snapshot, set on upload.
    pub snapshot_path: Option<String>,
}

impl ChunkInfo {
    pub fn new(chunk_id: String, chunk_prefix: String, created_epoch_secs: i64) -> Self {
        Self {
            chunk_id,
            chunk_prefix,
            data_start_epoch_secs: i64::MAX,
            data_end_epoch_secs: i64::MIN,
            created_epoch_secs,
            last_updated_epoch_secs: created_epoch_secs,
            message_count: 0,
            bytes_indexed: 0,
            max_offset: -1,
            state: ChunkState::Live,
            snapshot_path: None,
        }
    }

    /// Widen the data time bounds to cover `timestamp_secs`.
    pub fn track_data_time(&mut self, timestamp_secs: i64) {
        self.data_start_epoch_secs = self.data_start_epoch_secs.min(timestamp_secs);
        self.data_end_epoch_secs = self.data_end_epoch_secs.max(timestamp_secs);
    }

    /// Whether this chunk's data intersects `[start_secs, end_secs]`.
    /// An empty chunk intersects nothing.
    pub fn contains_data_in_time_range(&self, start_secs: i64, end_secs: i64) -> bool {
        self.message_count > 0
            && start_secs <= self.data_end_epoch_secs
            && end_secs >= self.data_start_epoch_secs
    }
}
