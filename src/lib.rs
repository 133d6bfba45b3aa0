//! # logmill
//!
//! A single-node log indexing and search engine built around chunked,
//! append-only index shards.
//!
//! Incoming records are appended to the active chunk's inverted index.
//! When the chunk fills past the roll over threshold it is sealed, its
//! snapshot uploaded to durable object storage, and a fresh chunk opens
//! to continue ingestion. Readers query the union of all local chunks
//! and receive one merged, bounded result.
//!
//! ## Architecture
//!
//! - **Chunk Manager**: funnels the single writer into the active chunk,
//!   enforces roll over admission control, fans queries out over chunks
//! - **Roll over task**: seals a full chunk and uploads its snapshot,
//!   serially, arresting ingestion on failure
//! - **Metadata store**: hierarchical coordination store with persistent
//!   catalog entries and session-scoped liveness nodes

pub mod blob;
pub mod chunk;
pub mod clock;
pub mod config;
pub mod histogram;
pub mod logstore;
pub mod metadata;
pub mod metrics;

mod error;

pub use error::{Error, MetadataError, MetadataResult, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::blob::{BlobStore, ObjectStoreBlobFs};
    pub use crate::chunk::{
        ChunkInfo, ChunkManager, ChunkState, RolloverStrategy, SizeOrMessageCountStrategy,
    };
    pub use crate::config::{ChunkManagerConfig, MetadataConfig, NodeConfig, StorageConfig};
    pub use crate::logstore::{
        LogMessage, LogRecord, LogStore, SearchQuery, SearchResult,
    };
    pub use crate::metadata::{ChunkCatalog, MemoryCoordinator, MetadataStore};
    pub use crate::{Error, Result};
}
