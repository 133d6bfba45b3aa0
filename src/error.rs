//! Error types for logmill

/// Result type alias for logmill operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for metadata store operations
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// Error types for logmill
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Ingestion has been arrested after a failed roll over; the process
    /// is expected to exit shortly.
    #[error("ingestion is stopped after a chunk roll over failure")]
    IngestionStopped,
    /// A chunk roll over was demanded while the previous one was still
    /// running. Indexing faster than we can roll over means we cannot
    /// keep up.
    #[error("chunk roll over already in progress: {0}")]
    RolloverInProgress(String),
    /// A record could not be appended to the index store
    #[error("index append failed: {0}")]
    IndexAppend(String),
    /// Chunk is not present in the chunk map
    #[error("chunk not found: {0}")]
    ChunkNotFound(String),
    /// Append attempted against a sealed chunk
    #[error("chunk {0} is read only")]
    ReadOnlyChunk(String),
    /// Metadata store error
    #[error("metadata store error: {0}")]
    Metadata(#[from] MetadataError),
    /// Object store errors
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
    /// Timeout
    #[error("operation timed out")]
    Timeout,
    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Metadata-store-specific errors
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// The node (or a required parent) does not exist
    #[error("no node at {0}")]
    NoNode(String),
    /// A node already exists at the path
    #[error("node already exists at {0}")]
    NodeExists(String),
    /// Service-side or protocol failure; callers may retry at a higher level
    #[error("internal metadata store error: {0}")]
    Internal(String),
    /// The coordination session expired; ephemeral nodes are gone
    #[error("coordination session expired")]
    SessionExpired,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
