//! Cluster-visible metadata store.
//!
//! A hierarchical path→bytes store backed by a ZooKeeper-style
//! coordination service. Nodes are persistent or ephemeral (tied to the
//! client session); ephemeral nodes signal liveness (`/live/<node-id>`)
//! while persistent nodes hold the chunk catalog
//! (`/chunks/<chunk-id>`). Session expiry destroys every ephemeral node
//! created under the session and is treated as fatal at this layer: a
//! higher-level orchestrator restarts the process.

mod catalog;
mod memory;
mod store;

pub use catalog::{ChunkCatalog, CHUNKS_ROOT, LIVE_NODES_ROOT};
pub use memory::MemoryCoordinator;
pub use store::{CoordinatorMetadataStore, MetadataStore};

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tracing::error;

pub const METADATA_READ_COUNTER: &str = "metadata.read";
pub const METADATA_WRITE_COUNTER: &str = "metadata.write";
pub const METADATA_FAILED_COUNTER: &str = "metadata.failed";
pub const ZK_FAILED_COUNTER: &str = "metadata.failed.zk";

/// Whether a node outlives the creating session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    /// Destroyed when the creating session ends. Ephemeral nodes cannot
    /// have children.
    Ephemeral,
}

/// State of the logical session with the coordination service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Expired,
}

/// Errors surfaced by a coordination backend.
#[derive(Debug, thiserror::Error)]
pub enum CoordError {
    #[error("no node at {0}")]
    NoNode(String),
    #[error("node already exists at {0}")]
    NodeExists(String),
    #[error("node {0} has children")]
    NotEmpty(String),
    #[error("ephemeral node {0} cannot have children")]
    NoChildrenForEphemerals(String),
    #[error("invalid path: {0}")]
    BadPath(String),
    #[error("connection to coordination service lost")]
    ConnectionLoss,
    #[error("coordination session expired")]
    SessionExpired,
}

pub type CoordResult<T> = std::result::Result<T, CoordError>;

/// Connection parameters for a coordination backend.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Root under which every path of this client is namespaced.
    pub namespace: String,
    pub session_timeout: Duration,
    pub connection_timeout: Duration,
    /// n-times retry policy applied by the backend.
    pub retry_count: u32,
    pub retry_delay: Duration,
}

/// A coordination service endpoint that can open sessions.
#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn connect(&self, options: &ConnectOptions) -> CoordResult<Box<dyn CoordinatorSession>>;
}

/// One logical session with the coordination service.
///
/// Operations observe the service's linearizability per path; the store
/// makes no further ordering promises.
#[async_trait]
pub trait CoordinatorSession: Send + Sync {
    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
        create_missing_parents: bool,
    ) -> CoordResult<()>;

    async fn set_data(&self, path: &str, data: Vec<u8>) -> CoordResult<()>;

    async fn get_data(&self, path: &str) -> CoordResult<Vec<u8>>;

    async fn exists(&self, path: &str) -> CoordResult<bool>;

    async fn delete(&self, path: &str) -> CoordResult<()>;

    async fn get_children(&self, path: &str) -> CoordResult<Vec<String>>;

    /// Watch channel publishing session state changes.
    fn session_events(&self) -> watch::Receiver<SessionState>;

    /// End the session; the service destroys its ephemeral nodes.
    async fn close(&self);
}

/// Invoked on unrecoverable conditions (session expiry, roll over
/// failure escalation). By contract the handler causes process
/// termination; recovery happens by restart.
pub trait FatalErrorHandler: Send + Sync {
    fn handle_fatal(&self, error: &crate::Error);
}

/// Logs the fatal condition. Suitable for embedding in tests and tools
/// that manage shutdown themselves.
#[derive(Debug, Default)]
pub struct LoggingFatalErrorHandler;

impl FatalErrorHandler for LoggingFatalErrorHandler {
    fn handle_fatal(&self, error: &crate::Error) {
        error!(error = %error, "fatal error reported; process should terminate");
    }
}
