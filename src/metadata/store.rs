//! Metadata store API and the coordinator-backed implementation.

use super::{
    CoordError, Coordinator, CoordinatorSession, CreateMode, FatalErrorHandler, SessionState,
    METADATA_FAILED_COUNTER, METADATA_READ_COUNTER, METADATA_WRITE_COUNTER, ZK_FAILED_COUNTER,
};
use crate::config::MetadataConfig;
use crate::metrics::{Counter, MetricsRegistry};
use crate::{Error, MetadataError, MetadataResult, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The metadata store API consumed by the rest of the node.
///
/// Every operation executes against the backing coordination service
/// and resolves on its worker pool. `NoNode` and `NodeExists` are
/// expected, recoverable outcomes; `Internal` covers service-side or
/// protocol failures.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Create a persistent node. With `create_missing_parents` the whole
    /// missing ancestry is materialized in one call.
    async fn create(
        &self,
        path: &str,
        data: &[u8],
        create_missing_parents: bool,
    ) -> MetadataResult<()>;

    /// Create an ephemeral node tied to this store's session.
    async fn create_ephemeral(&self, path: &str, data: &[u8]) -> MetadataResult<()>;

    /// Replace the data of an existing node.
    async fn put(&self, path: &str, data: &[u8]) -> MetadataResult<()>;

    async fn get(&self, path: &str) -> MetadataResult<Vec<u8>>;

    async fn exists(&self, path: &str) -> MetadataResult<bool>;

    /// Delete a node. Fails while the node has children.
    async fn delete(&self, path: &str) -> MetadataResult<()>;

    /// Names of the direct children of `path`.
    async fn get_children(&self, path: &str) -> MetadataResult<Vec<String>>;

    /// End the session; ephemeral nodes created through this store are
    /// destroyed by the service.
    async fn close(&self);
}

/// [`MetadataStore`] over a [`Coordinator`] backend.
///
/// Maintains a single logical session. A watcher task observes session
/// state: on expiry every ephemeral node is already gone, so the
/// configured [`FatalErrorHandler`] is invoked and the process is
/// expected to exit.
pub struct CoordinatorMetadataStore {
    session: Box<dyn CoordinatorSession>,
    read_counter: Counter,
    write_counter: Counter,
    failure_counter: Counter,
    zk_failure_counter: Counter,
    watcher_shutdown: CancellationToken,
}

impl CoordinatorMetadataStore {
    /// Connect a new session and start the session-expiry watcher.
    pub async fn connect(
        coordinator: Arc<dyn Coordinator>,
        config: &MetadataConfig,
        fatal_error_handler: Arc<dyn FatalErrorHandler>,
        metrics: &MetricsRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let options = config.connect_options();
        let session = coordinator
            .connect(&options)
            .await
            .map_err(|e| MetadataError::Internal(format!("connecting session: {e}")))?;

        let watcher_shutdown = CancellationToken::new();
        let token = watcher_shutdown.clone();
        let mut events = session.session_events();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = events.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if *events.borrow() == SessionState::Expired {
                            warn!("coordination session expired, ephemeral nodes are gone");
                            fatal_error_handler
                                .handle_fatal(&Error::Metadata(MetadataError::SessionExpired));
                            break;
                        }
                    }
                }
            }
        });

        info!(
            zk_host = %config.zk_host,
            path_prefix = %config.zk_path_prefix,
            session_timeout_ms = config.zk_session_timeout_ms,
            connection_timeout_ms = config.zk_connection_timeout_ms,
            "connected metadata store session"
        );

        Ok(Self {
            session,
            read_counter: metrics.counter(METADATA_READ_COUNTER),
            write_counter: metrics.counter(METADATA_WRITE_COUNTER),
            failure_counter: metrics.counter(METADATA_FAILED_COUNTER),
            zk_failure_counter: metrics.counter(ZK_FAILED_COUNTER),
            watcher_shutdown,
        })
    }

    /// Map a service failure, counting it. `NoNode`/`NodeExists` are
    /// handled at the call sites where they are expected outcomes;
    /// everything reaching here is a failure.
    fn service_failure(&self, err: CoordError, action: &str, path: &str) -> MetadataError {
        match err {
            CoordError::BadPath(p) => {
                self.failure_counter.increment();
                warn!(path = %p, "metadata operation failed on an invalid path");
                MetadataError::Internal(format!("{action} at {path}"))
            }
            CoordError::SessionExpired => {
                self.zk_failure_counter.increment();
                warn!(path, "metadata operation failed: session expired");
                MetadataError::SessionExpired
            }
            other => {
                self.zk_failure_counter.increment();
                warn!(path, error = %other, "metadata operation failed against the service");
                MetadataError::Internal(format!("{action} at {path}"))
            }
        }
    }
}

#[async_trait]
impl MetadataStore for CoordinatorMetadataStore {
    async fn create(
        &self,
        path: &str,
        data: &[u8],
        create_missing_parents: bool,
    ) -> MetadataResult<()> {
        self.write_counter.increment();
        info!(path, create_missing_parents, "creating node");
        match self
            .session
            .create(path, data.to_vec(), CreateMode::Persistent, create_missing_parents)
            .await
        {
            Ok(()) => Ok(()),
            Err(CoordError::NodeExists(p)) => Err(MetadataError::NodeExists(p)),
            Err(e) => Err(self.service_failure(e, "creating a node", path)),
        }
    }

    async fn create_ephemeral(&self, path: &str, data: &[u8]) -> MetadataResult<()> {
        self.write_counter.increment();
        info!(path, "creating ephemeral node");
        match self
            .session
            .create(path, data.to_vec(), CreateMode::Ephemeral, false)
            .await
        {
            Ok(()) => Ok(()),
            Err(CoordError::NodeExists(p)) => Err(MetadataError::NodeExists(p)),
            Err(e) => Err(self.service_failure(e, "creating an ephemeral node", path)),
        }
    }

    async fn put(&self, path: &str, data: &[u8]) -> MetadataResult<()> {
        self.write_counter.increment();
        info!(path, "setting node data");
        match self.session.set_data(path, data.to_vec()).await {
            Ok(()) => Ok(()),
            Err(CoordError::NoNode(p)) => Err(MetadataError::NoNode(p)),
            Err(e) => Err(self.service_failure(e, "updating node", path)),
        }
    }

    async fn get(&self, path: &str) -> MetadataResult<Vec<u8>> {
        self.read_counter.increment();
        debug!(path, "fetching node data");
        match self.session.get_data(path).await {
            Ok(data) => Ok(data),
            Err(CoordError::NoNode(p)) => Err(MetadataError::NoNode(p)),
            Err(e) => Err(self.service_failure(e, "fetching node", path)),
        }
    }

    async fn exists(&self, path: &str) -> MetadataResult<bool> {
        self.read_counter.increment();
        debug!(path, "checking node existence");
        match self.session.exists(path).await {
            Ok(exists) => Ok(exists),
            Err(e) => Err(self.service_failure(e, "checking exists", path)),
        }
    }

    async fn delete(&self, path: &str) -> MetadataResult<()> {
        self.write_counter.increment();
        info!(path, "deleting node");
        match self.session.delete(path).await {
            Ok(()) => Ok(()),
            Err(CoordError::NoNode(p)) => Err(MetadataError::NoNode(p)),
            Err(e) => Err(self.service_failure(e, "deleting node", path)),
        }
    }

    async fn get_children(&self, path: &str) -> MetadataResult<Vec<String>> {
        self.read_counter.increment();
        debug!(path, "fetching children");
        match self.session.get_children(path).await {
            Ok(children) => Ok(children),
            Err(CoordError::NoNode(p)) => Err(MetadataError::NoNode(p)),
            Err(e) => Err(self.service_failure(e, "fetching children", path)),
        }
    }

    async fn close(&self) {
        info!("closing metadata store session");
        self.watcher_shutdown.cancel();
        self.session.close().await;
        info!("closed metadata store session");
    }
}
