//! In-process coordination service for development and testing.
//!
//! Implements the full node-hierarchy and session semantics the store
//! relies on: persistent and ephemeral nodes, missing-parent
//! materialization, ephemeral ownership and destruction on session end,
//! session-expiry events, and an availability switch for outage tests.
//! Shareable across store instances, so a "fresh session against the
//! same backend" is just another `connect`.

use super::{
    ConnectOptions, CoordError, CoordResult, Coordinator, CoordinatorSession, CreateMode,
    SessionState,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
    mode: CreateMode,
    owner_session: Option<u64>,
}

#[derive(Debug, Default)]
struct ServiceState {
    /// Full path → node. BTreeMap keeps children scans ordered.
    nodes: RwLock<BTreeMap<String, Node>>,
    sessions: DashMap<u64, watch::Sender<SessionState>>,
    next_session_id: AtomicU64,
    unavailable: AtomicBool,
}

impl ServiceState {
    fn end_session(&self, session_id: u64, expired: bool) {
        let Some((_, events)) = self.sessions.remove(&session_id) else {
            return;
        };
        let removed: Vec<String> = {
            let mut nodes = self.nodes.write();
            let doomed: Vec<String> = nodes
                .iter()
                .filter(|(_, node)| node.owner_session == Some(session_id))
                .map(|(path, _)| path.clone())
                .collect();
            for path in &doomed {
                nodes.remove(path);
            }
            doomed
        };
        if expired {
            let _ = events.send(SessionState::Expired);
        }
        debug!(
            session_id,
            expired,
            ephemerals_removed = removed.len(),
            "ended coordination session"
        );
    }
}

/// In-memory coordination service.
#[derive(Debug, Clone, Default)]
pub struct MemoryCoordinator {
    state: Arc<ServiceState>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a service outage: while unavailable every operation
    /// (and connect) fails with a connection loss.
    pub fn set_available(&self, available: bool) {
        self.state.unavailable.store(!available, Ordering::Release);
    }

    /// Expire every live session: ephemeral nodes are destroyed and each
    /// session observes an `Expired` event.
    pub fn expire_sessions(&self) {
        let session_ids: Vec<u64> = self.state.sessions.iter().map(|e| *e.key()).collect();
        info!(sessions = session_ids.len(), "expiring coordination sessions");
        for session_id in session_ids {
            self.state.end_session(session_id, true);
        }
    }

    /// Number of nodes in the tree, for assertions.
    pub fn node_count(&self) -> usize {
        self.state.nodes.read().len()
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn connect(&self, options: &ConnectOptions) -> CoordResult<Box<dyn CoordinatorSession>> {
        if self.state.unavailable.load(Ordering::Acquire) {
            return Err(CoordError::ConnectionLoss);
        }
        let namespace = options.namespace.trim_end_matches('/').to_string();
        if !namespace.is_empty() {
            validate_path(&namespace)?;
            // The namespace root is materialized on connect.
            let mut nodes = self.state.nodes.write();
            create_parents_locked(&mut nodes, &namespace);
            nodes.entry(namespace.clone()).or_insert(Node {
                data: Vec::new(),
                mode: CreateMode::Persistent,
                owner_session: None,
            });
        }

        let session_id = self.state.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events_rx) = watch::channel(SessionState::Connected);
        self.state.sessions.insert(session_id, events_tx);

        debug!(session_id, namespace = %namespace, "opened coordination session");
        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
            session_id,
            namespace,
            events: events_rx,
        }))
    }
}

struct MemorySession {
    state: Arc<ServiceState>,
    session_id: u64,
    namespace: String,
    events: watch::Receiver<SessionState>,
}

impl MemorySession {
    fn check_live(&self) -> CoordResult<()> {
        if self.state.unavailable.load(Ordering::Acquire) {
            return Err(CoordError::ConnectionLoss);
        }
        if !self.state.sessions.contains_key(&self.session_id) {
            return Err(CoordError::SessionExpired);
        }
        Ok(())
    }

    fn full_path(&self, path: &str) -> CoordResult<String> {
        validate_path(path)?;
        Ok(format!("{}{}", self.namespace, path))
    }
}

fn validate_path(path: &str) -> CoordResult<()> {
    let valid = path.starts_with('/')
        && path.len() > 1
        && !path.ends_with('/')
        && !path.split('/').skip(1).any(|segment| segment.is_empty());
    if valid {
        Ok(())
    } else {
        Err(CoordError::BadPath(path.to_string()))
    }
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&path[..idx]),
    }
}

/// Materialize every missing ancestor of `path` as a persistent node.
fn create_parents_locked(nodes: &mut BTreeMap<String, Node>, path: &str) {
    let mut ancestors = Vec::new();
    let mut current = parent_of(path);
    while let Some(ancestor) = current {
        ancestors.push(ancestor.to_string());
        current = parent_of(ancestor);
    }
    for ancestor in ancestors.into_iter().rev() {
        nodes.entry(ancestor).or_insert(Node {
            data: Vec::new(),
            mode: CreateMode::Persistent,
            owner_session: None,
        });
    }
}

#[async_trait]
impl CoordinatorSession for MemorySession {
    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
        create_missing_parents: bool,
    ) -> CoordResult<()> {
        self.check_live()?;
        let full = self.full_path(path)?;

        let mut nodes = self.state.nodes.write();
        if nodes.contains_key(&full) {
            return Err(CoordError::NodeExists(path.to_string()));
        }
        if let Some(parent) = parent_of(&full) {
            match nodes.get(parent) {
                Some(node) if node.mode == CreateMode::Ephemeral => {
                    return Err(CoordError::NoChildrenForEphemerals(path.to_string()));
                }
                Some(_) => {}
                None if create_missing_parents => create_parents_locked(&mut nodes, &full),
                None => return Err(CoordError::NoNode(path.to_string())),
            }
        }
        nodes.insert(
            full,
            Node {
                data,
                mode,
                owner_session: (mode == CreateMode::Ephemeral).then_some(self.session_id),
            },
        );
        Ok(())
    }

    async fn set_data(&self, path: &str, data: Vec<u8>) -> CoordResult<()> {
        self.check_live()?;
        let full = self.full_path(path)?;
        let mut nodes = self.state.nodes.write();
        match nodes.get_mut(&full) {
            Some(node) => {
                node.data = data;
                Ok(())
            }
            None => Err(CoordError::NoNode(path.to_string())),
        }
    }

    async fn get_data(&self, path: &str) -> CoordResult<Vec<u8>> {
        self.check_live()?;
        let full = self.full_path(path)?;
        let nodes = self.state.nodes.read();
        nodes
            .get(&full)
            .map(|node| node.data.clone())
            .ok_or_else(|| CoordError::NoNode(path.to_string()))
    }

    async fn exists(&self, path: &str) -> CoordResult<bool> {
        self.check_live()?;
        let full = self.full_path(path)?;
        Ok(self.state.nodes.read().contains_key(&full))
    }

    async fn delete(&self, path: &str) -> CoordResult<()> {
        self.check_live()?;
        let full = self.full_path(path)?;
        let mut nodes = self.state.nodes.write();
        if !nodes.contains_key(&full) {
            return Err(CoordError::NoNode(path.to_string()));
        }
        let child_prefix = format!("{full}/");
        if nodes.range(child_prefix.clone()..).next().is_some_and(|(k, _)| k.starts_with(&child_prefix)) {
            return Err(CoordError::NotEmpty(path.to_string()));
        }
        nodes.remove(&full);
        Ok(())
    }

    async fn get_children(&self, path: &str) -> CoordResult<Vec<String>> {
        self.check_live()?;
        let full = self.full_path(path)?;
        let nodes = self.state.nodes.read();
        if !nodes.contains_key(&full) {
            return Err(CoordError::NoNode(path.to_string()));
        }
        let child_prefix = format!("{full}/");
        let children = nodes
            .range(child_prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&child_prefix))
            .filter(|(k, _)| !k[child_prefix.len()..].contains('/'))
            .map(|(k, _)| k[child_prefix.len()..].to_string())
            .collect();
        Ok(children)
    }

    fn session_events(&self) -> watch::Receiver<SessionState> {
        self.events.clone()
    }

    async fn close(&self) {
        self.state.end_session(self.session_id, false);
    }
}
