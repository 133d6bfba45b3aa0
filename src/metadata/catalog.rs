//! Chunk catalog and node liveness over the metadata store.

use super::MetadataStore;
use crate::chunk::ChunkInfo;
use crate::{MetadataError, Result};
use std::sync::Arc;
use tracing::info;

/// Persistent nodes holding serialized [`ChunkInfo`] records.
pub const CHUNKS_ROOT: &str = "/chunks";
/// Ephemeral children signaling node liveness.
pub const LIVE_NODES_ROOT: &str = "/live";

/// Cluster-visible catalog of this node's chunks.
///
/// Each chunk is a JSON document at `/chunks/<chunk-id>`, registered at
/// creation and upserted when the roll over uploads the snapshot. Node
/// liveness is an ephemeral `/live/<node-id>` entry that disappears with
/// the session.
pub struct ChunkCatalog {
    store: Arc<dyn MetadataStore>,
}

impl ChunkCatalog {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    fn chunk_path(chunk_id: &str) -> String {
        format!("{CHUNKS_ROOT}/{chunk_id}")
    }

    /// Register a newly created chunk.
    pub async fn register_chunk(&self, chunk_info: &ChunkInfo) -> Result<()> {
        let payload = serde_json::to_vec(chunk_info)?;
        self.store
            .create(&Self::chunk_path(&chunk_info.chunk_id), &payload, true)
            .await?;
        Ok(())
    }

    /// Write the latest state of a chunk, creating the entry if the
    /// registration was lost.
    pub async fn upsert_chunk(&self, chunk_info: &ChunkInfo) -> Result<()> {
        let payload = serde_json::to_vec(chunk_info)?;
        let path = Self::chunk_path(&chunk_info.chunk_id);
        match self.store.put(&path, &payload).await {
            Ok(()) => Ok(()),
            Err(MetadataError::NoNode(_)) => {
                self.store.create(&path, &payload, true).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_chunk(&self, chunk_id: &str) -> Result<ChunkInfo> {
        let bytes = self.store.get(&Self::chunk_path(chunk_id)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn delete_chunk(&self, chunk_id: &str) -> Result<()> {
        self.store.delete(&Self::chunk_path(chunk_id)).await?;
        Ok(())
    }

    /// Ids of every cataloged chunk; empty when nothing was registered yet.
    pub async fn list_chunk_ids(&self) -> Result<Vec<String>> {
        match self.store.get_children(CHUNKS_ROOT).await {
            Ok(children) => Ok(children),
            Err(MetadataError::NoNode(_)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Announce this node as live for as long as the session holds.
    pub async fn register_live_node(&self, node_id: &str, data: &[u8]) -> Result<()> {
        match self.store.create(LIVE_NODES_ROOT, &[], true).await {
            Ok(()) | Err(MetadataError::NodeExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.store
            .create_ephemeral(&format!("{LIVE_NODES_ROOT}/{node_id}"), data)
            .await?;
        info!(node_id, "registered live node");
        Ok(())
    }
}
