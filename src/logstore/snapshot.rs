//! Reference-counted index snapshots.
//!
//! A roll over uploads the index's segment files while the owning chunk
//! may still be merging or cleaning up. The snapshot tracker pins the
//! files for the duration of the copy; cleanup refuses to delete files
//! while any snapshot is held.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Tracks which segment files are pinned by outstanding snapshots.
///
/// Uses reference counting so overlapping snapshots over the same files
/// are handled correctly.
#[derive(Debug, Default, Clone)]
pub struct SnapshotTracker {
    held: Arc<RwLock<HashMap<PathBuf, usize>>>,
}

impl SnapshotTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a set of files, returning a guard that unpins on drop.
    pub fn acquire(&self, files: Vec<PathBuf>) -> SnapshotGuard {
        {
            let mut held = self.held.write();
            for file in &files {
                *held.entry(file.clone()).or_insert(0) += 1;
            }
        }
        SnapshotGuard {
            held: Arc::clone(&self.held),
            files,
        }
    }

    /// Whether a file is currently pinned by any snapshot.
    pub fn is_held(&self, file: &Path) -> bool {
        self.held.read().get(file).copied().unwrap_or(0) > 0
    }

    /// Number of distinct files currently pinned.
    pub fn held_count(&self) -> usize {
        self.held.read().values().filter(|&&v| v > 0).count()
    }
}

/// RAII guard that releases pinned files when dropped.
#[derive(Debug)]
pub struct SnapshotGuard {
    held: Arc<RwLock<HashMap<PathBuf, usize>>>,
    files: Vec<PathBuf>,
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        let mut held = self.held.write();
        for file in &self.files {
            if let Some(count) = held.get_mut(file) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    held.remove(file);
                }
            }
        }
    }
}

/// A point-in-time, read-only view of an index's on-disk files.
///
/// The view stays valid for as long as the snapshot is alive; dropping
/// it releases the underlying file pins on every exit path.
#[derive(Debug)]
pub struct IndexSnapshot {
    files: Vec<PathBuf>,
    _guard: SnapshotGuard,
}

impl IndexSnapshot {
    pub fn new(files: Vec<PathBuf>, guard: SnapshotGuard) -> Self {
        Self {
            files,
            _guard: guard,
        }
    }

    /// Files captured by this snapshot, in commit order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}
