//! Local file-backed log store.
//!
//! A small inverted-index engine suitable for development, testing, and
//! single-node deployments: appended records are tokenized into an
//! in-memory memtable, and `commit` freezes the memtable into a segment
//! with term postings plus a durable segment file of length-prefixed
//! record payloads. Segment files are what snapshots pin and roll overs
//! upload.

use super::{
    tokenize, IndexSnapshot, LogMessage, LogStore, LogStoreFactory, SearchQuery, SearchResult,
    SnapshotTracker,
};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

struct IndexedDoc<T> {
    message: T,
    timestamp_ms: i64,
    terms: HashSet<String>,
}

struct Segment<T> {
    path: PathBuf,
    docs: Vec<IndexedDoc<T>>,
    postings: HashMap<String, Vec<u32>>,
}

impl<T> Segment<T> {
    /// Doc ids matching every query term (implicit AND); all docs when
    /// the term list is empty.
    fn matching_doc_ids(&self, terms: &[String]) -> Vec<u32> {
        if terms.is_empty() {
            return (0..self.docs.len() as u32).collect();
        }
        let mut candidates = match self.postings.get(&terms[0]) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        for term in &terms[1..] {
            match self.postings.get(term) {
                Some(ids) => candidates.retain(|id| ids.binary_search(id).is_ok()),
                None => return Vec::new(),
            }
            if candidates.is_empty() {
                break;
            }
        }
        candidates
    }
}

struct StoreState<T> {
    memtable: Vec<IndexedDoc<T>>,
    segments: Vec<Segment<T>>,
    next_segment_id: u64,
}

/// File-backed inverted index owned by a single chunk.
pub struct LocalLogStore<T: LogMessage> {
    data_dir: PathBuf,
    state: Mutex<StoreState<T>>,
    snapshots: SnapshotTracker,
    closed: AtomicBool,
}

impl<T: LogMessage> LocalLogStore<T> {
    /// Open a store rooted at `data_dir`, creating the directory if needed.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            state: Mutex::new(StoreState {
                memtable: Vec::new(),
                segments: Vec::new(),
                next_segment_id: 0,
            }),
            snapshots: SnapshotTracker::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Internal(format!(
                "log store at {} is closed",
                self.data_dir.display()
            )));
        }
        Ok(())
    }

    /// Number of records visible to search (committed and buffered).
    pub fn doc_count(&self) -> usize {
        let state = self.state.lock();
        state.memtable.len() + state.segments.iter().map(|s| s.docs.len()).sum::<usize>()
    }

    #[cfg(test)]
    fn segment_count(&self) -> usize {
        self.state.lock().segments.len()
    }
}

impl<T: LogMessage> LogStore<T> for LocalLogStore<T> {
    fn append(&self, message: &T) -> Result<()> {
        self.ensure_open()
            .map_err(|e| Error::IndexAppend(e.to_string()))?;
        let terms = tokenize(&message.index_text()).into_iter().collect();
        self.state.lock().memtable.push(IndexedDoc {
            message: message.clone(),
            timestamp_ms: message.timestamp_ms(),
            terms,
        });
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if state.memtable.is_empty() {
            return Ok(());
        }

        // Serialize before draining the memtable so a failure leaves the
        // buffered records intact.
        let mut payload = Vec::new();
        for doc in &state.memtable {
            let bytes = doc.message.to_bytes()?;
            payload.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            payload.extend_from_slice(&bytes);
        }

        let segment_id = state.next_segment_id;
        let path = self.data_dir.join(format!("seg-{segment_id:06}.idx"));
        std::fs::write(&path, &payload)?;

        let docs = std::mem::take(&mut state.memtable);
        let mut postings: HashMap<String, Vec<u32>> = HashMap::new();
        for (doc_id, doc) in docs.iter().enumerate() {
            for term in &doc.terms {
                postings.entry(term.clone()).or_default().push(doc_id as u32);
            }
        }

        debug!(
            path = %path.display(),
            docs = docs.len(),
            terms = postings.len(),
            "committed segment"
        );

        state.next_segment_id += 1;
        state.segments.push(Segment {
            path,
            docs,
            postings,
        });
        Ok(())
    }

    fn search(&self, query: &SearchQuery) -> Result<SearchResult<T>> {
        self.ensure_open()?;
        let start = Instant::now();
        let terms = tokenize(&query.query_string);
        let range = query.start_time_epoch_ms..=query.end_time_epoch_ms;

        let state = self.state.lock();
        let mut matches: Vec<(i64, T)> = Vec::new();
        for segment in &state.segments {
            for doc_id in segment.matching_doc_ids(&terms) {
                let doc = &segment.docs[doc_id as usize];
                if range.contains(&doc.timestamp_ms) {
                    matches.push((doc.timestamp_ms, doc.message.clone()));
                }
            }
        }
        for doc in &state.memtable {
            if range.contains(&doc.timestamp_ms) && terms.iter().all(|t| doc.terms.contains(t)) {
                matches.push((doc.timestamp_ms, doc.message.clone()));
            }
        }
        drop(state);

        let mut histogram = query.histogram_schema();
        for (timestamp_ms, _) in &matches {
            histogram.add(*timestamp_ms as f64);
        }

        matches.sort_by_key(|(timestamp_ms, _)| std::cmp::Reverse(*timestamp_ms));
        let total_count = matches.len() as u64;
        let hits = matches
            .into_iter()
            .take(query.how_many)
            .map(|(_, message)| message)
            .collect();

        Ok(SearchResult {
            hits,
            total_count,
            took_micros: start.elapsed().as_micros() as u64,
            failed_chunks: 0,
            buckets: histogram.into_buckets(),
        })
    }

    fn take_snapshot(&self) -> Result<IndexSnapshot> {
        self.ensure_open()?;
        let files: Vec<PathBuf> = {
            let state = self.state.lock();
            state.segments.iter().map(|s| s.path.clone()).collect()
        };
        let guard = self.snapshots.acquire(files.clone());
        Ok(IndexSnapshot::new(files, guard))
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        if self.snapshots.held_count() > 0 {
            return Err(Error::Internal(format!(
                "cannot clean up {}: a snapshot still holds its files",
                self.data_dir.display()
            )));
        }
        if self.data_dir.exists() {
            std::fs::remove_dir_all(&self.data_dir)?;
        }
        Ok(())
    }

    fn data_directory(&self) -> &Path {
        &self.data_dir
    }
}

/// Factory opening a [`LocalLogStore`] per chunk directory.
pub fn local_log_store_factory<T: LogMessage>() -> LogStoreFactory<T> {
    Arc::new(|dir: &Path| {
        let store = LocalLogStore::open(dir)?;
        Ok(Arc::new(store) as Arc<dyn LogStore<T>>)
    })
}
