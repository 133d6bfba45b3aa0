//! Log store contract and the local index engine.
//!
//! A log store is the inverted index backing one chunk. The chunk layer
//! only depends on the [`LogStore`] trait: append records, commit them
//! to durable segment files, search, and hand out reference-counted
//! snapshots of the on-disk files for upload.

mod local;
mod search;
mod snapshot;

pub use local::{local_log_store_factory, LocalLogStore};
pub use search::{HitsAndHistogramAggregator, SearchQuery, SearchResult, SearchResultAggregator};
pub use snapshot::{IndexSnapshot, SnapshotTracker};

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Capabilities a record must provide to be indexed.
///
/// Implementations stay cheap: `timestamp_ms` is read on every append to
/// maintain chunk time bounds, and `index_text` feeds the tokenizer.
pub trait LogMessage: Clone + Send + Sync + 'static {
    /// Epoch milliseconds of the event this record describes.
    fn timestamp_ms(&self) -> i64;

    /// Serialized form written to segment files and uploaded as-is.
    fn to_bytes(&self) -> Result<Vec<u8>>;

    /// The text fed to the inverted index for this record.
    fn index_text(&self) -> String;
}

/// The standard wire record ingested by a logmill node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: String,
    pub source: String,
    pub timestamp_ms: i64,
    pub body: String,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl LogRecord {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        timestamp_ms: i64,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            timestamp_ms,
            body: body.into(),
            fields: BTreeMap::new(),
        }
    }
}

impl LogMessage for LogRecord {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn index_text(&self) -> String {
        let mut text = self.body.clone();
        for value in self.fields.values() {
            if let serde_json::Value::String(s) = value {
                text.push(' ');
                text.push_str(s);
            }
        }
        text
    }
}

/// The index-engine contract consumed by a chunk.
///
/// Appends and searches are in-process and do not suspend; blocking I/O
/// happens in `commit`. A store is exclusively owned by one chunk for
/// its whole lifetime.
pub trait LogStore<T: LogMessage>: Send + Sync {
    /// Index one record.
    fn append(&self, message: &T) -> Result<()>;

    /// Flush buffered records into a durable segment file.
    fn commit(&self) -> Result<()>;

    /// Search committed and buffered records.
    fn search(&self, query: &SearchQuery) -> Result<SearchResult<T>>;

    /// Take a reference-counted, point-in-time view of the on-disk
    /// segment files. Held files are protected from deletion until the
    /// snapshot is dropped.
    fn take_snapshot(&self) -> Result<IndexSnapshot>;

    /// Stop accepting appends and searches.
    fn close(&self) -> Result<()>;

    /// Remove the store's on-disk directory. Fails while a snapshot is held.
    fn cleanup(&self) -> Result<()>;

    /// Directory holding this store's index files.
    fn data_directory(&self) -> &Path;
}

/// Factory used by the chunk manager to open a fresh store for each new chunk.
pub type LogStoreFactory<T> = Arc<dyn Fn(&Path) -> Result<Arc<dyn LogStore<T>>> + Send + Sync>;

/// Split text into lowercase alphanumeric terms.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_lowercases_and_splits() {
        assert_eq!(
            tokenize("GET /api/v1/users?id=42"),
            vec!["get", "api", "v1", "users", "id", "42"]
        );
        assert!(tokenize("  ,,  ").is_empty());
    }

    #[test]
    fn test_log_record_round_trips_through_bytes() {
        let mut record = LogRecord::new("m1", "api", 1_000, "hello world");
        record
            .fields
            .insert("level".to_string(), serde_json::json!("error"));

        let bytes = record.to_bytes().unwrap();
        let decoded: LogRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_index_text_includes_string_fields() {
        let mut record = LogRecord::new("m1", "api", 1_000, "request failed");
        record
            .fields
            .insert("host".to_string(), serde_json::json!("web-1"));
        record
            .fields
            .insert("status".to_string(), serde_json::json!(500));

        let text = record.index_text();
        assert!(text.contains("request failed"));
        assert!(text.contains("web-1"));
        assert!(!text.contains("500"));
    }
}
