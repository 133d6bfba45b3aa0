//! Search request/response types and the cross-chunk result aggregator.

use super::LogMessage;
use crate::histogram::{Histogram, HistogramBucket};
use std::cmp::Reverse;
use tracing::warn;

/// A search request against one or more chunks.
///
/// `start_time_epoch_ms..=end_time_epoch_ms` bounds the records
/// considered; `how_many` bounds the hits returned; `bucket_count`
/// selects the histogram resolution (zero disables the histogram).
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query_string: String,
    pub start_time_epoch_ms: i64,
    pub end_time_epoch_ms: i64,
    pub how_many: usize,
    pub bucket_count: usize,
}

impl SearchQuery {
    pub fn new(
        query_string: impl Into<String>,
        start_time_epoch_ms: i64,
        end_time_epoch_ms: i64,
        how_many: usize,
        bucket_count: usize,
    ) -> Self {
        Self {
            query_string: query_string.into(),
            start_time_epoch_ms,
            end_time_epoch_ms,
            how_many,
            bucket_count,
        }
    }

    /// Histogram schema shared by every chunk answering this query.
    pub fn histogram_schema(&self) -> Histogram {
        Histogram::fixed(
            self.start_time_epoch_ms as f64,
            self.end_time_epoch_ms as f64,
            self.bucket_count,
        )
    }
}

/// The result of searching one chunk, or the merged result of many.
#[derive(Debug, Clone)]
pub struct SearchResult<T> {
    /// Top hits, newest first, bounded by the query's `how_many`.
    pub hits: Vec<T>,
    /// Total matches before the `how_many` bound.
    pub total_count: u64,
    pub took_micros: u64,
    /// Chunks that failed to answer; the merged portion is still returned.
    pub failed_chunks: usize,
    /// Histogram of match timestamps over the query's bucket schema.
    pub buckets: Vec<HistogramBucket>,
}

impl<T> SearchResult<T> {
    pub fn empty() -> Self {
        Self {
            hits: Vec::new(),
            total_count: 0,
            took_micros: 0,
            failed_chunks: 0,
            buckets: Vec::new(),
        }
    }
}

/// Merges per-chunk search results into one bounded result.
pub trait SearchResultAggregator<T: LogMessage>: Send + Sync {
    fn aggregate(&self, results: Vec<SearchResult<T>>, query: &SearchQuery) -> SearchResult<T>;
}

/// Default aggregation policy: union of hits sorted by timestamp
/// descending and bounded to `how_many`, bucket-wise histogram sum.
#[derive(Debug, Default, Clone, Copy)]
pub struct HitsAndHistogramAggregator;

impl<T: LogMessage> SearchResultAggregator<T> for HitsAndHistogramAggregator {
    fn aggregate(&self, results: Vec<SearchResult<T>>, query: &SearchQuery) -> SearchResult<T> {
        let mut histogram = query.histogram_schema();
        let mut hits = Vec::new();
        let mut total_count = 0u64;
        let mut failed_chunks = 0usize;
        let mut took_micros = 0u64;

        for result in results {
            total_count += result.total_count;
            failed_chunks += result.failed_chunks;
            took_micros = took_micros.max(result.took_micros);
            if let Err(e) = histogram.merge_buckets(&result.buckets) {
                warn!(error = %e, "dropping histogram from result with mismatched buckets");
            }
            hits.extend(result.hits);
        }

        hits.sort_by_key(|hit| Reverse(hit.timestamp_ms()));
        hits.truncate(query.how_many);

        SearchResult {
            hits,
            total_count,
            took_micros,
            failed_chunks,
            buckets: histogram.into_buckets(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logstore::LogRecord;

    fn result_with(hits: Vec<LogRecord>, query: &SearchQuery) -> SearchResult<LogRecord> {
        let mut histogram = query.histogram_schema();
        for hit in &hits {
            histogram.add(hit.timestamp_ms as f64);
        }
        SearchResult {
            total_count: hits.len() as u64,
            hits,
            took_micros: 10,
            failed_chunks: 0,
            buckets: histogram.into_buckets(),
        }
    }

    #[test]
    fn test_aggregate_sorts_newest_first_and_bounds() {
        let query = SearchQuery::new("", 0, 10_000, 3, 2);
        let a = result_with(
            vec![
                LogRecord::new("a1", "api", 1_000, "one"),
                LogRecord::new("a2", "api", 9_000, "two"),
            ],
            &query,
        );
        let b = result_with(
            vec![
                LogRecord::new("b1", "api", 5_000, "three"),
                LogRecord::new("b2", "api", 7_000, "four"),
            ],
            &query,
        );

        let merged = HitsAndHistogramAggregator.aggregate(vec![a, b], &query);

        assert_eq!(merged.total_count, 4);
        assert_eq!(merged.hits.len(), 3);
        let timestamps: Vec<i64> = merged.hits.iter().map(|h| h.timestamp_ms).collect();
        assert_eq!(timestamps, vec![9_000, 7_000, 5_000]);
    }

    #[test]
    fn test_aggregate_sums_histograms_and_failures() {
        let query = SearchQuery::new("", 0, 10_000, 10, 2);
        let mut a = result_with(vec![LogRecord::new("a1", "api", 1_000, "one")], &query);
        a.failed_chunks = 1;
        let b = result_with(vec![LogRecord::new("b1", "api", 6_000, "two")], &query);

        let merged = HitsAndHistogramAggregator.aggregate(vec![a, b], &query);

        assert_eq!(merged.failed_chunks, 1);
        assert_eq!(merged.buckets.len(), 2);
        assert_eq!(merged.buckets[0].count(), 1.0);
        assert_eq!(merged.buckets[1].count(), 1.0);
    }

    #[test]
    fn test_aggregate_empty_results() {
        let query = SearchQuery::new("", 0, 1_000, 5, 4);
        let merged: SearchResult<LogRecord> = HitsAndHistogramAggregator.aggregate(vec![], &query);
        assert!(merged.hits.is_empty());
        assert_eq!(merged.total_count, 0);
        assert_eq!(merged.buckets.len(), 4);
    }
}
