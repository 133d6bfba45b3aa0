//! Timestamp histograms for search results.

use crate::{Error, Result};
use std::cmp::Ordering;

/// One bucket of a histogram covering the half-open range `[low, high)`.
///
/// Buckets are ordered by non-overlap: two buckets compare equal iff
/// they overlap, and a bucket is greater than another iff the other's
/// `high` is at or below its `low`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramBucket {
    low: f64,
    high: f64,
    count: f64,
}

impl HistogramBucket {
    pub fn new(low: f64, high: f64) -> Result<Self> {
        if low >= high {
            return Err(Error::Internal(format!(
                "histogram bucket low {low} must be below high {high}"
            )));
        }
        Ok(Self { low, high, count: 0.0 })
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn increment(&mut self, by: f64) {
        self.count += by;
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value < self.high
    }

    pub fn overlaps(&self, other: &HistogramBucket) -> bool {
        other.high > self.low && other.low < self.high
    }

    /// Overlap-based ordering used when merging bucket sequences.
    pub fn cmp_bucket(&self, other: &HistogramBucket) -> Ordering {
        if self.overlaps(other) {
            Ordering::Equal
        } else if other.high <= self.low {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }
}

/// A fixed-interval histogram over a closed value range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
}

impl Histogram {
    /// Build `bucket_count` evenly sized buckets spanning `[low, high]`.
    /// The top edge is inclusive: a value equal to `high` lands in the
    /// last bucket. Returns an empty histogram when the range or bucket
    /// count is degenerate.
    pub fn fixed(low: f64, high: f64, bucket_count: usize) -> Self {
        if bucket_count == 0 || high <= low {
            return Self::default();
        }
        let width = (high - low) / bucket_count as f64;
        let buckets = (0..bucket_count)
            .map(|i| {
                let bucket_low = low + width * i as f64;
                let bucket_high = if i + 1 == bucket_count {
                    high
                } else {
                    low + width * (i + 1) as f64
                };
                HistogramBucket {
                    low: bucket_low,
                    high: bucket_high,
                    count: 0.0,
                }
            })
            .collect();
        Self { buckets }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Record one observation. Values outside the histogram range are dropped.
    pub fn add(&mut self, value: f64) {
        if let Some(bucket) = self.buckets.iter_mut().find(|b| b.contains(value)) {
            bucket.increment(1.0);
            return;
        }
        // Inclusive top edge.
        if let Some(last) = self.buckets.last_mut() {
            if value == last.high {
                last.increment(1.0);
            }
        }
    }

    /// Bucket-wise sum of another bucket sequence over the same schema.
    pub fn merge_buckets(&mut self, other: &[HistogramBucket]) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        if self.buckets.is_empty() {
            self.buckets = other.to_vec();
            return Ok(());
        }
        if self.buckets.len() != other.len() {
            return Err(Error::Internal(format!(
                "histogram bucket count mismatch: {} vs {}",
                self.buckets.len(),
                other.len()
            )));
        }
        for (mine, theirs) in self.buckets.iter_mut().zip(other) {
            if mine.cmp_bucket(theirs) != Ordering::Equal {
                return Err(Error::Internal(format!(
                    "histogram bucket schema mismatch: [{}, {}) vs [{}, {})",
                    mine.low, mine.high, theirs.low, theirs.high
                )));
            }
            mine.increment(theirs.count);
        }
        Ok(())
    }

    pub fn buckets(&self) -> &[HistogramBucket] {
        &self.buckets
    }

    pub fn into_buckets(self) -> Vec<HistogramBucket> {
        self.buckets
    }

    pub fn total_count(&self) -> f64 {
        self.buckets.iter().map(|b| b.count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_rejects_inverted_range() {
        assert!(HistogramBucket::new(10.0, 10.0).is_err());
        assert!(HistogramBucket::new(10.0, 5.0).is_err());
        assert!(HistogramBucket::new(5.0, 10.0).is_ok());
    }

    #[test]
    fn test_bucket_overlap_ordering() {
        let a = HistogramBucket::new(0.0, 10.0).unwrap();
        let b = HistogramBucket::new(10.0, 20.0).unwrap();
        let c = HistogramBucket::new(5.0, 15.0).unwrap();

        assert_eq!(a.cmp_bucket(&b), Ordering::Less);
        assert_eq!(b.cmp_bucket(&a), Ordering::Greater);
        assert_eq!(a.cmp_bucket(&c), Ordering::Equal);
        assert_eq!(b.cmp_bucket(&c), Ordering::Equal);
    }

    #[test]
    fn test_bucket_contains_half_open() {
        let bucket = HistogramBucket::new(0.0, 10.0).unwrap();
        assert!(bucket.contains(0.0));
        assert!(bucket.contains(9.99));
        assert!(!bucket.contains(10.0));
    }

    #[test]
    fn test_fixed_histogram_covers_range() {
        let mut histogram = Histogram::fixed(0.0, 100.0, 4);
        assert_eq!(histogram.buckets().len(), 4);

        histogram.add(0.0);
        histogram.add(25.0);
        histogram.add(99.0);
        histogram.add(100.0); // inclusive top edge
        histogram.add(150.0); // out of range, dropped

        assert_eq!(histogram.total_count(), 4.0);
        assert_eq!(histogram.buckets()[0].count(), 1.0);
        assert_eq!(histogram.buckets()[1].count(), 1.0);
        assert_eq!(histogram.buckets()[3].count(), 2.0);
    }

    #[test]
    fn test_degenerate_histogram_is_empty() {
        assert!(Histogram::fixed(0.0, 100.0, 0).is_empty());
        assert!(Histogram::fixed(100.0, 100.0, 4).is_empty());
    }

    #[test]
    fn test_merge_sums_counts_bucket_wise() {
        let mut a = Histogram::fixed(0.0, 100.0, 2);
        let mut b = Histogram::fixed(0.0, 100.0, 2);
        a.add(10.0);
        b.add(20.0);
        b.add(80.0);

        a.merge_buckets(b.buckets()).unwrap();
        assert_eq!(a.buckets()[0].count(), 2.0);
        assert_eq!(a.buckets()[1].count(), 1.0);
    }

    #[test]
    fn test_merge_rejects_mismatched_schema() {
        let mut a = Histogram::fixed(0.0, 100.0, 2);
        let b = Histogram::fixed(0.0, 100.0, 4);
        assert!(a.merge_buckets(b.buckets()).is_err());
    }

    #[test]
    fn test_merge_into_empty_adopts_schema() {
        let mut a = Histogram::default();
        let mut b = Histogram::fixed(0.0, 10.0, 2);
        b.add(1.0);
        a.merge_buckets(b.buckets()).unwrap();
        assert_eq!(a.total_count(), 1.0);
    }
}
