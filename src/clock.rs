//! Monotonic wall-clock source for chunk lifecycle timestamps.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// A clock that returns wall-clock epoch timestamps which never go
/// backward, even across NTP adjustments.
///
/// Chunk lifecycle timestamps (`created`, `last_updated`) are compared
/// against each other by eviction policies, so a backward step would
/// make a chunk look younger than one it preceded.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    /// High-water mark: the largest millisecond timestamp ever returned
    high_water_ms: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            high_water_ms: AtomicI64::new(0),
        }
    }

    /// Returns a monotonically non-decreasing epoch timestamp in milliseconds.
    pub fn now_epoch_ms(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        let prev = self.high_water_ms.fetch_max(wall, Ordering::AcqRel);
        prev.max(wall)
    }

    /// Returns a monotonically non-decreasing epoch timestamp in seconds.
    pub fn now_epoch_secs(&self) -> i64 {
        self.now_epoch_ms() / 1000
    }
}
