//! Manages the block time

use parking_lot::RwLock;
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

/// Returns the current wall clock time in milliseconds
pub fn now_millis() -> i128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i128).unwrap_or_default()
}

/// Applies a signed offset to the wall clock to produce block timestamps.
///
/// Timestamps are not forced to be monotonic, [`TimeManager::set_time`] may move the clock back.
#[derive(Clone, Debug, Default)]
pub struct TimeManager {
    /// offset to the wall clock in milliseconds
    offset: Arc<RwLock<i128>>,
}

// === impl TimeManager ===

impl TimeManager {
    /// Starts the clock at `timestamp`, in seconds
    pub fn starting_at(timestamp: u64) -> Self {
        let time = Self::default();
        time.set_time(timestamp);
        time
    }

    /// The current offset in milliseconds
    pub fn offset(&self) -> i128 {
        *self.offset.read()
    }

    pub fn set_offset(&self, offset: i128) {
        trace!(target: "time", offset, "restoring time offset");
        *self.offset.write() = offset;
    }

    /// Moves the clock forward, negative values are treated as zero.
    ///
    /// Returns the total offset in seconds.
    pub fn increase_time(&self, seconds: i64) -> i64 {
        let seconds = seconds.max(0);
        let mut offset = self.offset.write();
        *offset += i128::from(seconds) * 1000;
        trace!(target: "time", seconds, offset = *offset, "increased time");
        (*offset / 1000) as i64
    }

    /// Sets the clock to `timestamp` in seconds and returns the new offset in seconds
    pub fn set_time(&self, timestamp: u64) -> i64 {
        let offset = i128::from(timestamp) * 1000 - now_millis();
        *self.offset.write() = offset;
        trace!(target: "time", timestamp, offset, "set time");
        (offset / 1000) as i64
    }

    /// The timestamp for the next block, in seconds
    pub fn current_timestamp(&self) -> u64 {
        let millis = now_millis() + self.offset();
        (millis.max(0) / 1000) as u64
    }
}
