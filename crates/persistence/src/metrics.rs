//! Storage metrics collection.
//!
//! Provides functions for recording history-store metrics.

use metrics::{counter, histogram};
use std::time::Instant;

/// Record storage operation duration.
pub fn record_operation_duration(operation: &str, duration_secs: f64) {
    histogram!(
        "storage_operation_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}

/// Record the number of history files removed by a bulk delete.
pub fn record_files_deleted(count: usize) {
    counter!("storage_files_deleted_total").increment(count as u64);
}

/// A helper to time storage operations and record metrics.
///
/// Usage:
/// ```ignore
/// let timer = StorageTimer::new("read");
/// let result = read_history(&path);
/// timer.record();
/// result
/// ```
pub struct StorageTimer {
    operation: &'static str,
    start: Instant,
}

impl StorageTimer {
    /// Create a new timer for the given operation.
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    /// Record the elapsed duration to metrics.
    pub fn record(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation_duration(self.operation, duration);
    }
}
