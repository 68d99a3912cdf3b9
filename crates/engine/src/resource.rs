// SPDX-License-Identifier: Apache-2.0

//! Resource and capability wrapper base behaviour: the bounded error log,
//! the connection discipline every wrapper follows, and the read-only
//! metrics snapshot projection.
//!
//! Concrete resources (the database, raw storage) live in their own crates
//! and build on top of [`ErrorLog`] and [`MetricsMap`] rather than
//! reimplementing them.

use std::collections::VecDeque;
use std::time::SystemTime;

/// Maximum number of structured errors a wrapper retains before evicting
/// the oldest.
pub const MAX_ERRORS: usize = 100;

/// A single structured error recorded by a capability wrapper.
#[derive(Debug, Clone)]
pub struct RecordedError {
    /// When the error was recorded.
    pub timestamp: SystemTime,
    /// The error kind's short label, e.g. `"transient_io"`.
    pub code: &'static str,
    /// A one-line human-readable message.
    pub message: String,
    /// Free-form structured detail (e.g. the batch identity).
    pub details: String,
}

/// A bounded, FIFO-evicting log of structured errors. Every capability
/// wrapper owns one.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: VecDeque<RecordedError>,
}

impl ErrorLog {
    /// Creates an empty error log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Records an error, evicting the oldest entry if the log is at
    /// [`MAX_ERRORS`].
    pub fn record(&mut self, code: &'static str, message: impl Into<String>, details: impl Into<String>) {
        if self.entries.len() >= MAX_ERRORS {
            let _ = self.entries.pop_front();
        }
        self.entries.push_back(RecordedError {
            timestamp: SystemTime::now(),
            code,
            message: message.into(),
            details: details.into(),
        });
    }

    /// A snapshot of the errors currently retained, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RecordedError> {
        self.entries.iter().cloned().collect()
    }

    /// Clears all recorded errors.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of errors currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A read-only projection of a wrapper's metrics map, serializable for an
/// admin surface or a test assertion. Every numeric field is recorded in
/// O(1) per sample; nothing here requires iterating a variable-length
/// collection.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Errors recorded since the wrapper was created or last cleared.
    pub error_count: u64,
    /// Whether a connection is currently cached (0 or 1).
    pub connection_cached: u8,
    /// Capability-specific counters, keyed by metric name.
    pub counters: std::collections::BTreeMap<String, u64>,
    /// Capability-specific latency percentiles, keyed by metric name.
    pub latencies: std::collections::BTreeMap<String, LatencySnapshot>,
}

/// Sliding-window latency percentiles plus the window average, all
/// maintained in constant time per sample.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct LatencySnapshot {
    /// 50th percentile, in milliseconds.
    pub p50_ms: f64,
    /// 95th percentile, in milliseconds.
    pub p95_ms: f64,
    /// 99th percentile, in milliseconds.
    pub p99_ms: f64,
    /// Window average, in milliseconds.
    pub avg_ms: f64,
}

/// A fixed-size sliding window of latency samples, bucketed for O(1)
/// percentile estimation. Holds at most `capacity` samples; once full, the
/// oldest sample is evicted per new sample (ring buffer), so memory is
/// bounded regardless of call volume.
#[derive(Debug)]
pub struct LatencyWindow {
    samples: VecDeque<f64>,
    capacity: usize,
    sum_ms: f64,
}

impl LatencyWindow {
    /// Creates a window holding at most `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            sum_ms: 0.0,
        }
    }

    /// Records a single latency sample, in milliseconds.
    pub fn record(&mut self, latency_ms: f64) {
        if self.samples.len() >= self.capacity {
            if let Some(evicted) = self.samples.pop_front() {
                self.sum_ms -= evicted;
            }
        }
        self.samples.push_back(latency_ms);
        self.sum_ms += latency_ms;
    }

    /// A snapshot of this window's percentiles and average. Sorts a copy of
    /// the bounded sample buffer, so cost is `O(capacity log capacity)` at
    /// snapshot time, never in the hot recording path.
    #[must_use]
    pub fn snapshot(&self) -> LatencySnapshot {
        if self.samples.is_empty() {
            return LatencySnapshot::default();
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("latency samples are never NaN"));
        let percentile = |p: f64| -> f64 {
            let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
            sorted[idx.min(sorted.len() - 1)]
        };
        LatencySnapshot {
            p50_ms: percentile(0.50),
            p95_ms: percentile(0.95),
            p99_ms: percentile(0.99),
            avg_ms: self.sum_ms / sorted.len() as f64,
        }
    }
}
