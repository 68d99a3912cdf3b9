// SPDX-License-Identifier: Apache-2.0

//! The metrics collector: a single periodic task that reads and resets
//! every registered binding's activity counter and turns it into a rate.

use crate::binding::{BindingMetricsHandle, BindingState, Direction};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identifies one binding for the purposes of the metrics map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
    /// The owning service's name.
    pub service_name: String,
    /// The port name on that service.
    pub port_name: String,
    /// The channel this binding attaches to.
    pub channel_name: String,
    /// Which side of the channel this binding is.
    pub direction: Direction,
}

/// The most recent measurement recorded for one binding.
#[derive(Debug, Clone, Copy)]
pub struct BindingRate {
    /// Messages observed per second over the last window.
    pub messages_per_second: f64,
    /// When this measurement was taken.
    pub measured_at: Instant,
    /// Errors observed for this binding's owning wrapper, if tracked.
    pub error_count: u64,
}

type MetricsMap = Arc<Mutex<HashMap<BindingKey, BindingRate>>>;

/// Registry of every binding's activity handle plus the most recently
/// computed rate. The orchestrator owns one instance and runs `tick()` on
/// a fixed interval; its absence only zeroes the rate column, never
/// affecting service correctness.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    handles: Arc<Mutex<HashMap<BindingKey, BindingMetricsHandle>>>,
    rates: MetricsMap,
}

impl MetricsCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a binding's activity handle under `key`. Called once by
    /// the orchestrator while building the topology.
    pub fn register(&self, key: BindingKey, handle: BindingMetricsHandle) {
        let _ = self.handles.lock().insert(key, handle);
    }

    /// Reads and resets every registered binding's activity counter,
    /// dividing by `window` to yield a rate, and atomically replaces its
    /// prior entry in the metrics map. A panic unwinding from a single
    /// binding's handle cannot occur (the handle is a plain atomic swap),
    /// but a future capability-specific hook that can fail is still
    /// isolated per-binding by this loop never short-circuiting on error.
    pub fn tick(&self, window: Duration) {
        let now = Instant::now();
        let window_secs = window.as_secs_f64().max(f64::MIN_POSITIVE);
        let handles = self.handles.lock();
        let mut rates = self.rates.lock();
        for (key, handle) in handles.iter() {
            let count = handle.take();
            let rate = BindingRate {
                messages_per_second: count as f64 / window_secs,
                measured_at: now,
                error_count: handle.take_errors(),
            };
            let _ = rates.insert(key.clone(), rate);
        }
    }

    /// The most recently computed rate for `key`, if the collector has run
    /// at least once since it was registered.
    #[must_use]
    pub fn rate(&self, key: &BindingKey) -> Option<BindingRate> {
        self.rates.lock().get(key).copied()
    }

    /// The current [`BindingState`] for `key`, derived live from the
    /// handle's last-observed depth and capacity. Unlike `rate`, this does
    /// not depend on `tick` having run.
    #[must_use]
    pub fn state(&self, key: &BindingKey) -> Option<BindingState> {
        let handles = self.handles.lock();
        let handle = handles.get(key)?;
        Some(match key.direction {
            Direction::Input => {
                if handle.depth() == 0 {
                    BindingState::Waiting
                } else {
                    BindingState::Active
                }
            }
            Direction::Output => {
                if handle.depth() >= handle.capacity() {
                    BindingState::Waiting
                } else {
                    BindingState::Active
                }
            }
        })
    }

    /// Every registered binding key, for `getPipelineStatus()` to iterate.
    #[must_use]
    pub fn keys(&self) -> Vec<BindingKey> {
        self.handles.lock().keys().cloned().collect()
    }
}
