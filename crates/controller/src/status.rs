// SPDX-License-Identifier: Apache-2.0

//! Point-in-time status types returned by `getPipelineStatus()`.

use simtel_engine::binding::{BindingState, Direction};
use simtel_engine::service::ServiceState;

/// One binding's live status, as observed by the metrics collector.
#[derive(Debug, Clone)]
pub struct BindingStatus {
    /// The logical port name this binding was wired to.
    pub port: String,
    /// The channel or resource name this binding attaches to.
    pub attached: String,
    /// Input or output.
    pub direction: Direction,
    /// Waiting or active, as of the last metrics window.
    pub state: BindingState,
    /// Throughput over the last metrics window.
    pub messages_per_second: f64,
    /// Errors observed on this binding over the last metrics window.
    pub error_count: u64,
}

/// A single service's lifecycle state plus the live status of every
/// binding it owns.
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    /// The service's configured name.
    pub name: String,
    /// The service's current lifecycle state.
    pub state: ServiceState,
    /// Every binding this service owns, input and output alike.
    pub bindings: Vec<BindingStatus>,
}
