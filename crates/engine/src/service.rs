// SPDX-License-Identifier: Apache-2.0

//! The service lifecycle state machine and the `Service` trait every
//! long-running unit in the pipeline implements.

use crate::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// The state a service occupies at any point in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Not running; the initial state, and the state after a graceful
    /// `stop()`.
    Stopped,
    /// Running and making progress (or legitimately waiting on I/O).
    Running,
    /// Running but parked at a cooperative suspension point; counts as no
    /// activity for the metrics collector.
    Paused,
    /// Unrecoverable failure. Terminal; only `stop()` clears it.
    Error,
}

impl ServiceState {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Running => 1,
            Self::Paused => 2,
            Self::Error => 3,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Paused,
            3 => Self::Error,
            _ => Self::Stopped,
        }
    }
}

/// Shared, thread-safe handle to a service's lifecycle state and
/// cooperative-suspension signals. The orchestrator holds one side; the
/// service's `run()` loop observes it at every suspension point.
#[derive(Clone)]
pub struct LifecycleHandle {
    state: Arc<AtomicU8>,
    resume: Arc<Notify>,
    cancel: CancellationToken,
}

impl LifecycleHandle {
    /// Creates a new handle in the `Stopped` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ServiceState::Stopped.to_u8())),
            resume: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Marks the service as running. Called by the orchestrator on
    /// `start()`, and by `run()` itself after observing a `resume`.
    pub fn set_running(&self) {
        self.state.store(ServiceState::Running.to_u8(), Ordering::Release);
    }

    /// Marks the service as paused.
    pub fn set_paused(&self) {
        self.state.store(ServiceState::Paused.to_u8(), Ordering::Release);
    }

    /// Marks the service as stopped.
    pub fn set_stopped(&self) {
        self.state.store(ServiceState::Stopped.to_u8(), Ordering::Release);
    }

    /// Marks the service as failed. Terminal until the next `stop()`.
    pub fn set_error(&self) {
        self.state.store(ServiceState::Error.to_u8(), Ordering::Release);
    }

    /// Requests a pause. The running `run()` loop observes this at its
    /// next cooperative suspension point.
    pub fn pause(&self) {
        self.set_paused();
    }

    /// Releases a paused service.
    pub fn resume(&self) {
        self.set_running();
        self.resume.notify_waiters();
    }

    /// Signals cancellation and marks the service stopped. Idempotent:
    /// calling `stop()` on an already-stopped service is a no-op beyond
    /// re-asserting the cancellation token, which is itself idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.resume.notify_waiters();
    }

    /// The cancellation token `run()` must observe at every blocking call.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Parks the caller until either `resume()` is called or cancellation
    /// fires, whichever happens first. Call this at a cooperative
    /// suspension point once `state()` reads `Paused`.
    pub async fn wait_for_resume(&self) {
        if self.state() != ServiceState::Paused {
            return;
        }
        let notified = self.resume.notified();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {}
            () = notified => {}
        }
    }
}

impl Default for LifecycleHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A long-running unit of execution: reads from its input bindings, writes
/// to its output bindings and capability wrappers, and cooperatively
/// honours pause and cancellation.
#[async_trait::async_trait(?Send)]
pub trait Service {
    /// Runs the service's main loop until cancellation or an unrecoverable
    /// error. Implementations MUST check `lifecycle.state()` and call
    /// `lifecycle.wait_for_resume().await` at every loop iteration, and
    /// MUST treat `lifecycle.cancellation_token()` firing as a request to
    /// drain/flush and return `Ok(())`.
    async fn run(&mut self, lifecycle: LifecycleHandle) -> Result<(), Error>;

    /// A short, human-readable name used in logs and in
    /// `getPipelineStatus()`.
    fn name(&self) -> &str;
}
