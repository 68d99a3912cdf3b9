// SPDX-License-Identifier: Apache-2.0

//! Bindings: the only path by which a service may touch a channel.
//!
//! A binding wraps one side (input or output) of a channel attachment on
//! behalf of a service. Every successful read or write atomically
//! increments an activity counter that the metrics collector reads and
//! resets once per window; this is how a binding's instantaneous rate is
//! derived without the binding itself running a timer.

use crate::error::{Error, ErrorKind};
use simtel_channel::{mpmc, mpsc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A cheaply-cloneable handle to a binding's activity counter and latest
/// observed depth, shared with the metrics collector running on the
/// orchestrator's own task. This is the only part of a binding that
/// crosses a thread boundary: the binding itself stays on its owning
/// service's thread.
#[derive(Clone)]
pub struct BindingMetricsHandle {
    activity: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
    depth: Arc<AtomicU64>,
    capacity: u64,
}

impl BindingMetricsHandle {
    /// Atomically reads and resets the activity counter. Called once per
    /// window by the metrics collector.
    pub fn take(&self) -> u64 {
        self.activity.swap(0, Ordering::AcqRel)
    }

    /// Atomically reads and resets the error counter. Called once per
    /// window by the metrics collector, alongside `take()`.
    pub fn take_errors(&self) -> u64 {
        self.errors.swap(0, Ordering::AcqRel)
    }

    /// The depth last observed after a successful read or write.
    #[must_use]
    pub fn depth(&self) -> u64 {
        self.depth.load(Ordering::Acquire)
    }

    /// The channel's configured capacity.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

/// Which side of a channel attachment a binding represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The binding reads from the channel.
    Input,
    /// The binding writes to the channel.
    Output,
}

/// Whether a binding is presently moving messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Waiting for input (input side, empty channel) or waiting for
    /// capacity (output side, full channel).
    Waiting,
    /// Able to make progress right now.
    Active,
}

/// A sender handle to either channel variant the orchestrator may wire up.
/// The orchestrator picks [`mpmc`] whenever a port has more than one
/// attachment, [`mpsc`] otherwise.
pub enum SenderHandle<T> {
    /// Single-producer/single-consumer sender.
    Spsc(mpsc::Sender<T>),
    /// Multi-producer/multi-consumer sender.
    Mpmc(mpmc::Sender<T>),
}

/// A receiver handle to either channel variant the orchestrator may wire
/// up. See [`SenderHandle`].
pub enum ReceiverHandle<T> {
    /// Single-producer/single-consumer receiver.
    Spsc(mpsc::Receiver<T>),
    /// Multi-producer/multi-consumer receiver.
    Mpmc(mpmc::Receiver<T>),
}

impl<T> SenderHandle<T> {
    async fn send_cancelable(
        &self,
        value: T,
        token: &CancellationToken,
    ) -> Result<(), simtel_channel::error::SendError<T>> {
        match self {
            Self::Spsc(s) => s.send_cancelable(value, token).await,
            Self::Mpmc(s) => s.send_cancelable(value, token).await,
        }
    }

    fn depth(&self) -> usize {
        match self {
            Self::Spsc(s) => s.depth(),
            Self::Mpmc(s) => s.depth(),
        }
    }

    fn capacity(&self) -> usize {
        match self {
            Self::Spsc(s) => s.capacity(),
            Self::Mpmc(s) => s.capacity(),
        }
    }
}

impl<T> ReceiverHandle<T> {
    async fn recv_cancelable(
        &self,
        token: &CancellationToken,
    ) -> Result<T, simtel_channel::error::RecvError> {
        match self {
            Self::Spsc(r) => r.recv_cancelable(token).await,
            Self::Mpmc(r) => r.recv_cancelable(token).await,
        }
    }

    async fn recv_deadline(
        &self,
        timeout: Duration,
    ) -> Result<Option<T>, simtel_channel::error::RecvError> {
        match self {
            Self::Spsc(r) => r.recv_deadline(timeout).await,
            Self::Mpmc(r) => r.recv_deadline(timeout).await,
        }
    }

    fn depth(&self) -> usize {
        match self {
            Self::Spsc(r) => r.depth(),
            Self::Mpmc(r) => r.depth(),
        }
    }

    fn capacity(&self) -> usize {
        match self {
            Self::Spsc(r) => r.capacity(),
            Self::Mpmc(r) => r.capacity(),
        }
    }
}

/// Wraps a single channel attachment for a service. See the [module
/// docs](self) for the activity-counter contract.
pub struct Binding<T> {
    direction: Direction,
    sender: Option<SenderHandle<T>>,
    receiver: Option<ReceiverHandle<T>>,
    activity_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    observed_depth: Arc<AtomicU64>,
}

impl<T> Binding<T> {
    /// Wraps the write side of `sender` as an output binding.
    #[must_use]
    pub fn output(sender: SenderHandle<T>) -> Self {
        Self {
            direction: Direction::Output,
            sender: Some(sender),
            receiver: None,
            activity_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            observed_depth: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wraps the read side of `receiver` as an input binding.
    #[must_use]
    pub fn input(receiver: ReceiverHandle<T>) -> Self {
        Self {
            direction: Direction::Input,
            sender: None,
            receiver: Some(receiver),
            activity_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            observed_depth: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The direction this binding was built for.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// A cross-thread-safe handle to this binding's activity counter, to be
    /// registered with the orchestrator's metrics collector.
    #[must_use]
    pub fn metrics_handle(&self) -> BindingMetricsHandle {
        BindingMetricsHandle {
            activity: Arc::clone(&self.activity_count),
            errors: Arc::clone(&self.error_count),
            depth: Arc::clone(&self.observed_depth),
            capacity: self.capacity() as u64,
        }
    }

    /// Records a non-cancellation error observed on this binding, for the
    /// metrics collector's `errorCount` column. Cancellation is an
    /// expected shutdown signal, not an error, and is never counted here.
    fn record_error(&self, e: &Error) {
        if e.kind() != ErrorKind::Cancelled {
            self.error_count.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Writes `msg`, blocking while the channel is full, returning
    /// `Error::Cancelled` if `token` fires first.
    ///
    /// # Panics
    /// Panics if called on an input binding.
    pub async fn write(&self, msg: T, token: &CancellationToken) -> Result<(), Error> {
        let sender = self
            .sender
            .as_ref()
            .expect("write() called on an input binding");
        sender.send_cancelable(msg, token).await.map_err(|e| {
            let error = Error::from_send_error(&e);
            self.record_error(&error);
            error
        })?;
        self.activity_count.fetch_add(1, Ordering::AcqRel);
        self.observed_depth.store(self.depth() as u64, Ordering::Release);
        Ok(())
    }

    /// Reads the next message, blocking while the channel is empty,
    /// returning `Error::Cancelled` if `token` fires first.
    ///
    /// # Panics
    /// Panics if called on an output binding.
    pub async fn read(&self, token: &CancellationToken) -> Result<T, Error> {
        let receiver = self
            .receiver
            .as_ref()
            .expect("read() called on an output binding");
        let msg = receiver.recv_cancelable(token).await.map_err(|e| {
            let error = Error::from(e);
            self.record_error(&error);
            error
        })?;
        self.activity_count.fetch_add(1, Ordering::AcqRel);
        self.observed_depth.store(self.depth() as u64, Ordering::Release);
        Ok(msg)
    }

    /// Reads the next message if one arrives within `timeout`, returning
    /// `None` rather than an error on a timed-out wait.
    ///
    /// # Panics
    /// Panics if called on an output binding.
    pub async fn try_read_with_deadline(&self, timeout: Duration) -> Result<Option<T>, Error> {
        let receiver = self
            .receiver
            .as_ref()
            .expect("try_read_with_deadline() called on an output binding");
        let msg = receiver.recv_deadline(timeout).await.map_err(|e| {
            let error = Error::from(e);
            self.record_error(&error);
            error
        })?;
        if msg.is_some() {
            self.activity_count.fetch_add(1, Ordering::AcqRel);
            self.observed_depth.store(self.depth() as u64, Ordering::Release);
        }
        Ok(msg)
    }

    /// Current buffered message count, or 0 if the attachment is not
    /// monitorable.
    #[must_use]
    pub fn depth(&self) -> usize {
        match (&self.sender, &self.receiver) {
            (Some(s), None) => s.depth(),
            (None, Some(r)) => r.depth(),
            _ => 0,
        }
    }

    /// The channel's configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        match (&self.sender, &self.receiver) {
            (Some(s), None) => s.capacity(),
            (None, Some(r)) => r.capacity(),
            _ => 0,
        }
    }

    /// This binding's current [`BindingState`].
    #[must_use]
    pub fn state(&self) -> BindingState {
        match self.direction {
            Direction::Input => {
                if self.depth() == 0 {
                    BindingState::Waiting
                } else {
                    BindingState::Active
                }
            }
            Direction::Output => {
                if self.depth() >= self.capacity() {
                    BindingState::Waiting
                } else {
                    BindingState::Active
                }
            }
        }
    }

}
