// SPDX-License-Identifier: Apache-2.0

//! Errors for the pipeline runtime.
//!
//! Important note: it is important not to use `!Send` data types in errors
//! (e.g. avoid using `Rc`) so that these errors can be emitted in both
//! `Send` and `!Send` contexts.

use std::fmt;

/// Coarse classification of a runtime failure, independent of which
/// component raised it. Every [`Error`] maps onto exactly one kind via
/// [`Error::kind`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorKind {
    /// A blocking operation observed cancellation; recoverable, the service
    /// exits cleanly.
    Cancelled,
    /// An expected absence, e.g. metadata not yet written. Never recorded as
    /// an error at the service level; the caller is expected to poll.
    NotFound,
    /// A resource read or write failed transiently; subject to retry with
    /// backoff and, ultimately, a dead-letter queue.
    TransientIo,
    /// A wiring-time mismatch: missing channel, wrong capability type,
    /// cyclic startup sequence. Fatal at build time.
    InvalidConfig,
    /// A capability was used outside its documented protocol, e.g.
    /// `get_metadata` before `set_simulation_run`. Always fatal for that
    /// wrapper.
    ContractViolation,
    /// A retry budget was exceeded (the batch moves to the dead-letter
    /// queue) or the dead-letter write itself failed (the service moves to
    /// `ERROR`).
    Exhausted,
    /// The retry tracker evicted an entry to stay within its bound. This is
    /// a metric, not an error condition; no [`Error`] variant carries it,
    /// but it shares the taxonomy so callers can reason about it uniformly.
    Capacity,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Cancelled => "cancelled",
            Self::NotFound => "not_found",
            Self::TransientIo => "transient_io",
            Self::InvalidConfig => "invalid_config",
            Self::ContractViolation => "contract_violation",
            Self::Exhausted => "exhausted",
            Self::Capacity => "capacity",
        };
        write!(f, "{label}")
    }
}

/// Errors raised by the runtime's core components (bindings, capability
/// wrappers, services, the retry tracker).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A blocking channel operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// A capability lookup found nothing for the given key.
    #[error("not found: {0}")]
    NotFound(String),

    /// A resource operation failed transiently and may be retried.
    #[error("transient I/O error: {message}")]
    TransientIo {
        /// Human-readable description of the underlying failure.
        message: String,
        /// The underlying error, if one is available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The topology could not be built from its configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A capability wrapper was used outside its documented protocol.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// A retry budget was exceeded, or the dead-letter write itself failed.
    #[error("exhausted: {0}")]
    Exhausted(String),

    /// Sending on a bounded channel failed. The original message is dropped
    /// rather than carried in the error so that `Error` stays `Send`.
    #[error("channel send failed: {reason}")]
    ChannelSend {
        /// Description of why the send failed (full, closed, cancelled).
        reason: &'static str,
    },

    /// Receiving from a bounded channel failed.
    #[error("channel recv failed: {0}")]
    ChannelRecv(#[from] simtel_channel::error::RecvError),

    /// An OS thread failed to spawn.
    #[error("failed to spawn thread '{thread_name}': {source}")]
    ThreadSpawn {
        /// Name of the thread that failed to spawn.
        thread_name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A service thread panicked instead of returning cleanly.
    #[error("service '{service_name}' panicked: {panic_message}")]
    ServicePanic {
        /// The service whose thread panicked.
        service_name: String,
        /// The captured panic payload, formatted with `{:?}`.
        panic_message: String,
    },
}

impl Error {
    /// Builds a [`Error::ChannelSend`] from a channel send failure, dropping
    /// the returned message so the error stays `Send`.
    #[must_use]
    pub fn from_send_error<T>(err: &simtel_channel::error::SendError<T>) -> Self {
        let reason = match err {
            simtel_channel::error::SendError::Full(_) => "full",
            simtel_channel::error::SendError::Closed(_) => "closed",
            simtel_channel::error::SendError::Cancelled(_) => "cancelled",
        };
        Self::ChannelSend { reason }
    }

    /// Classifies this error into the runtime's error-kind taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::TransientIo { .. } => ErrorKind::TransientIo,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::ContractViolation(_) => ErrorKind::ContractViolation,
            Self::Exhausted(_) => ErrorKind::Exhausted,
            Self::ChannelSend { reason } if *reason == "full" => ErrorKind::Capacity,
            Self::ChannelSend { .. } | Self::ChannelRecv(_) => ErrorKind::Cancelled,
            Self::ThreadSpawn { .. } | Self::ServicePanic { .. } => ErrorKind::ContractViolation,
        }
    }

    /// A short label naming this error's variant, for structured logging.
    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::NotFound(_) => "not_found",
            Self::TransientIo { .. } => "transient_io",
            Self::InvalidConfig(_) => "invalid_config",
            Self::ContractViolation(_) => "contract_violation",
            Self::Exhausted(_) => "exhausted",
            Self::ChannelSend { .. } => "channel_send",
            Self::ChannelRecv(_) => "channel_recv",
            Self::ThreadSpawn { .. } => "thread_spawn",
            Self::ServicePanic { .. } => "service_panic",
        }
    }
}
