// SPDX-License-Identifier: Apache-2.0

//! The runtime's opaque typed message and the identity used by idempotent
//! writers and the retry tracker.

use std::fmt;

/// The identity of a message or batch, used to make writes idempotent and
/// to key the retry tracker. Two records with the same identity MUST be
/// treated as the same write by every capability wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageIdentity {
    /// Identity of a tick record: `(tick_number, organism_id)` when an
    /// organism is present, or just the tick number for environment cells.
    Tick {
        /// The simulation tick this record belongs to.
        tick_number: u64,
        /// The organism this record belongs to, if any.
        organism_id: Option<u64>,
    },
    /// Identity of a simulation-run context record: the run itself.
    Context {
        /// The run this context record describes.
        run_id: String,
    },
    /// Identity of an accumulated batch, as consulted by the retry tracker:
    /// `"{run_id}:{min_tick}-{max_tick}"`.
    Batch {
        /// The run this batch belongs to.
        run_id: String,
        /// Smallest tick number in the batch.
        min_tick: u64,
        /// Largest tick number in the batch.
        max_tick: u64,
    },
}

impl fmt::Display for MessageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tick {
                tick_number,
                organism_id: Some(organism_id),
            } => write!(f, "tick:{tick_number}:organism:{organism_id}"),
            Self::Tick {
                tick_number,
                organism_id: None,
            } => write!(f, "tick:{tick_number}"),
            Self::Context { run_id } => write!(f, "context:{run_id}"),
            Self::Batch {
                run_id,
                min_tick,
                max_tick,
            } => write!(f, "{run_id}:{min_tick}-{max_tick}"),
        }
    }
}

/// Implemented by every message shape carried over a channel so that
/// writers and the retry tracker can key on identity without knowing the
/// concrete record type.
pub trait Identity {
    /// Returns this message's identity.
    fn identity(&self) -> MessageIdentity;
}

/// A context record: run-level metadata that must be consumed before any
/// tick record is processed (the "context-first rule").
#[derive(Debug, Clone)]
pub struct ContextRecord {
    /// The run this context belongs to.
    pub run_id: String,
    /// Wall-clock start time of the run, in milliseconds since epoch.
    pub start_time_ms: i64,
    /// The seed the simulation was started with.
    pub initial_seed: i64,
    /// Every `n`-th tick is sampled; must be >= 1.
    pub sampling_interval: u32,
}

/// A single simulated tick's payload: environment cells and/or organism
/// states for one point in simulated time.
#[derive(Debug, Clone)]
pub struct TickRecord {
    /// The tick number this record belongs to.
    pub tick_number: u64,
    /// The organism this record describes, if the tick carries organism
    /// state rather than (or in addition to) environment state.
    pub organism_id: Option<u64>,
    /// Opaque, already-serialized payload bytes for this tick.
    pub payload: Vec<u8>,
}

impl Identity for TickRecord {
    fn identity(&self) -> MessageIdentity {
        MessageIdentity::Tick {
            tick_number: self.tick_number,
            organism_id: self.organism_id,
        }
    }
}

impl Identity for ContextRecord {
    fn identity(&self) -> MessageIdentity {
        MessageIdentity::Context {
            run_id: self.run_id.clone(),
        }
    }
}

/// The two canonical message shapes carried between services.
#[derive(Debug, Clone)]
pub enum SimMessage {
    /// A run-level context record.
    Context(ContextRecord),
    /// A single tick's payload.
    Tick(TickRecord),
}

impl Identity for SimMessage {
    fn identity(&self) -> MessageIdentity {
        match self {
            Self::Context(c) => c.identity(),
            Self::Tick(t) => t.identity(),
        }
    }
}
