// SPDX-License-Identifier: Apache-2.0

//! Core abstractions for the pipeline runtime: typed bindings over channels
//! and resources, the service lifecycle state machine, the metrics
//! collector, the retry tracker, and the metadata-coordinated indexer
//! pattern.
//!
//! This crate defines *what* a service is and how it is allowed to touch
//! the rest of the topology; it does not know how to build a topology from
//! configuration (see `simtel-config`) or how to schedule services onto OS
//! threads (see `simtel-controller`).

/// Binding: the only path by which a service may touch a channel.
pub mod binding;
/// Errors and the error-kind taxonomy shared by the runtime.
pub mod error;
/// Batch accumulation and metadata-gate helpers for the indexer pattern.
pub mod indexer;
/// Message envelope and identity used by writers and the retry tracker.
pub mod message;
/// The periodic metrics collector and per-binding rate tracking.
pub mod metrics;
/// Resource and capability wrapper base behaviour.
pub mod resource;
/// The FIFO-evicting bounded retry tracker.
pub mod retry_tracker;
/// Service trait and lifecycle state machine.
pub mod service;

pub use binding::{Binding, BindingState, Direction};
pub use error::{Error, ErrorKind};
pub use message::{Identity, MessageIdentity, SimMessage};
pub use service::{Service, ServiceState};
