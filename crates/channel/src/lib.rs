// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO channel implementations optimized for a single-threaded
//! async runtime. See [`mpsc`] for the single-consumer case used by most
//! service-to-service links, and [`mpmc`] for fan-in/fan-out ports.

pub mod error;
pub mod mpmc;
pub mod mpsc;
