// SPDX-License-Identifier: Apache-2.0

//! The content-addressable raw storage resource and its capability
//! wrapper, [`RawStorageProvider`]. Each wrapper writes length-delimited
//! tick batches under `runs/{runId}/raw_data/`, with a parallel
//! `raw_data_dlq/` sink for batches that exhausted their retry budget.

mod framing;
mod provider;
mod resource;

pub use provider::RawStorageProvider;
pub use resource::{Storage, StorageOptions};
