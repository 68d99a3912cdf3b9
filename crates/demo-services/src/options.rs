// SPDX-License-Identifier: Apache-2.0

//! `options` subtree shapes for every service registered by this crate.

use serde::Deserialize;

fn default_count() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_poll_duration_ms() -> u64 {
    300_000
}

fn default_batch_timeout_ms() -> u64 {
    10_000
}

fn default_batch_size() -> usize {
    64
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_tracker_max_keys() -> usize {
    10_000
}

fn default_retry_backoff_base_ms() -> u64 {
    100
}

fn default_retry_backoff_cap_ms() -> u64 {
    5_000
}

/// Options for the `"DummyProducer"` service class.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DummyProducerOptions {
    /// The first tick number written.
    #[serde(default)]
    pub start: u64,
    /// How many ticks to write before exiting.
    #[serde(default = "default_count")]
    pub count: u64,
}

impl Default for DummyProducerOptions {
    fn default() -> Self {
        Self {
            start: 0,
            count: default_count(),
        }
    }
}

/// Options for the `"DummyConsumer"` service class. Reserved for future
/// use; the consumer currently needs no configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DummyConsumerOptions {}

/// Options for the `"PersistenceIndexer"` service class.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceIndexerOptions {
    /// The run this indexer persists data for.
    pub run_id: String,
    /// Spacing between `getMetadata` polling attempts.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Total time budget for the metadata gate before transitioning to
    /// `ERROR`.
    #[serde(default = "default_max_poll_duration_ms")]
    pub max_poll_duration_ms: u64,
    /// Flush a batch once this many ticks have accumulated.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Flush a partial batch after this much time has elapsed since the
    /// last flush.
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    /// Retries attempted before a batch is handed to the DLQ.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Bound on the retry tracker's tracked-identity count.
    #[serde(default = "default_retry_tracker_max_keys")]
    pub retry_tracker_max_keys: usize,
    /// Base delay for the retry backoff.
    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,
    /// Cap on the retry backoff delay.
    #[serde(default = "default_retry_backoff_cap_ms")]
    pub retry_backoff_cap_ms: u64,
}
