// SPDX-License-Identifier: Apache-2.0

//! `PersistenceIndexer`: the metadata-gated, batching, retry-and-DLQ
//! consumer that drains a run's context and tick records into raw storage.
//!
//! The capability surface it depends on is expressed as two narrow local
//! traits, [`MetadataGate`] and [`TickSink`], rather than the concrete
//! `simtel-database`/`simtel-storage` wrapper types directly. The service
//! constructor downcasts the `Box<dyn Any>` capability wrappers handed to
//! it and wraps them behind these traits; tests substitute lightweight
//! doubles behind the same traits instead of driving a real database or
//! filesystem.

use crate::options::PersistenceIndexerOptions;
use bytes::{BufMut, BytesMut};
use simtel_database::{Metadata, MetadataReader};
use simtel_engine::binding::Binding;
use simtel_engine::error::{Error, ErrorKind};
use simtel_engine::indexer::{poll_until_ready, BatchAccumulator};
use simtel_engine::message::{ContextRecord, MessageIdentity, SimMessage, TickRecord};
use simtel_engine::retry_tracker::{RetryTracker, RetryTrackerMetrics};
use simtel_engine::service::{LifecycleHandle, Service, ServiceState};
use simtel_storage::RawStorageProvider;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The metadata-gate capability a persistence indexer polls before it
/// starts consuming. Implemented by [`MetadataReader`] in production;
/// tests substitute an in-memory double.
#[async_trait::async_trait(?Send)]
pub trait MetadataGate {
    /// Fetches the coordination record for `run_id`.
    async fn get_metadata(&self, run_id: &str) -> Result<Metadata, Error>;
    /// Releases any cached connection between poll attempts.
    async fn release_connection(&self);
}

#[async_trait::async_trait(?Send)]
impl MetadataGate for MetadataReader {
    async fn get_metadata(&self, run_id: &str) -> Result<Metadata, Error> {
        MetadataReader::get_metadata(self, run_id).await
    }

    async fn release_connection(&self) {
        MetadataReader::release_connection(self).await;
    }
}

/// The raw-storage capability a persistence indexer writes context and
/// tick batches to. Implemented by [`RawStorageProvider`] in production.
#[async_trait::async_trait(?Send)]
pub trait TickSink {
    /// Prepares the run's storage layout.
    async fn initialize(&self, run_id: &str) -> Result<(), Error>;
    /// Writes the run's single context record.
    async fn write_context(&self, run_id: &str, context_bytes: &[u8]) -> Result<(), Error>;
    /// Writes a batch of tick records.
    async fn write_ticks(&self, run_id: &str, batch: &[TickRecord]) -> Result<(), Error>;
    /// Writes a batch of tick records to the dead-letter sink.
    async fn write_ticks_to_dlq(&self, run_id: &str, batch: &[TickRecord]) -> Result<(), Error>;
}

#[async_trait::async_trait(?Send)]
impl TickSink for RawStorageProvider {
    async fn initialize(&self, run_id: &str) -> Result<(), Error> {
        RawStorageProvider::initialize(self, run_id).await
    }

    async fn write_context(&self, run_id: &str, context_bytes: &[u8]) -> Result<(), Error> {
        RawStorageProvider::write_context(self, run_id, context_bytes).await
    }

    async fn write_ticks(&self, run_id: &str, batch: &[TickRecord]) -> Result<(), Error> {
        RawStorageProvider::write_ticks(self, run_id, batch).await
    }

    async fn write_ticks_to_dlq(&self, run_id: &str, batch: &[TickRecord]) -> Result<(), Error> {
        RawStorageProvider::write_ticks_to_dlq(self, run_id, batch).await
    }
}

/// Packs a context record into the opaque byte form raw storage persists.
/// Length-prefixed `run_id` followed by fixed-width fields, little detail
/// beyond what a reader needs to reconstruct the record; this crate owns
/// no general serialization format, only this one record shape.
fn encode_context(context: &ContextRecord) -> Vec<u8> {
    let run_id = context.run_id.as_bytes();
    let mut buf = BytesMut::with_capacity(4 + run_id.len() + 8 + 8 + 4);
    buf.put_u32(run_id.len() as u32);
    buf.put_slice(run_id);
    buf.put_i64(context.start_time_ms);
    buf.put_i64(context.initial_seed);
    buf.put_u32(context.sampling_interval);
    buf.to_vec()
}

fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
}

/// Drains a run's context and tick records from its single input port into
/// raw storage, blocking behind a metadata gate until the run's
/// coordination record exists, and handing batches that exhaust their
/// retry budget to a dead-letter sink.
pub struct PersistenceIndexer {
    name: String,
    input: Binding<SimMessage>,
    metadata: Box<dyn MetadataGate>,
    storage: Box<dyn TickSink>,
    options: PersistenceIndexerOptions,
    retry_tracker: RetryTracker,
    dlq_batches_total: u64,
}

impl PersistenceIndexer {
    /// Builds an indexer bound to `input`, gated by `metadata`, writing
    /// through `storage`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        input: Binding<SimMessage>,
        metadata: Box<dyn MetadataGate>,
        storage: Box<dyn TickSink>,
        options: PersistenceIndexerOptions,
    ) -> Self {
        let retry_tracker = RetryTracker::new(options.retry_tracker_max_keys);
        Self {
            name: name.into(),
            input,
            metadata,
            storage,
            options,
            retry_tracker,
            dlq_batches_total: 0,
        }
    }

    /// Batches handed to the dead-letter sink over this indexer's
    /// lifetime.
    #[must_use]
    pub fn dlq_batches_total(&self) -> u64 {
        self.dlq_batches_total
    }

    /// A snapshot of the retry tracker's metrics.
    #[must_use]
    pub fn retry_tracker_metrics(&self) -> RetryTrackerMetrics {
        self.retry_tracker.metrics()
    }

    async fn write_with_retry(
        &mut self,
        run_id: &str,
        batch: Vec<TickRecord>,
        token: &CancellationToken,
    ) -> Result<(), Error> {
        let min_tick = batch.iter().map(|r| r.tick_number).min().expect("flushed batch is non-empty");
        let max_tick = batch.iter().map(|r| r.tick_number).max().expect("flushed batch is non-empty");
        let batch_id = MessageIdentity::Batch {
            run_id: run_id.to_string(),
            min_tick,
            max_tick,
        }
        .to_string();

        loop {
            match self.storage.write_ticks(run_id, &batch).await {
                Ok(()) => {
                    self.retry_tracker.reset(&batch_id);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::TransientIo => {
                    let attempt = self.retry_tracker.increment_and_get(&batch_id);
                    if attempt > self.options.max_retries {
                        return self.move_batch_to_dlq(run_id, &batch_id, &batch).await;
                    }
                    tracing::warn!(
                        service = %self.name,
                        batch = %batch_id,
                        attempt,
                        error = %e,
                        "transient write failure, retrying"
                    );
                    let delay = backoff_delay(attempt, self.options.retry_backoff_base_ms, self.options.retry_backoff_cap_ms);
                    tokio::select! {
                        biased;
                        () = token.cancelled() => return Err(Error::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn move_batch_to_dlq(&mut self, run_id: &str, batch_id: &str, batch: &[TickRecord]) -> Result<(), Error> {
        self.storage.write_ticks_to_dlq(run_id, batch).await?;
        self.retry_tracker.mark_moved_to_dlq(batch_id);
        self.dlq_batches_total += 1;
        tracing::warn!(
            service = %self.name,
            batch = %batch_id,
            dlq_batches = self.dlq_batches_total,
            "batch exhausted its retry budget, moved to dead-letter queue"
        );
        Ok(())
    }
}

#[async_trait::async_trait(?Send)]
impl Service for PersistenceIndexer {
    async fn run(&mut self, lifecycle: LifecycleHandle) -> Result<(), Error> {
        let token = lifecycle.cancellation_token().clone();
        let run_id = self.options.run_id.clone();

        let gate_result = poll_until_ready(
            || self.metadata.get_metadata(&run_id),
            || self.metadata.release_connection(),
            Duration::from_millis(self.options.poll_interval_ms),
            Duration::from_millis(self.options.max_poll_duration_ms),
            &token,
        )
        .await;
        match gate_result {
            Ok(_metadata) => {}
            Err(e) if e.kind() == ErrorKind::Cancelled => return Ok(()),
            Err(e) => {
                return Err(Error::Exhausted(format!(
                    "run '{run_id}' exhausted its metadata gate: {e}"
                )));
            }
        }
        self.storage.initialize(&run_id).await?;

        // Context-first rule: block until the run's context record arrives,
        // buffering any tick records observed ahead of it so none are lost.
        let mut pending_ticks = Vec::new();
        loop {
            if lifecycle.state() == ServiceState::Paused {
                lifecycle.wait_for_resume().await;
            }
            match self.input.read(&token).await {
                Ok(SimMessage::Context(context)) => {
                    let encoded = encode_context(&context);
                    self.storage.write_context(&run_id, &encoded).await?;
                    break;
                }
                Ok(SimMessage::Tick(tick)) => pending_ticks.push(tick),
                Err(e) if e.kind() == ErrorKind::Cancelled => return Ok(()),
                Err(e) => return Err(e),
            }
        }

        let mut accumulator = BatchAccumulator::new(
            self.options.batch_size,
            Duration::from_millis(self.options.batch_timeout_ms),
        );
        for tick in pending_ticks.drain(..) {
            accumulator.push(tick);
        }

        loop {
            if lifecycle.state() == ServiceState::Paused {
                lifecycle.wait_for_resume().await;
            }
            if token.is_cancelled() {
                break;
            }

            match self.input.try_read_with_deadline(Duration::from_millis(100)).await {
                Ok(Some(SimMessage::Tick(tick))) => accumulator.push(tick),
                Ok(Some(SimMessage::Context(_))) => {
                    tracing::warn!(service = %self.name, "ignoring duplicate context record after the context-first read");
                }
                Ok(None) => {}
                Err(e) if e.kind() == ErrorKind::Cancelled => break,
                Err(e) => return Err(e),
            }

            if accumulator.should_flush() {
                if let Some(batch) = accumulator.take() {
                    self.write_with_retry(&run_id, batch, &token).await?;
                }
            }
        }

        if let Some(batch) = accumulator.take() {
            self.write_with_retry(&run_id, batch, &token).await?;
        }

        tracing::info!(
            service = %self.name,
            dlq_batches = self.dlq_batches_total,
            "persistence indexer stopped"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simtel_channel::mpsc;
    use simtel_engine::binding::{ReceiverHandle, SenderHandle};
    use std::cell::{Cell, RefCell};

    struct ImmediateMetadata;

    #[async_trait::async_trait(?Send)]
    impl MetadataGate for ImmediateMetadata {
        async fn get_metadata(&self, run_id: &str) -> Result<Metadata, Error> {
            Ok(Metadata {
                run_id: run_id.to_string(),
                fields: serde_json::Value::Null,
            })
        }

        async fn release_connection(&self) {}
    }

    struct NeverReadyMetadata;

    #[async_trait::async_trait(?Send)]
    impl MetadataGate for NeverReadyMetadata {
        async fn get_metadata(&self, run_id: &str) -> Result<Metadata, Error> {
            Err(Error::NotFound(run_id.to_string()))
        }

        async fn release_connection(&self) {}
    }

    /// An in-memory [`TickSink`] that records every write and can be told
    /// to fail the first `fail_count` attempts at `write_ticks`.
    #[derive(Default)]
    struct RecordingSink {
        context_writes: Cell<u32>,
        tick_batches: RefCell<Vec<usize>>,
        dlq_batches: RefCell<Vec<usize>>,
        attempts: Cell<u32>,
        fail_count: u32,
    }

    impl RecordingSink {
        fn failing(fail_count: u32) -> Self {
            Self {
                fail_count,
                ..Self::default()
            }
        }
    }

    #[async_trait::async_trait(?Send)]
    impl TickSink for RecordingSink {
        async fn initialize(&self, _run_id: &str) -> Result<(), Error> {
            Ok(())
        }

        async fn write_context(&self, _run_id: &str, _context_bytes: &[u8]) -> Result<(), Error> {
            self.context_writes.set(self.context_writes.get() + 1);
            Ok(())
        }

        async fn write_ticks(&self, _run_id: &str, batch: &[TickRecord]) -> Result<(), Error> {
            let attempt = self.attempts.get() + 1;
            self.attempts.set(attempt);
            if attempt <= self.fail_count {
                return Err(Error::TransientIo {
                    message: "injected failure".to_string(),
                    source: None,
                });
            }
            self.tick_batches.borrow_mut().push(batch.len());
            Ok(())
        }

        async fn write_ticks_to_dlq(&self, _run_id: &str, batch: &[TickRecord]) -> Result<(), Error> {
            self.dlq_batches.borrow_mut().push(batch.len());
            Ok(())
        }
    }

    fn options(run_id: &str) -> PersistenceIndexerOptions {
        PersistenceIndexerOptions {
            run_id: run_id.to_string(),
            poll_interval_ms: 10,
            max_poll_duration_ms: 200,
            batch_size: 64,
            batch_timeout_ms: 10_000,
            max_retries: 3,
            retry_tracker_max_keys: 10_000,
            retry_backoff_base_ms: 1,
            retry_backoff_cap_ms: 10,
        }
    }

    fn channel_of(capacity: usize) -> (Binding<SimMessage>, mpsc::Sender<SimMessage>) {
        let (sender, receiver) = mpsc::Channel::new(capacity);
        (Binding::input(ReceiverHandle::Spsc(receiver)), sender)
    }

    fn context(run_id: &str) -> SimMessage {
        SimMessage::Context(ContextRecord {
            run_id: run_id.to_string(),
            start_time_ms: 0,
            initial_seed: 1,
            sampling_interval: 1,
        })
    }

    fn tick(tick_number: u64) -> SimMessage {
        SimMessage::Tick(TickRecord {
            tick_number,
            organism_id: None,
            payload: tick_number.to_le_bytes().to_vec(),
        })
    }

    /// Shares one [`RecordingSink`] between the service under test and the
    /// assertions made against it.
    struct SinkHandle(std::rc::Rc<RecordingSink>);

    #[async_trait::async_trait(?Send)]
    impl TickSink for SinkHandle {
        async fn initialize(&self, run_id: &str) -> Result<(), Error> {
            self.0.initialize(run_id).await
        }
        async fn write_context(&self, run_id: &str, bytes: &[u8]) -> Result<(), Error> {
            self.0.write_context(run_id, bytes).await
        }
        async fn write_ticks(&self, run_id: &str, batch: &[TickRecord]) -> Result<(), Error> {
            self.0.write_ticks(run_id, batch).await
        }
        async fn write_ticks_to_dlq(&self, run_id: &str, batch: &[TickRecord]) -> Result<(), Error> {
            self.0.write_ticks_to_dlq(run_id, batch).await
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn flushes_once_the_configured_batch_size_is_reached() {
        let (input, sender) = channel_of(128);
        let sink = std::rc::Rc::new(RecordingSink::default());

        let mut indexer = PersistenceIndexer::new(
            "indexer",
            input,
            Box::new(ImmediateMetadata),
            Box::new(SinkHandle(sink.clone())),
            options("run-1"),
        );
        let lifecycle = LifecycleHandle::new();
        lifecycle.set_running();
        let token = lifecycle.cancellation_token().clone();

        sender.send_cancelable(context("run-1"), &token).await.expect("send context");
        for t in 0..64u64 {
            sender.send_cancelable(tick(t), &token).await.expect("send tick");
        }

        let run_fut = indexer.run(lifecycle.clone());
        tokio::pin!(run_fut);
        tokio::select! {
            _ = &mut run_fut => panic!("indexer should still be waiting for more input"),
            () = tokio::time::sleep(Duration::from_millis(300)) => {}
        }

        assert_eq!(sink.context_writes.get(), 1);
        assert_eq!(sink.tick_batches.borrow().as_slice(), &[64]);

        token.cancel();
        let _ = run_fut.await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn flushes_a_partial_batch_after_the_batch_timeout() {
        let (input, sender) = channel_of(128);
        let sink = std::rc::Rc::new(RecordingSink::default());

        let mut opts = options("run-2");
        opts.batch_timeout_ms = 50;
        let mut indexer = PersistenceIndexer::new(
            "indexer",
            input,
            Box::new(ImmediateMetadata),
            Box::new(SinkHandle(sink.clone())),
            opts,
        );
        let lifecycle = LifecycleHandle::new();
        lifecycle.set_running();
        let token = lifecycle.cancellation_token().clone();

        sender.send_cancelable(context("run-2"), &token).await.expect("send context");
        for t in 0..5u64 {
            sender.send_cancelable(tick(t), &token).await.expect("send tick");
        }

        let run_fut = indexer.run(lifecycle.clone());
        tokio::pin!(run_fut);
        tokio::select! {
            _ = &mut run_fut => panic!("indexer should still be running"),
            () = tokio::time::sleep(Duration::from_millis(400)) => {}
        }

        assert_eq!(sink.tick_batches.borrow().as_slice(), &[5]);

        token.cancel();
        let _ = run_fut.await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn moves_a_batch_to_the_dlq_after_exhausting_its_retry_budget() {
        let (input, sender) = channel_of(128);
        // The sink fails the first four attempts; max_retries is 3, so the
        // fourth failure (attempt 4 > max_retries) triggers the handoff.
        let sink = RecordingSink::failing(4);

        let mut opts = options("run-3");
        opts.batch_size = 4;
        opts.max_retries = 3;
        opts.retry_backoff_base_ms = 1;
        opts.retry_backoff_cap_ms = 2;
        let mut indexer = PersistenceIndexer::new("indexer", input, Box::new(ImmediateMetadata), Box::new(sink), opts);
        let lifecycle = LifecycleHandle::new();
        lifecycle.set_running();
        let token = lifecycle.cancellation_token().clone();

        sender.send_cancelable(context("run-3"), &token).await.expect("send context");
        for t in 1000..1004u64 {
            sender.send_cancelable(tick(t), &token).await.expect("send tick");
        }

        let run_fut = indexer.run(lifecycle.clone());
        tokio::pin!(run_fut);
        tokio::select! {
            _ = &mut run_fut => panic!("indexer should still be waiting for more input"),
            () = tokio::time::sleep(Duration::from_millis(300)) => {}
        }

        assert_eq!(indexer.dlq_batches_total(), 1);
        assert_eq!(indexer.retry_tracker_metrics().dlq_moved_count, 1);
        assert_eq!(indexer.retry_tracker.get("run-3:1000-1003"), 0);

        token.cancel();
        let _ = run_fut.await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn metadata_gate_timeout_surfaces_as_an_exhausted_error_naming_the_run() {
        let (input, _sender) = channel_of(8);
        let mut opts = options("run-4");
        opts.poll_interval_ms = 10;
        opts.max_poll_duration_ms = 50;
        let mut indexer = PersistenceIndexer::new(
            "indexer",
            input,
            Box::new(NeverReadyMetadata),
            Box::new(RecordingSink::default()),
            opts,
        );
        let lifecycle = LifecycleHandle::new();
        lifecycle.set_running();

        let result = tokio::time::timeout(Duration::from_millis(500), indexer.run(lifecycle)).await;
        let err = result.expect("run() must resolve well within the timeout").expect_err("gate must be exhausted");

        assert_eq!(err.kind(), ErrorKind::Exhausted);
        let message = err.to_string();
        assert!(message.contains("run-4"), "error should name the run: {message}");
    }

    #[test]
    fn backoff_delay_doubles_up_to_the_cap() {
        assert_eq!(backoff_delay(1, 100, 5_000), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, 100, 5_000), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, 100, 5_000), Duration::from_millis(400));
        assert_eq!(backoff_delay(10, 100, 5_000), Duration::from_millis(5_000));
    }
}
