// SPDX-License-Identifier: Apache-2.0

//! `DummyProducer` and `DummyConsumer`: the minimal producer/consumer pair
//! used to exercise channel wiring, pause/resume gating, and shutdown
//! without any persistence behind them.

use crate::options::{DummyConsumerOptions, DummyProducerOptions};
use simtel_engine::binding::Binding;
use simtel_engine::error::{Error, ErrorKind};
use simtel_engine::message::{SimMessage, TickRecord};
use simtel_engine::service::{LifecycleHandle, Service, ServiceState};

/// Writes `count` tick records (`start..start+count`) to its single output
/// port, then exits. Each record's payload is its tick number as
/// little-endian bytes.
pub struct DummyProducer {
    name: String,
    output: Binding<SimMessage>,
    options: DummyProducerOptions,
}

impl DummyProducer {
    /// Builds a producer bound to `output`.
    #[must_use]
    pub fn new(name: impl Into<String>, output: Binding<SimMessage>, options: DummyProducerOptions) -> Self {
        Self {
            name: name.into(),
            output,
            options,
        }
    }
}

#[async_trait::async_trait(?Send)]
impl Service for DummyProducer {
    async fn run(&mut self, lifecycle: LifecycleHandle) -> Result<(), Error> {
        let end = self.options.start + self.options.count;
        for tick_number in self.options.start..end {
            if lifecycle.state() == ServiceState::Paused {
                lifecycle.wait_for_resume().await;
            }
            if lifecycle.cancellation_token().is_cancelled() {
                break;
            }

            let record = SimMessage::Tick(TickRecord {
                tick_number,
                organism_id: None,
                payload: tick_number.to_le_bytes().to_vec(),
            });
            match self.output.write(record, lifecycle.cancellation_token()).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Cancelled => break,
                Err(e) => return Err(e),
            }
        }
        tracing::info!(service = %self.name, "producer exhausted its configured count");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Reads from its single input port until cancelled, counting received
/// messages.
pub struct DummyConsumer {
    name: String,
    input: Binding<SimMessage>,
    received: u64,
    #[allow(dead_code)]
    options: DummyConsumerOptions,
}

impl DummyConsumer {
    /// Builds a consumer bound to `input`.
    #[must_use]
    pub fn new(name: impl Into<String>, input: Binding<SimMessage>, options: DummyConsumerOptions) -> Self {
        Self {
            name: name.into(),
            input,
            received: 0,
            options,
        }
    }

    /// The number of messages received so far.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received
    }

    /// The input binding's current buffered depth.
    #[must_use]
    pub fn input_depth(&self) -> usize {
        self.input.depth()
    }
}

#[async_trait::async_trait(?Send)]
impl Service for DummyConsumer {
    async fn run(&mut self, lifecycle: LifecycleHandle) -> Result<(), Error> {
        loop {
            if lifecycle.state() == ServiceState::Paused {
                lifecycle.wait_for_resume().await;
            }
            if lifecycle.cancellation_token().is_cancelled() {
                break;
            }

            match self.input.read(lifecycle.cancellation_token()).await {
                Ok(_message) => self.received += 1,
                Err(e) if e.kind() == ErrorKind::Cancelled => break,
                Err(e) => return Err(e),
            }
        }
        tracing::info!(service = %self.name, received = self.received, "consumer stopped");
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

    #[tokio::test(flavor = "current_thread")]
    async fn producer_consumer_happy_path() {
        // Capacity exceeds count, so the producer never has to wait on a
        // consumer that isn't being driven concurrently; the capacity=10
        // backpressure case is covered by the end-to-end scenario tests.
        let (sender, receiver) = mpsc::Channel::new(100);
        let output = Binding::output(SenderHandle::Spsc(sender));
        let input = Binding::input(ReceiverHandle::Spsc(receiver));

        let mut producer = DummyProducer::new(
            "test-producer",
            output,
            DummyProducerOptions { start: 0, count: 100 },
        );
        let mut consumer = DummyConsumer::new("test-consumer", input, DummyConsumerOptions::default());

        let producer_lifecycle = LifecycleHandle::new();
        producer_lifecycle.set_running();
        let consumer_lifecycle = LifecycleHandle::new();
        consumer_lifecycle.set_running();
        let consumer_token = consumer_lifecycle.cancellation_token().clone();

        let _ = producer.run(producer_lifecycle.clone()).await;

        // The producer has exited, leaving all 100 records buffered; give
        // the consumer a bounded window to drain them, then cancel it so
        // its otherwise-unbounded read loop returns.
        let consumer_fut = consumer.run(consumer_lifecycle.clone());
        tokio::pin!(consumer_fut);
        tokio::select! {
            _ = &mut consumer_fut => {}
            () = tokio::time::sleep(std::time::Duration::from_millis(200)) => {
                consumer_token.cancel();
                let _ = consumer_fut.await;
            }
        }

        assert_eq!(consumer.received(), 100);
        assert_eq!(consumer.input_depth(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn pause_blocks_progress_until_resume() {
        let (sender, receiver) = mpsc::Channel::new(10);
        let output = Binding::output(SenderHandle::Spsc(sender));
        let input = Binding::input(ReceiverHandle::Spsc(receiver));

        let mut producer = DummyProducer::new(
            "test-producer",
            output,
            DummyProducerOptions { start: 0, count: 5 },
        );
        let mut consumer = DummyConsumer::new("test-consumer", input, DummyConsumerOptions::default());

        let producer_lifecycle = LifecycleHandle::new();
        producer_lifecycle.set_running();
        producer_lifecycle.pause();
        assert_eq!(producer_lifecycle.state(), ServiceState::Paused);
        let consumer_lifecycle = LifecycleHandle::new();
        consumer_lifecycle.set_running();
        let consumer_token = consumer_lifecycle.cancellation_token().clone();

        let producer_fut = producer.run(producer_lifecycle.clone());
        let consumer_fut = consumer.run(consumer_lifecycle.clone());
        tokio::pin!(producer_fut);
        tokio::pin!(consumer_fut);

        tokio::select! {
            _ = &mut producer_fut => panic!("producer should not make progress while paused"),
            _ = &mut consumer_fut => panic!("consumer should not observe any messages yet"),
            () = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
        }
        assert_eq!(consumer.received(), 0);

        producer_lifecycle.resume();

        // Drive the producer to completion and the consumer far enough to
        // drain everything it wrote, then cancel the consumer's otherwise
        // unbounded read loop.
        tokio::select! {
            _ = &mut producer_fut => {}
            _ = &mut consumer_fut => panic!("consumer loop exits only on cancellation"),
        }
        tokio::select! {
            _ = &mut consumer_fut => {}
            () = tokio::time::sleep(std::time::Duration::from_millis(200)) => {
                consumer_token.cancel();
                let _ = consumer_fut.await;
            }
        }

        assert_eq!(consumer.received(), 5);
    }
}
