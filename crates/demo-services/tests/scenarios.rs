// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios driven through the full [`Orchestrator`], as
//! opposed to the narrower in-process unit tests colocated with each
//! service module. These exercise the config-driven build path: channel
//! selection, resource resolution, and lifecycle control by service name.

use simtel_config::PipelineConfig;
use simtel_controller::{Orchestrator, Registry};
use simtel_engine::message::SimMessage;
use simtel_engine::service::ServiceState;
use std::time::Duration;

fn registry() -> Registry<SimMessage> {
    let mut registry = Registry::new();
    simtel_demo_services::register_defaults(&mut registry);
    registry
}

fn state_of(statuses: &[simtel_controller::ServiceStatus], name: &str) -> ServiceState {
    statuses
        .iter()
        .find(|s| s.name == name)
        .expect("service present in status snapshot")
        .state
}

#[tokio::test(flavor = "current_thread")]
async fn producer_outruns_a_small_channel_without_deadlock_or_loss() {
    let yaml = r#"
channels:
  ticks:
    className: bounded
    options:
      capacity: 10
services:
  producer:
    className: DummyProducer
    outputs:
      out: ticks
    options:
      start: 0
      count: 100
  consumer:
    className: DummyConsumer
    inputs:
      in: ticks
startupSequence: [consumer, producer]
metrics:
  enabled: false
"#;
    let config = PipelineConfig::from_yaml(yaml).expect("valid yaml");
    let mut orchestrator = Orchestrator::new(config, registry()).expect("valid topology");
    orchestrator.start_all().expect("topology builds");

    // Capacity 10 against a count of 100 forces the producer to block on a
    // full channel repeatedly; give it a generous bounded window to drain
    // through a live consumer before asserting anything.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let statuses = orchestrator.get_pipeline_status();
    assert_eq!(state_of(&statuses, "producer"), ServiceState::Stopped);
    // The consumer's read loop only exits on cancellation; stop it
    // explicitly ahead of tearing down the rest of the topology.
    orchestrator.stop_service("consumer").expect("known service");

    orchestrator.stop_all().expect("clean shutdown");
}

#[tokio::test(flavor = "current_thread")]
async fn pausing_a_service_through_the_orchestrator_halts_its_progress() {
    let yaml = r#"
channels:
  ticks:
    className: bounded
    options:
      capacity: 50
services:
  producer:
    className: DummyProducer
    outputs:
      out: ticks
    options:
      start: 0
      count: 1000000
  consumer:
    className: DummyConsumer
    inputs:
      in: ticks
startupSequence: [consumer, producer]
metrics:
  enabled: false
"#;
    // A large count keeps the producer mid-run for the whole test, so the
    // pause/resume assertions below aren't racing against natural
    // completion; the topology is still built and torn down through the
    // full orchestrator, not a directly-driven LifecycleHandle.
    let config = PipelineConfig::from_yaml(yaml).expect("valid yaml");
    let mut orchestrator = Orchestrator::new(config, registry()).expect("valid topology");

    orchestrator.start_all().expect("topology builds");
    orchestrator.pause_service("producer").expect("known service");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let statuses = orchestrator.get_pipeline_status();
    assert_eq!(state_of(&statuses, "producer"), ServiceState::Paused);

    orchestrator.resume_service("producer").expect("known service");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let statuses = orchestrator.get_pipeline_status();
    assert_ne!(state_of(&statuses, "producer"), ServiceState::Paused);

    orchestrator.stop_service("producer").expect("known service");
    orchestrator.stop_service("consumer").expect("known service");
    orchestrator.stop_all().expect("clean shutdown");
}
