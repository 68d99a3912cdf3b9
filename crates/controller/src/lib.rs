// SPDX-License-Identifier: Apache-2.0

//! The orchestrator: builds a pipeline topology from a validated
//! [`simtel_config::PipelineConfig`] and a [`Registry`] of constructors,
//! then owns every service's lifecycle for the life of the process.
//!
//! Because channels are single-threaded (`Rc`-backed) by design, the whole
//! topology runs on one dedicated OS thread inside a `LocalSet`; each
//! service is a cooperatively-scheduled task on that thread, not a thread
//! of its own. This is the "single-threaded runtime with task-level
//! concurrency" the runtime's concurrency model explicitly allows. Control
//! (pause/resume/stop) and metrics cross back to the caller's thread
//! through plain `Arc`-backed handles — [`simtel_engine::service::LifecycleHandle`]
//! and [`simtel_engine::binding::BindingMetricsHandle`] — which is the only
//! part of the topology that is ever shared across threads.

pub mod error;
pub mod registry;
pub mod resource;
pub mod status;
pub mod thread_task;

pub use error::Error;
pub use registry::{Registry, ResourceBuilderFn, ServiceBuildArgs, ServiceBuilderFn};
pub use resource::{Resource, ResourceContext};
pub use status::{BindingStatus, ServiceStatus};

use simtel_config::PipelineConfig;
use simtel_engine::binding::{Binding, Direction, ReceiverHandle, SenderHandle};
use simtel_engine::metrics::{BindingKey, MetricsCollector};
use simtel_engine::service::LifecycleHandle;
use simtel_engine::Service;
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;
use thread_task::{spawn_thread_local_task, ThreadLocalTaskHandle};
use tokio_util::sync::CancellationToken;

/// One attachable channel, built as either a single-consumer or
/// multi-consumer variant depending on how many ports read from it.
enum ChannelEntry<M> {
    /// Exactly one consumer attaches; any number of producers may.
    Spsc {
        sender: simtel_channel::mpsc::Sender<M>,
        receiver: RefCell<Option<simtel_channel::mpsc::Receiver<M>>>,
    },
    /// More than one consumer attaches.
    Mpmc {
        sender: simtel_channel::mpmc::Sender<M>,
        receiver: simtel_channel::mpmc::Receiver<M>,
    },
}

fn build_output_binding<M>(
    channels: &HashMap<String, ChannelEntry<M>>,
    channel_name: &str,
) -> Binding<M> {
    let entry = channels
        .get(channel_name)
        .expect("channel reference was validated before the build");
    let sender = match entry {
        ChannelEntry::Spsc { sender, .. } => SenderHandle::Spsc(sender.clone()),
        ChannelEntry::Mpmc { sender, .. } => SenderHandle::Mpmc(sender.clone()),
    };
    Binding::output(sender)
}

fn build_input_binding<M>(
    channels: &HashMap<String, ChannelEntry<M>>,
    channel_name: &str,
) -> Binding<M> {
    let entry = channels
        .get(channel_name)
        .expect("channel reference was validated before the build");
    let receiver = match entry {
        ChannelEntry::Spsc { receiver, .. } => {
            let taken = receiver
                .borrow_mut()
                .take()
                .expect("a single-consumer channel's receiver is taken exactly once");
            ReceiverHandle::Spsc(taken)
        }
        ChannelEntry::Mpmc { receiver, .. } => ReceiverHandle::Mpmc(receiver.clone()),
    };
    Binding::input(receiver)
}

/// Builds every channel, resource, and service named in `config`, wiring
/// bindings between them and registering each binding's metrics handle.
/// Runs entirely on the pipeline's dedicated thread: this is where `Rc`
/// values are created and must stay.
fn build_topology<M: Clone + 'static>(
    config: &PipelineConfig,
    registry: &Registry<M>,
    metrics: &MetricsCollector,
) -> Result<Vec<(String, Box<dyn Service>)>, Error> {
    let mut receiver_counts: HashMap<&str, usize> = HashMap::new();
    for service in config.services.values() {
        for port_ref in service.inputs.values() {
            for channel_name in port_ref.channel_names() {
                *receiver_counts.entry(channel_name).or_insert(0) += 1;
            }
        }
    }

    let mut channels: HashMap<String, ChannelEntry<M>> = HashMap::new();
    for (name, channel_config) in &config.channels {
        registry.build_channel(name, &channel_config.class_name, &channel_config.options)?;
        let capacity = usize::try_from(channel_config.options.capacity)
            .expect("capacity validated positive before build_topology runs");
        let entry = if receiver_counts.get(name.as_str()).copied().unwrap_or(0) > 1 {
            let (sender, receiver) = simtel_channel::mpmc::Channel::new(capacity);
            ChannelEntry::Mpmc { sender, receiver }
        } else {
            let (sender, receiver) = simtel_channel::mpsc::Channel::new(capacity);
            ChannelEntry::Spsc {
                sender,
                receiver: RefCell::new(Some(receiver)),
            }
        };
        let _ = channels.insert(name.clone(), entry);
    }

    let mut resources: HashMap<String, Box<dyn Resource>> = HashMap::new();
    for (name, resource_config) in &config.resources {
        let resource =
            registry.build_resource(name, &resource_config.class_name, &resource_config.options)?;
        let _ = resources.insert(name.clone(), resource);
    }

    let mut built = Vec::with_capacity(config.services.len());
    for service_name in config.startup_order() {
        let service_config = &config.services[service_name];

        let mut inputs = HashMap::new();
        for (port, port_ref) in &service_config.inputs {
            let bindings = port_ref
                .channel_names()
                .into_iter()
                .map(|channel_name| {
                    let binding = build_input_binding(&channels, channel_name);
                    metrics.register(
                        BindingKey {
                            service_name: service_name.to_string(),
                            port_name: port.clone(),
                            channel_name: channel_name.to_string(),
                            direction: Direction::Input,
                        },
                        binding.metrics_handle(),
                    );
                    binding
                })
                .collect();
            let _ = inputs.insert(port.clone(), bindings);
        }

        let mut outputs = HashMap::new();
        for (port, port_ref) in &service_config.outputs {
            let bindings = port_ref
                .channel_names()
                .into_iter()
                .map(|channel_name| {
                    let binding = build_output_binding(&channels, channel_name);
                    metrics.register(
                        BindingKey {
                            service_name: service_name.to_string(),
                            port_name: port.clone(),
                            channel_name: channel_name.to_string(),
                            direction: Direction::Output,
                        },
                        binding.metrics_handle(),
                    );
                    binding
                })
                .collect();
            let _ = outputs.insert(port.clone(), bindings);
        }

        let mut resolved_resources: HashMap<String, Box<dyn std::any::Any>> = HashMap::new();
        for (port, reference) in &service_config.resources {
            let (capability, resource_name) = reference
                .split_once(':')
                .expect("resource reference form validated before build_topology runs");
            let resource = resources
                .get(resource_name)
                .expect("resource reference target validated before build_topology runs");
            let wrapped = resource.get_wrapped_resource(ResourceContext {
                service_name: service_name.to_string(),
                port_name: port.clone(),
                capability: capability.to_string(),
            })?;
            let _ = resolved_resources.insert(port.clone(), wrapped);
        }

        let args = ServiceBuildArgs {
            name: service_name.to_string(),
            options: service_config.options.clone(),
            inputs,
            outputs,
            resources: resolved_resources,
        };

        let service = registry.build_service(&service_config.class_name, args)?;
        built.push((service_name.to_string(), service));
    }

    Ok(built)
}

/// Runs every built service as a local task until each exits (cooperatively,
/// after its lifecycle is stopped) or the pipeline-wide shutdown token fires.
async fn run_all(
    services: Vec<(String, Box<dyn Service>)>,
    lifecycles: HashMap<String, LifecycleHandle>,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    let mut set = tokio::task::JoinSet::new();
    for (name, mut service) in services {
        let lifecycle = lifecycles
            .get(&name)
            .cloned()
            .expect("every built service has a pre-registered lifecycle handle");
        lifecycle.set_running();
        set.spawn_local(async move {
            let outcome = service.run(lifecycle.clone()).await;
            match &outcome {
                Ok(()) => lifecycle.set_stopped(),
                Err(_) => lifecycle.set_error(),
            }
            (name, outcome)
        });
    }

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            joined = set.join_next() => match joined {
                Some(Ok((name, Err(source)))) => {
                    tracing::error!(service = %name, error = %source, "service exited with an error");
                }
                Some(Err(panic)) => {
                    tracing::error!(error = %panic, "a service task panicked before exiting");
                }
                Some(Ok((_, Ok(())))) => {}
                None => break,
            },
        }
    }
    Ok(())
}

/// Owns a pipeline's lifecycle end to end: build, run, observe, tear down.
///
/// `M` is the message type carried on every channel in the topology.
pub struct Orchestrator<M> {
    config: PipelineConfig,
    registry: Option<Registry<M>>,
    metrics: MetricsCollector,
    lifecycles: HashMap<String, LifecycleHandle>,
    pipeline_thread: Option<ThreadLocalTaskHandle<(), Error>>,
    metrics_ticker: Option<ThreadLocalTaskHandle<(), Error>>,
}

impl<M: Clone + Send + 'static> Orchestrator<M> {
    /// Validates `config` against `registry`'s known classes and prepares
    /// an orchestrator ready to [`Self::start_all`]. Building the actual
    /// topology (channels, resources, services) is deferred to
    /// `start_all`, since it must run on the pipeline's own thread.
    pub fn new(config: PipelineConfig, registry: Registry<M>) -> Result<Self, Error> {
        config
            .validate()
            .map_err(|e| Error::InvalidConfiguration { errors: vec![e] })?;
        config
            .validate_classes(
                &registry.known_channel_classes(),
                &registry.known_resource_classes(),
                &registry.known_service_classes(),
            )
            .map_err(|e| Error::InvalidConfiguration { errors: vec![e] })?;

        let lifecycles = config
            .services
            .keys()
            .map(|name| (name.clone(), LifecycleHandle::new()))
            .collect();

        Ok(Self {
            config,
            registry: Some(registry),
            metrics: MetricsCollector::new(),
            lifecycles,
            pipeline_thread: None,
            metrics_ticker: None,
        })
    }

    /// Builds the topology and spawns every service, in `startupSequence`
    /// order, on a dedicated pipeline thread. Returns once the topology is
    /// built and every service has been told to run; does not block for
    /// the pipeline's lifetime.
    pub fn start_all(&mut self) -> Result<(), Error> {
        let config = self.config.clone();
        let registry = self
            .registry
            .take()
            .expect("start_all called more than once on the same Orchestrator");
        let metrics = self.metrics.clone();
        let lifecycles = self.lifecycles.clone();

        let handle = spawn_thread_local_task("simtel-pipeline", move |shutdown| async move {
            let services = build_topology(&config, &registry, &metrics)?;
            run_all(services, lifecycles, shutdown).await
        })?;
        self.pipeline_thread = Some(handle);

        if self.config.metrics.enabled {
            let interval = Duration::from_secs(self.config.metrics.update_interval_seconds.max(1));
            let ticker_metrics = self.metrics.clone();
            let ticker = spawn_thread_local_task("simtel-metrics-ticker", move |shutdown| async move {
                loop {
                    tokio::select! {
                        biased;
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(interval) => {
                            ticker_metrics.tick(interval);
                        }
                    }
                }
                Ok(())
            })?;
            self.metrics_ticker = Some(ticker);
        }

        Ok(())
    }

    /// Requests every service stop, in reverse `startupSequence` order, and
    /// waits for the pipeline thread and metrics ticker to exit.
    pub fn stop_all(mut self) -> Result<(), Error> {
        for name in self.config.startup_order().into_iter().rev() {
            if let Some(lifecycle) = self.lifecycles.get(name) {
                lifecycle.stop();
            }
        }
        if let Some(ticker) = self.metrics_ticker.take() {
            ticker.shutdown_and_join()?;
        }
        if let Some(pipeline) = self.pipeline_thread.take() {
            pipeline.shutdown_and_join()?;
        }
        Ok(())
    }

    /// Pauses one service by name.
    pub fn pause_service(&self, name: &str) -> Result<(), Error> {
        self.lifecycles
            .get(name)
            .ok_or_else(|| Error::UnknownServiceInstance(name.to_string()))?
            .pause();
        Ok(())
    }

    /// Resumes one paused service by name.
    pub fn resume_service(&self, name: &str) -> Result<(), Error> {
        self.lifecycles
            .get(name)
            .ok_or_else(|| Error::UnknownServiceInstance(name.to_string()))?
            .resume();
        Ok(())
    }

    /// Stops one service by name, ahead of a full [`Self::stop_all`].
    pub fn stop_service(&self, name: &str) -> Result<(), Error> {
        self.lifecycles
            .get(name)
            .ok_or_else(|| Error::UnknownServiceInstance(name.to_string()))?
            .stop();
        Ok(())
    }

    /// A point-in-time snapshot of every service's lifecycle state and
    /// every binding it owns, sourced from the latest metrics-collector
    /// window.
    #[must_use]
    pub fn get_pipeline_status(&self) -> Vec<ServiceStatus> {
        self.config
            .services
            .keys()
            .map(|name| {
                let state = self
                    .lifecycles
                    .get(name)
                    .map(LifecycleHandle::state)
                    .unwrap_or(simtel_engine::service::ServiceState::Stopped);

                let bindings = self
                    .metrics
                    .keys()
                    .into_iter()
                    .filter(|key| key.service_name == *name)
                    .map(|key| {
                        let rate = self.metrics.rate(&key);
                        let messages_per_second = rate.map(|r| r.messages_per_second).unwrap_or(0.0);
                        let error_count = rate.map(|r| r.error_count).unwrap_or(0);
                        let state = self
                            .metrics
                            .state(&key)
                            .unwrap_or(simtel_engine::binding::BindingState::Waiting);
                        BindingStatus {
                            port: key.port_name.clone(),
                            attached: key.channel_name.clone(),
                            direction: key.direction,
                            state,
                            messages_per_second,
                            error_count,
                        }
                    })
                    .collect();

                ServiceStatus {
                    name: name.clone(),
                    state,
                    bindings,
                }
            })
            .collect()
    }
}
