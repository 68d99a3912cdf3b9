// SPDX-License-Identifier: Apache-2.0

//! The registry of constructors: a compile-time-populated, string-keyed
//! table of builder functions, standing in for the reflective
//! class-by-name instantiation a dynamic-language implementation of this
//! runtime would otherwise rely on.

use crate::error::Error;
use crate::resource::Resource;
use simtel_config::ChannelOptions;
use simtel_engine::{Binding, Service};
use std::any::Any;
use std::collections::{HashMap, HashSet};

/// Everything a service builder needs to construct one service instance.
/// Bindings are already wired to their channels; resources are already
/// resolved to capability wrappers the builder downcasts to a concrete
/// type.
pub struct ServiceBuildArgs<M> {
    /// The service's configured name.
    pub name: String,
    /// The service's `options` subtree, interpreted by the builder.
    pub options: serde_json::Value,
    /// `portName -> ordered list of input bindings`.
    pub inputs: HashMap<String, Vec<Binding<M>>>,
    /// `portName -> ordered list of output bindings`.
    pub outputs: HashMap<String, Vec<Binding<M>>>,
    /// `portName -> resolved capability wrapper`, to be downcast by the
    /// builder to the concrete type it expects.
    pub resources: HashMap<String, Box<dyn Any>>,
}

/// Builds one service instance from resolved arguments. Registered under a
/// stable `className` string.
pub type ServiceBuilderFn<M> =
    Box<dyn Fn(ServiceBuildArgs<M>) -> Result<Box<dyn Service>, Error> + Send + Sync>;

/// Builds one resource instance from its `options` subtree. Registered
/// under a stable `className` string.
pub type ResourceBuilderFn =
    Box<dyn Fn(&str, &serde_json::Value) -> Result<Box<dyn Resource>, Error> + Send + Sync>;

/// Validates one channel's resolved options. Registered under a stable
/// `className` string. The orchestrator still decides the concrete
/// single-consumer/multi-consumer channel kind itself, from how many
/// ports attach to a channel; this builder's role is the same as a
/// service/resource builder's: reject a `className`/`options` pairing the
/// embedding program doesn't recognize before the topology is built.
pub type ChannelBuilderFn = Box<dyn Fn(&str, &ChannelOptions) -> Result<(), Error> + Send + Sync>;

/// The orchestrator's constructor table, populated by the embedding
/// program at startup (see `simtel-demo-services` for the constructors
/// this repository registers).
#[derive(Default)]
pub struct Registry<M> {
    channels: HashMap<String, ChannelBuilderFn>,
    services: HashMap<String, ServiceBuilderFn<M>>,
    resources: HashMap<String, ResourceBuilderFn>,
}

impl<M> Registry<M> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            services: HashMap::new(),
            resources: HashMap::new(),
        }
    }

    /// Registers a channel constructor under `class_name`.
    pub fn register_channel(&mut self, class_name: impl Into<String>, builder: ChannelBuilderFn) {
        let _ = self.channels.insert(class_name.into(), builder);
    }

    /// Registers a service constructor under `class_name`.
    pub fn register_service(&mut self, class_name: impl Into<String>, builder: ServiceBuilderFn<M>) {
        let _ = self.services.insert(class_name.into(), builder);
    }

    /// Registers a resource constructor under `class_name`.
    pub fn register_resource(&mut self, class_name: impl Into<String>, builder: ResourceBuilderFn) {
        let _ = self.resources.insert(class_name.into(), builder);
    }

    /// Every registered channel class name, for config validation.
    #[must_use]
    pub fn known_channel_classes(&self) -> HashSet<&str> {
        self.channels.keys().map(String::as_str).collect()
    }

    /// Every registered service class name, for config validation.
    #[must_use]
    pub fn known_service_classes(&self) -> HashSet<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    /// Every registered resource class name, for config validation.
    #[must_use]
    pub fn known_resource_classes(&self) -> HashSet<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    pub(crate) fn build_channel(
        &self,
        name: &str,
        class_name: &str,
        options: &ChannelOptions,
    ) -> Result<(), Error> {
        let builder = self
            .channels
            .get(class_name)
            .ok_or_else(|| Error::UnknownClass {
                name: name.to_string(),
                class_name: class_name.to_string(),
            })?;
        builder(name, options)
    }

    pub(crate) fn build_service(
        &self,
        class_name: &str,
        args: ServiceBuildArgs<M>,
    ) -> Result<Box<dyn Service>, Error> {
        let builder = self
            .services
            .get(class_name)
            .ok_or_else(|| Error::UnknownClass {
                name: args.name.clone(),
                class_name: class_name.to_string(),
            })?;
        builder(args)
    }

    pub(crate) fn build_resource(
        &self,
        name: &str,
        class_name: &str,
        options: &serde_json::Value,
    ) -> Result<Box<dyn Resource>, Error> {
        let builder = self
            .resources
            .get(class_name)
            .ok_or_else(|| Error::UnknownClass {
                name: name.to_string(),
                class_name: class_name.to_string(),
            })?;
        builder(name, options)
    }
}
