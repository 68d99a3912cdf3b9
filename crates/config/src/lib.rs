// SPDX-License-Identifier: Apache-2.0

//! The resolved pipeline configuration tree.
//!
//! This crate is deliberately inert: it parses and structurally validates a
//! declarative topology (channels, resources, services, startup order) but
//! never instantiates anything. The orchestrator in `simtel-controller`
//! consumes a validated [`PipelineConfig`] to build the live topology.

pub mod error;

use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashSet;

pub use error::Error;

/// A port's channel attachment: a single channel, or an ordered list of
/// channels for a port with multiple producers/consumers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PortRef {
    /// A single named channel.
    One(String),
    /// An ordered list of named channels.
    Many(Vec<String>),
}

impl PortRef {
    /// Flattens this reference into an ordered list of channel names.
    #[must_use]
    pub fn channel_names(&self) -> Vec<&str> {
        match self {
            Self::One(name) => vec![name.as_str()],
            Self::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// Options nested under `channels.<name>.options`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ChannelOptions {
    /// Queue capacity. Must be a positive integer; `-1` (unbounded) is
    /// rejected at build time.
    pub capacity: i64,
}

/// One entry under `channels.<name>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    /// The registered channel constructor to use.
    pub class_name: String,
    /// Channel-specific options.
    pub options: ChannelOptions,
}

/// One entry under `resources.<name>`. Options are opaque here; the
/// registered constructor for `class_name` interprets them.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    /// The registered resource constructor to use.
    pub class_name: String,
    /// Resource-specific options, interpreted by the constructor.
    #[serde(default)]
    pub options: serde_json::Value,
}

/// One entry under `services.<name>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// The registered service constructor to use.
    pub class_name: String,
    /// `portName -> channelName | [channelName, ...]`.
    #[serde(default)]
    pub inputs: IndexMap<String, PortRef>,
    /// `portName -> channelName | [channelName, ...]`.
    #[serde(default)]
    pub outputs: IndexMap<String, PortRef>,
    /// `portName -> "<capability>:<resourceName>"`.
    #[serde(default)]
    pub resources: IndexMap<String, String>,
    /// Service-specific options, interpreted by the constructor.
    #[serde(default)]
    pub options: serde_json::Value,
}

/// The `metrics { ... }` block.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    /// How often the metrics collector ticks, in seconds.
    #[serde(default = "default_update_interval_seconds")]
    pub update_interval_seconds: u64,
    /// Whether the metrics collector runs at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_update_interval_seconds() -> u64 {
    3
}

fn default_enabled() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            update_interval_seconds: default_update_interval_seconds(),
            enabled: default_enabled(),
        }
    }
}

/// A fully-parsed, structurally-unvalidated pipeline configuration tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// `channels.<name>`.
    pub channels: IndexMap<String, ChannelConfig>,
    /// `resources.<name>`.
    #[serde(default)]
    pub resources: IndexMap<String, ResourceConfig>,
    /// `services.<name>`.
    pub services: IndexMap<String, ServiceConfig>,
    /// Optional explicit startup order; services absent from this list
    /// start in definition order after the ones listed.
    #[serde(default)]
    pub startup_sequence: Option<Vec<String>>,
    /// The `metrics { ... }` block.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl PipelineConfig {
    /// Parses a YAML document into a [`PipelineConfig`], without running
    /// structural validation.
    pub fn from_yaml(source: &str) -> Result<Self, Error> {
        serde_yaml::from_str(source).map_err(Error::DeserializationError)
    }

    /// Checks the topology for structural consistency: every channel a
    /// service references exists, capacities are positive, resource
    /// references parse, and `startupSequence` names known services exactly
    /// once each.
    ///
    /// This does not check that `className` values resolve to a registered
    /// constructor; the orchestrator checks that separately once it has a
    /// concrete registry to check against, via [`Self::validate_classes`].
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();

        for (name, channel) in &self.channels {
            if channel.options.capacity <= 0 {
                errors.push(Error::InvalidCapacity {
                    name: name.clone(),
                    value: channel.options.capacity,
                });
            }
        }

        for (service_name, service) in &self.services {
            for (port, port_ref) in service.inputs.iter().chain(service.outputs.iter()) {
                for channel_name in port_ref.channel_names() {
                    if !self.channels.contains_key(channel_name) {
                        errors.push(Error::MissingChannel {
                            name: channel_name.to_string(),
                            service: service_name.clone(),
                            port: port.clone(),
                        });
                    }
                }
            }

            for (port, reference) in &service.resources {
                match reference.split_once(':') {
                    Some((_capability, resource_name))
                        if self.resources.contains_key(resource_name) => {}
                    _ => {
                        errors.push(Error::InvalidResourceReference {
                            service: service_name.clone(),
                            port: port.clone(),
                            reference: reference.clone(),
                        });
                    }
                }
            }
        }

        if let Some(sequence) = &self.startup_sequence {
            let mut seen = HashSet::with_capacity(sequence.len());
            for name in sequence {
                if !self.services.contains_key(name) {
                    errors.push(Error::UnknownServiceInStartupSequence(name.clone()));
                } else if !seen.insert(name.as_str()) {
                    errors.push(Error::DuplicateInStartupSequence(name.clone()));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfiguration { errors })
        }
    }

    /// Checks that every `className` in this configuration resolves against
    /// the given registered constructor names. Called by the orchestrator,
    /// which owns the registries.
    pub fn validate_classes(
        &self,
        known_channel_classes: &HashSet<&str>,
        known_resource_classes: &HashSet<&str>,
        known_service_classes: &HashSet<&str>,
    ) -> Result<(), Error> {
        let mut errors = Vec::new();

        for (name, channel) in &self.channels {
            if !known_channel_classes.contains(channel.class_name.as_str()) {
                errors.push(Error::UnknownChannelClass {
                    name: name.clone(),
                    class_name: channel.class_name.clone(),
                });
            }
        }

        for (name, resource) in &self.resources {
            if !known_resource_classes.contains(resource.class_name.as_str()) {
                errors.push(Error::UnknownResourceClass {
                    name: name.clone(),
                    class_name: resource.class_name.clone(),
                });
            }
        }

        for (name, service) in &self.services {
            if !known_service_classes.contains(service.class_name.as_str()) {
                errors.push(Error::UnknownServiceClass {
                    name: name.clone(),
                    class_name: service.class_name.clone(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfiguration { errors })
        }
    }

    /// Service names in startup order: the explicit `startupSequence`
    /// first, then every remaining service in declaration order.
    #[must_use]
    pub fn startup_order(&self) -> Vec<&str> {
        let mut ordered = Vec::with_capacity(self.services.len());
        let mut seen = HashSet::with_capacity(self.services.len());

        if let Some(sequence) = &self.startup_sequence {
            for name in sequence {
                if self.services.contains_key(name) && seen.insert(name.as_str()) {
                    ordered.push(name.as_str());
                }
            }
        }

        for name in self.services.keys() {
            if seen.insert(name.as_str()) {
                ordered.push(name.as_str());
            }
        }

        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
channels:
  test-stream:
    className: bounded
    options:
      capacity: 10
services:
  producer:
    className: dummy-producer
    outputs:
      out: test-stream
  consumer:
    className: dummy-consumer
    inputs:
      in: test-stream
startupSequence:
  - producer
  - consumer
"#
    }

    #[test]
    fn parses_and_validates_a_minimal_topology() {
        let config = PipelineConfig::from_yaml(minimal_yaml()).expect("valid yaml");
        config.validate().expect("structurally valid");
        assert_eq!(config.startup_order(), vec!["producer", "consumer"]);
    }

    #[test]
    fn rejects_negative_one_capacity() {
        let yaml = r#"
channels:
  c:
    className: bounded
    options:
      capacity: -1
services: {}
"#;
        let config = PipelineConfig::from_yaml(yaml).expect("valid yaml");
        let err = config.validate().expect_err("capacity -1 must be rejected");
        assert!(matches!(err, Error::InvalidConfiguration { .. }));
    }

    #[test]
    fn rejects_missing_channel_reference() {
        let yaml = r#"
channels: {}
services:
  producer:
    className: dummy-producer
    outputs:
      out: nonexistent
"#;
        let config = PipelineConfig::from_yaml(yaml).expect("valid yaml");
        config
            .validate()
            .expect_err("reference to an undeclared channel must fail");
    }

    #[test]
    fn rejects_duplicate_startup_sequence_entries() {
        let yaml = r#"
channels: {}
services:
  a:
    className: dummy-producer
startupSequence: [a, a]
"#;
        let config = PipelineConfig::from_yaml(yaml).expect("valid yaml");
        config
            .validate()
            .expect_err("duplicate startupSequence entries must fail");
    }

    #[test]
    fn startup_order_appends_unlisted_services_after_listed_ones() {
        let yaml = r#"
channels: {}
services:
  a:
    className: x
  b:
    className: x
  c:
    className: x
startupSequence: [c]
"#;
        let config = PipelineConfig::from_yaml(yaml).expect("valid yaml");
        assert_eq!(config.startup_order(), vec!["c", "a", "b"]);
    }
}
