// SPDX-License-Identifier: Apache-2.0

//! Reference `className` constructors: the dummy producer/consumer pair
//! and the metadata-gated persistence indexer, the `"database"` and
//! `"storage"` resource constructors they depend on, and the `"bounded"`
//! channel constructor. Call [`register_defaults`] to wire all six into a
//! fresh [`simtel_controller::Registry`] before building a topology.

mod dummy;
mod options;
mod persistence;

pub use dummy::{DummyConsumer, DummyProducer};
pub use options::{DummyConsumerOptions, DummyProducerOptions, PersistenceIndexerOptions};
pub use persistence::{MetadataGate, PersistenceIndexer, TickSink};

use simtel_controller::{Error, Registry, ServiceBuildArgs};
use simtel_database::{Database, DatabaseOptions, MetadataReader};
use simtel_engine::binding::Binding;
use simtel_engine::message::SimMessage;
use simtel_storage::{RawStorageProvider, Storage, StorageOptions};
use std::collections::HashMap;

fn parse_options<T: serde::de::DeserializeOwned>(name: &str, options: &serde_json::Value) -> Result<T, Error> {
    serde_json::from_value(options.clone()).map_err(|source| Error::InvalidOptions {
        name: name.to_string(),
        source,
    })
}

fn take_binding(
    ports: &mut HashMap<String, Vec<Binding<SimMessage>>>,
    service_name: &str,
    port_name: &str,
) -> Result<Binding<SimMessage>, Error> {
    ports
        .remove(port_name)
        .and_then(|mut bindings| if bindings.is_empty() { None } else { Some(bindings.remove(0)) })
        .ok_or_else(|| Error::MissingPort {
            service_name: service_name.to_string(),
            port_name: port_name.to_string(),
        })
}

fn take_resource<T: 'static>(
    resources: &mut HashMap<String, Box<dyn std::any::Any>>,
    service_name: &str,
    port_name: &str,
    expected_type: &'static str,
) -> Result<Box<T>, Error> {
    let wrapper = resources.remove(port_name).ok_or_else(|| Error::MissingPort {
        service_name: service_name.to_string(),
        port_name: port_name.to_string(),
    })?;
    wrapper.downcast::<T>().map_err(|_| Error::ResourceDowncastFailed {
        service_name: service_name.to_string(),
        port_name: port_name.to_string(),
        expected_type,
    })
}

/// Registers every constructor this crate provides under its conventional
/// `className`.
pub fn register_defaults(registry: &mut Registry<SimMessage>) {
    registry.register_channel(
        "bounded",
        Box::new(|_name: &str, _options: &simtel_config::ChannelOptions| Ok(())),
    );

    registry.register_service(
        "DummyProducer",
        Box::new(|mut args: ServiceBuildArgs<SimMessage>| {
            let options = parse_options::<DummyProducerOptions>(&args.name, &args.options)?;
            let output = take_binding(&mut args.outputs, &args.name, "out")?;
            Ok(Box::new(DummyProducer::new(args.name, output, options)) as Box<dyn simtel_engine::Service>)
        }),
    );

    registry.register_service(
        "DummyConsumer",
        Box::new(|mut args: ServiceBuildArgs<SimMessage>| {
            let options = parse_options::<DummyConsumerOptions>(&args.name, &args.options)?;
            let input = take_binding(&mut args.inputs, &args.name, "in")?;
            Ok(Box::new(DummyConsumer::new(args.name, input, options)) as Box<dyn simtel_engine::Service>)
        }),
    );

    registry.register_service(
        "PersistenceIndexer",
        Box::new(|mut args: ServiceBuildArgs<SimMessage>| {
            let options = parse_options::<PersistenceIndexerOptions>(&args.name, &args.options)?;
            let input = take_binding(&mut args.inputs, &args.name, "in")?;
            let metadata = take_resource::<MetadataReader>(&mut args.resources, &args.name, "metadata", "MetadataReader")?;
            let storage = take_resource::<RawStorageProvider>(&mut args.resources, &args.name, "storage", "RawStorageProvider")?;
            let indexer = PersistenceIndexer::new(
                args.name,
                input,
                metadata as Box<dyn MetadataGate>,
                storage as Box<dyn TickSink>,
                options,
            );
            Ok(Box::new(indexer) as Box<dyn simtel_engine::Service>)
        }),
    );

    registry.register_resource(
        "database",
        Box::new(|name: &str, options: &serde_json::Value| {
            let options = parse_options::<DatabaseOptions>(name, options)?;
            Ok(Box::new(Database::new(name, &options)) as Box<dyn simtel_controller::Resource>)
        }),
    );

    registry.register_resource(
        "storage",
        Box::new(|name: &str, options: &serde_json::Value| {
            let options = parse_options::<StorageOptions>(name, options)?;
            Ok(Box::new(Storage::new(name, &options)) as Box<dyn simtel_controller::Resource>)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_defaults_populates_every_known_class() {
        let mut registry: Registry<SimMessage> = Registry::new();
        register_defaults(&mut registry);

        let channels = registry.known_channel_classes();
        assert!(channels.contains("bounded"));

        let services = registry.known_service_classes();
        assert!(services.contains("DummyProducer"));
        assert!(services.contains("DummyConsumer"));
        assert!(services.contains("PersistenceIndexer"));

        let resources = registry.known_resource_classes();
        assert!(resources.contains("database"));
        assert!(resources.contains("storage"));
    }
}
