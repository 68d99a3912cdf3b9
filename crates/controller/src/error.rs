// SPDX-License-Identifier: Apache-2.0

//! Errors for the controller crate.

use miette::Diagnostic;

/// Errors that can occur while building or running a topology.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// A collection of errors encountered while validating the
    /// configuration.
    #[error("invalid configuration")]
    InvalidConfiguration {
        /// The individual validation failures.
        #[related]
        errors: Vec<simtel_config::error::Error>,
    },

    /// A service-level error surfaced during build or execution.
    #[error("service '{service_name}' error: {source}")]
    ServiceError {
        /// The service that raised the error.
        service_name: String,
        /// The underlying engine error.
        #[source]
        source: simtel_engine::error::Error,
    },

    /// Failed to spawn an OS thread for a service.
    #[error("failed to spawn thread '{thread_name}': {source}")]
    ThreadSpawnError {
        /// Name of the thread we attempted to spawn.
        thread_name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A service's thread panicked rather than returning cleanly.
    #[error("thread '{thread_name}' panicked: {panic_message}")]
    ThreadJoinPanic {
        /// The thread name that panicked.
        thread_name: String,
        /// Panic message.
        panic_message: String,
    },

    /// `startupSequence` named a service not declared under `services`.
    #[error("startupSequence references unknown service '{0}'")]
    UnknownService(String),

    /// `startupSequence` contains a cycle of declared dependencies.
    #[error("startupSequence contains a cycle: {0}")]
    CyclicStartupSequence(String),

    /// A capability wrapper handed back by a resource did not match the
    /// concrete type the requesting service port expected.
    #[error(
        "resource '{resource_name}' capability '{capability}' requested by service '{service_name}' port '{port_name}' returned a wrapper of the wrong type"
    )]
    CapabilityTypeMismatch {
        /// The resource that produced the mismatched wrapper.
        resource_name: String,
        /// The capability that was requested.
        capability: String,
        /// The requesting service.
        service_name: String,
        /// The requesting port.
        port_name: String,
    },

    /// A service or resource referenced a `className` with no matching
    /// registered constructor.
    #[error("'{name}' references unknown class '{class_name}'")]
    UnknownClass {
        /// The entry name.
        name: String,
        /// The unresolved class name.
        class_name: String,
    },

    /// A service's run loop returned an unrecoverable error.
    #[error("service '{0}' has no running instance to control")]
    UnknownServiceInstance(String),

    /// A service builder required a port that was not wired in its
    /// configuration.
    #[error("service '{service_name}' requires port '{port_name}', which was not wired")]
    MissingPort {
        /// The service under construction.
        service_name: String,
        /// The port its builder required.
        port_name: String,
    },

    /// A resource handed back a capability wrapper of the expected
    /// capability name but the wrong concrete type.
    #[error(
        "service '{service_name}' port '{port_name}' expected a '{expected_type}' capability wrapper, got a different type"
    )]
    ResourceDowncastFailed {
        /// The requesting service.
        service_name: String,
        /// The requesting port.
        port_name: String,
        /// The concrete type the builder expected.
        expected_type: &'static str,
    },

    /// A service or resource constructor could not deserialize its
    /// `options` subtree into the shape it expects.
    #[error("'{name}' has invalid options: {source}")]
    InvalidOptions {
        /// The entry under construction.
        name: String,
        /// The underlying deserialization failure.
        #[source]
        source: serde_json::Error,
    },
}
