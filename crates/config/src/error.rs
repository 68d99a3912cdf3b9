// SPDX-License-Identifier: Apache-2.0

//! Errors raised while validating a resolved configuration tree.

use miette::Diagnostic;

/// A single configuration validation failure.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// A collection of validation failures found while checking a
    /// pipeline configuration as a whole.
    #[error("invalid configuration")]
    InvalidConfiguration {
        /// The individual failures.
        #[related]
        errors: Vec<Error>,
    },

    /// A service or channel referenced a channel name with no matching
    /// entry under `channels`.
    #[error("channel '{name}' referenced by service '{service}' port '{port}' is not declared")]
    MissingChannel {
        /// The undeclared channel name.
        name: String,
        /// The service that referenced it.
        service: String,
        /// The port that referenced it.
        port: String,
    },

    /// A channel declared a capacity outside the accepted range.
    #[error("channel '{name}' has invalid capacity {value}; capacity must be a positive integer")]
    InvalidCapacity {
        /// The channel with the invalid capacity.
        name: String,
        /// The declared value.
        value: i64,
    },

    /// A resource entry under `resources.<name>` names a backing class
    /// with no registered constructor.
    #[error("resource '{name}' references unknown class '{class_name}'")]
    UnknownResourceClass {
        /// The resource entry's name.
        name: String,
        /// The class name that has no constructor registered.
        class_name: String,
    },

    /// A channel entry under `channels.<name>` names a backing class with
    /// no registered constructor.
    #[error("channel '{name}' references unknown class '{class_name}'")]
    UnknownChannelClass {
        /// The channel entry's name.
        name: String,
        /// The class name that has no constructor registered.
        class_name: String,
    },

    /// A service's `resources` map referenced a resource with no matching
    /// entry under `resources`, or an entry not in `"<capability>:<name>"`
    /// form.
    #[error(
        "service '{service}' port '{port}' resource reference '{reference}' is malformed or unknown"
    )]
    InvalidResourceReference {
        /// The referencing service.
        service: String,
        /// The referencing port.
        port: String,
        /// The raw `"<capability>:<resourceName>"` string.
        reference: String,
    },

    /// A service's `className` has no registered constructor.
    #[error("service '{name}' references unknown class '{class_name}'")]
    UnknownServiceClass {
        /// The service entry's name.
        name: String,
        /// The class name that has no constructor registered.
        class_name: String,
    },

    /// `startupSequence` named a service absent from `services`.
    #[error("startupSequence references unknown service '{0}'")]
    UnknownServiceInStartupSequence(String),

    /// `startupSequence` lists the same service more than once.
    #[error("startupSequence lists '{0}' more than once")]
    DuplicateInStartupSequence(String),

    /// Reading the configuration file failed.
    #[error("failed to read configuration file '{path}': {source}")]
    FileReadError {
        /// The path that could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Deserializing the configuration file failed.
    #[error("failed to parse configuration: {0}")]
    DeserializationError(#[from] serde_yaml::Error),
}
