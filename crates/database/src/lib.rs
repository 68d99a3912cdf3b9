// SPDX-License-Identifier: Apache-2.0

//! The schema-aware database resource and its capability wrappers:
//! `MetadataReader`, `MetadataWriter`, `EnvironmentDataWriter`, and
//! `OrganismDataWriter`. Each wrapper is built fresh per `(service, port)`
//! attachment by [`Database::get_wrapped_resource`] and shares only the
//! underlying connection pool with its siblings.

mod base;
mod metadata;
mod resource;
mod writers;

pub use metadata::{Metadata, MetadataReader, MetadataWriter};
pub use resource::{Database, DatabaseOptions};
pub use writers::{EnvironmentDataWriter, OrganismDataWriter};
