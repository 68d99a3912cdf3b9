// SPDX-License-Identifier: Apache-2.0

//! The `Database` resource: a shared connection pool handing out one fresh
//! capability wrapper per `(service, port)` attachment.

use crate::metadata::{MetadataReader, MetadataWriter};
use crate::writers::{EnvironmentDataWriter, OrganismDataWriter};
use simtel_controller::{Error, Resource, ResourceContext};
use sqlx::postgres::PgPoolOptions;
use std::any::Any;

/// Options read from `resources.<name>.options` for a `"database"`
/// resource.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DatabaseOptions {
    /// A `postgres://` connection string.
    pub url: String,
    /// Maximum pool size. Defaults to 10.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// The shared database resource. Built once per `resources.<name>` entry;
/// every capability wrapper it hands out clones the same underlying pool.
pub struct Database {
    name: String,
    pool: sqlx::PgPool,
}

impl Database {
    /// Builds a lazily-connecting pool from `options`. Registered under
    /// the `"database"` resource class.
    #[must_use]
    pub fn new(name: impl Into<String>, options: &DatabaseOptions) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .connect_lazy(&options.url)
            .expect("a lazily-connecting pool never fails to construct");
        Self {
            name: name.into(),
            pool,
        }
    }
}

impl Resource for Database {
    fn get_wrapped_resource(&self, ctx: ResourceContext) -> Result<Box<dyn Any>, Error> {
        match ctx.capability.as_str() {
            "readMetadata" => Ok(Box::new(MetadataReader::new(self.pool.clone()))),
            "writeMetadata" => Ok(Box::new(MetadataWriter::new(self.pool.clone()))),
            "writeEnvironmentData" => Ok(Box::new(EnvironmentDataWriter::new(self.pool.clone()))),
            "writeOrganismData" => Ok(Box::new(OrganismDataWriter::new(self.pool.clone()))),
            other => Err(Error::CapabilityTypeMismatch {
                resource_name: self.name.clone(),
                capability: other.to_string(),
                service_name: ctx.service_name,
                port_name: ctx.port_name,
            }),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
