// SPDX-License-Identifier: Apache-2.0

//! The `Storage` resource: a filesystem root handing out one
//! [`RawStorageProvider`] per `(service, port)` attachment.

use crate::provider::RawStorageProvider;
use simtel_controller::{Error, Resource, ResourceContext};
use std::any::Any;
use std::path::PathBuf;

/// Options read from `resources.<name>.options` for a `"storage"`
/// resource.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct StorageOptions {
    /// Filesystem directory under which `runs/{runId}/...` is laid out.
    pub root: PathBuf,
}

/// The shared raw-storage resource. Built once per `resources.<name>`
/// entry; every capability wrapper it hands out shares the same root.
pub struct Storage {
    name: String,
    root: PathBuf,
}

impl Storage {
    /// Registered under the `"storage"` resource class.
    #[must_use]
    pub fn new(name: impl Into<String>, options: &StorageOptions) -> Self {
        Self {
            name: name.into(),
            root: options.root.clone(),
        }
    }
}

impl Resource for Storage {
    fn get_wrapped_resource(&self, ctx: ResourceContext) -> Result<Box<dyn Any>, Error> {
        match ctx.capability.as_str() {
            "rawStorage" => Ok(Box::new(RawStorageProvider::new(self.root.clone()))),
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
