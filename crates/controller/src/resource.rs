// SPDX-License-Identifier: Apache-2.0

//! The `Resource` trait: a shared stateful collaborator that hands out
//! capability wrappers to individual services.

use std::any::Any;

/// Identifies the caller asking a resource for a capability wrapper, so
/// the resource can scope the wrapper's connection and error log to that
/// service/port pair.
pub struct ResourceContext {
    /// The requesting service's name.
    pub service_name: String,
    /// The requesting port on that service.
    pub port_name: String,
    /// Which capability the requester expects back (`"readMetadata"`,
    /// `"writeMetadata"`, `"writeEnvironmentData"`, `"writeOrganismData"`,
    /// `"rawStorage"`, ...).
    pub capability: String,
}

/// A shared backing collaborator (database, filesystem root) that offers
/// one or more capabilities, each a narrow contract realized as a distinct
/// wrapper type. A resource is built once by the orchestrator from
/// `resources.<name>`; every binding to it gets its own wrapper instance.
pub trait Resource {
    /// Builds a fresh capability wrapper for `ctx`. The concrete type
    /// behind the returned `Box<dyn Any>` is determined by
    /// `ctx.capability`; callers downcast to the type their service
    /// declares and treat a downcast failure as a build-time wiring error.
    fn get_wrapped_resource(
        &self,
        ctx: ResourceContext,
    ) -> Result<Box<dyn Any>, crate::error::Error>;

    /// The resource entry's configured name, for diagnostics.
    fn name(&self) -> &str;
}
