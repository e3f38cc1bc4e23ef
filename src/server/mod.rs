//! Server module for building the catalog HTTP server
//!
//! `ServerBuilder` assembles a `ServerHost` (policy pipelines, resource
//! registry, throttle state) and exposes it over REST.

pub mod builder;
pub mod exposure;
pub mod host;
pub mod resource_registry;

pub use builder::ServerBuilder;
pub use exposure::RestExposure;
pub use host::{CatalogServices, ServerHost};
pub use resource_registry::{ResourceDescriptor, ResourceRegistry};
