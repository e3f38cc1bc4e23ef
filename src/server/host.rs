//! Server host: transport-agnostic application state
//!
//! The host owns the policy configuration, one [`PolicyPipeline`] per exposed
//! resource, the shared rate store and clock, and the resource registry the
//! REST exposure builds its routes from.

use super::exposure::rest::{CallerResolver, CatResource, CatState, ReadOnlyResource, ReadState};
use super::resource_registry::ResourceRegistry;
use crate::config::PolicyConfig;
use crate::core::identity::IdentityProvider;
use crate::core::pipeline::PolicyPipeline;
use crate::core::service::{CatService, ReadService};
use crate::core::throttle::{Clock, RateStore};
use crate::entities::{Achievement, Cat, Resource, User};
use anyhow::Result;
use indexmap::IndexMap;
use std::sync::Arc;

/// Persistence services backing the catalog
#[derive(Clone)]
pub struct CatalogServices {
    pub cats: Arc<dyn CatService>,
    pub users: Arc<dyn ReadService<User>>,
    pub achievements: Arc<dyn ReadService<Achievement>>,
}

/// Host context containing all application state
pub struct ServerHost {
    pub config: Arc<PolicyConfig>,

    /// Pipelines by resource name
    pub pipelines: IndexMap<String, Arc<PolicyPipeline>>,

    /// Throttle histories shared by every pipeline
    pub rate_store: RateStore,

    pub clock: Arc<dyn Clock>,

    pub resource_registry: ResourceRegistry,
}

impl ServerHost {
    /// Build the host from builder components.
    ///
    /// Only resources present in the configuration are exposed.
    pub fn from_builder_components(
        config: PolicyConfig,
        services: CatalogServices,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        rate_store: RateStore,
    ) -> Result<Self> {
        config.validate()?;

        let callers = Arc::new(CallerResolver::new(identity, config.throttle.num_proxies));
        let mut pipelines = IndexMap::new();
        let mut resource_registry = ResourceRegistry::new();

        for name in config.resources.keys() {
            let pipeline = Arc::new(PolicyPipeline::from_config(
                name,
                &config,
                &rate_store,
                clock.clone(),
            )?);

            if name == Cat::resource_name() {
                resource_registry.register(Box::new(CatResource::new(CatState {
                    cats: services.cats.clone(),
                    pipeline: pipeline.clone(),
                    callers: callers.clone(),
                })));
            } else if name == User::resource_name() {
                resource_registry.register(Box::new(ReadOnlyResource::new(ReadState {
                    service: services.users.clone(),
                    pipeline: pipeline.clone(),
                    callers: callers.clone(),
                })));
            } else if name == Achievement::resource_name() {
                resource_registry.register(Box::new(ReadOnlyResource::new(ReadState {
                    service: services.achievements.clone(),
                    pipeline: pipeline.clone(),
                    callers: callers.clone(),
                })));
            } else {
                tracing::warn!(resource = %name, "no such resource in the catalog, skipping");
                continue;
            }

            tracing::debug!(resource = %name, "resource registered");
            pipelines.insert(name.clone(), pipeline);
        }

        Ok(Self {
            config: Arc::new(config),
            pipelines,
            rate_store,
            clock,
            resource_registry,
        })
    }

    /// Names of the exposed resources
    pub fn resource_names(&self) -> Vec<&str> {
        self.resource_registry.resource_names()
    }

    pub fn pipeline(&self, resource: &str) -> Option<&Arc<PolicyPipeline>> {
        self.pipelines.get(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThrottleSpec;
    use crate::core::identity::AnonymousProvider;
    use crate::core::throttle::SystemClock;
    use crate::storage::InMemoryCatalog;

    fn services() -> CatalogServices {
        let catalog = Arc::new(InMemoryCatalog::new());
        CatalogServices {
            cats: catalog.clone(),
            users: catalog.clone(),
            achievements: catalog,
        }
    }

    fn make_host(config: PolicyConfig) -> Result<ServerHost> {
        ServerHost::from_builder_components(
            config,
            services(),
            Arc::new(AnonymousProvider),
            Arc::new(SystemClock),
            RateStore::new(),
        )
    }

    #[test]
    fn test_default_config_exposes_three_resources() {
        let host = make_host(PolicyConfig::default_config()).expect("should build host");
        assert_eq!(host.resource_names(), vec!["cats", "users", "achievements"]);
        assert!(host.pipeline("cats").is_some());
    }

    #[test]
    fn test_unknown_resources_are_skipped() {
        let mut config = PolicyConfig::default_config();
        let dogs = config.resources["cats"].clone();
        config.resources.insert("dogs".to_string(), dogs);

        let host = make_host(config).expect("should build host");
        assert!(!host.resource_names().contains(&"dogs"));
        assert!(host.pipeline("dogs").is_none());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = PolicyConfig::default_config();
        config.resources["cats"]
            .throttles
            .push(ThrottleSpec::Scoped("burst".to_string()));
        assert!(make_host(config).is_err());
    }
}
