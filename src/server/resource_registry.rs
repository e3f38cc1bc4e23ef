//! Resource registry: collects resource descriptors and builds their routes

use crate::core::permission::Action;
use axum::Router;
use indexmap::IndexMap;
use serde_json::{Value, json};

/// Describes how to expose one resource collection
pub trait ResourceDescriptor: Send + Sync {
    /// Plural name, also the collection path (e.g. "cats")
    fn resource_name(&self) -> &str;

    /// Actions routed for this resource
    fn actions(&self) -> &[Action];

    /// Build the routes of this resource, state included
    fn build_routes(&self) -> Router;
}

/// Registry of every exposed resource, in registration order
#[derive(Default)]
pub struct ResourceRegistry {
    descriptors: IndexMap<String, Box<dyn ResourceDescriptor>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor; a second registration under the same name replaces the first
    pub fn register(&mut self, descriptor: Box<dyn ResourceDescriptor>) {
        let name = descriptor.resource_name().to_string();
        self.descriptors.insert(name, descriptor);
    }

    /// Merge the routes of every registered resource
    pub fn build_routes(&self) -> Router {
        self.descriptors
            .values()
            .fold(Router::new(), |router, descriptor| {
                router.merge(descriptor.build_routes())
            })
    }

    pub fn resource_names(&self) -> Vec<&str> {
        self.descriptors.keys().map(String::as_str).collect()
    }

    /// API root document: resource name → collection url and actions
    pub fn describe(&self) -> Value {
        let resources: serde_json::Map<String, Value> = self
            .descriptors
            .iter()
            .map(|(name, descriptor)| {
                (
                    name.clone(),
                    json!({
                        "url": format!("/{}", name),
                        "actions": descriptor.actions(),
                    }),
                )
            })
            .collect();
        Value::Object(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockDescriptor {
        name: String,
        actions: Vec<Action>,
    }

    impl MockDescriptor {
        fn new(name: &str, actions: &[Action]) -> Self {
            Self {
                name: name.to_string(),
                actions: actions.to_vec(),
            }
        }
    }

    impl ResourceDescriptor for MockDescriptor {
        fn resource_name(&self) -> &str {
            &self.name
        }

        fn actions(&self) -> &[Action] {
            &self.actions
        }

        fn build_routes(&self) -> Router {
            Router::new()
        }
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry = ResourceRegistry::new();
        assert!(registry.resource_names().is_empty());
        assert_eq!(registry.describe(), json!({}));
    }

    #[test]
    fn test_registration_order_is_kept() {
        let mut registry = ResourceRegistry::new();
        registry.register(Box::new(MockDescriptor::new("cats", &Action::ALL)));
        registry.register(Box::new(MockDescriptor::new("users", &[Action::List])));
        registry.register(Box::new(MockDescriptor::new("achievements", &[Action::List])));
        assert_eq!(registry.resource_names(), vec!["cats", "users", "achievements"]);
    }

    #[test]
    fn test_register_duplicate_replaces() {
        let mut registry = ResourceRegistry::new();
        registry.register(Box::new(MockDescriptor::new("cats", &Action::ALL)));
        registry.register(Box::new(MockDescriptor::new("cats", &[Action::List])));
        assert_eq!(registry.resource_names().len(), 1);
        assert_eq!(registry.describe()["cats"]["actions"], json!(["list"]));
    }

    #[test]
    fn test_describe() {
        let mut registry = ResourceRegistry::new();
        registry.register(Box::new(MockDescriptor::new(
            "users",
            &[Action::List, Action::Retrieve],
        )));
        assert_eq!(
            registry.describe(),
            json!({"users": {"url": "/users", "actions": ["list", "retrieve"]}})
        );
        let _router = registry.build_routes();
    }
}
