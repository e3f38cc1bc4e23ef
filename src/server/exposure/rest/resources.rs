//! Route descriptors of the catalog resources

use super::handlers::{
    CatState, ReadState, create_cat, destroy_cat, list_cats, list_resource, partial_update_cat,
    retrieve_cat, retrieve_resource, update_cat,
};
use crate::core::field::FieldSource;
use crate::core::permission::{Action, Owned};
use crate::entities::{Cat, Resource};
use crate::server::resource_registry::ResourceDescriptor;
use axum::Router;
use axum::routing::get;
use serde::Serialize;

/// `/cats` with the full set of CRUD actions
pub struct CatResource {
    state: CatState,
}

impl CatResource {
    pub fn new(state: CatState) -> Self {
        Self { state }
    }
}

impl ResourceDescriptor for CatResource {
    fn resource_name(&self) -> &str {
        Cat::resource_name()
    }

    fn actions(&self) -> &[Action] {
        &Action::ALL
    }

    fn build_routes(&self) -> Router {
        let collection = format!("/{}", Cat::resource_name());
        let item = format!("/{}/{{id}}", Cat::resource_name());

        Router::new()
            .route(&collection, get(list_cats).post(create_cat))
            .route(
                &item,
                get(retrieve_cat)
                    .put(update_cat)
                    .patch(partial_update_cat)
                    .delete(destroy_cat),
            )
            .with_state(self.state.clone())
    }
}

const READ_ACTIONS: [Action; 2] = [Action::List, Action::Retrieve];

/// A collection exposing only `list` and `retrieve`
pub struct ReadOnlyResource<T> {
    state: ReadState<T>,
}

impl<T> ReadOnlyResource<T> {
    pub fn new(state: ReadState<T>) -> Self {
        Self { state }
    }
}

impl<T> ResourceDescriptor for ReadOnlyResource<T>
where
    T: Resource + FieldSource + Owned + Serialize,
{
    fn resource_name(&self) -> &str {
        T::resource_name()
    }

    fn actions(&self) -> &[Action] {
        &READ_ACTIONS
    }

    fn build_routes(&self) -> Router {
        let collection = format!("/{}", T::resource_name());
        let item = format!("/{}/{{id}}", T::resource_name());

        Router::new()
            .route(&collection, get(list_resource::<T>))
            .route(&item, get(retrieve_resource::<T>))
            .with_state(self.state.clone())
    }
}
