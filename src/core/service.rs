//! Persistence contracts consumed by the policy pipeline
//!
//! The pipeline never touches storage directly; handlers call these services
//! once a request has been admitted.

use crate::core::query::Predicate;
use crate::entities::{Cat, CatPayload, CatUpdate};
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Read access to a resource collection
#[async_trait]
pub trait ReadService<T>: Send + Sync {
    /// Get a resource by id
    async fn find(&self, id: &Uuid) -> Result<Option<T>>;

    /// List resources matching a filter/search predicate, unordered
    async fn list(&self, predicate: &Predicate) -> Result<Vec<T>>;
}

/// Write access to the cat collection
#[async_trait]
pub trait CatService: ReadService<Cat> {
    /// Create a cat owned by `owner`
    async fn create(&self, payload: CatPayload, owner: Uuid) -> Result<Cat>;

    /// Apply an update; `None` when the cat does not exist
    async fn update(&self, id: &Uuid, update: CatUpdate) -> Result<Option<Cat>>;

    /// Delete a cat; `false` when it did not exist
    async fn delete(&self, id: &Uuid) -> Result<bool>;
}
