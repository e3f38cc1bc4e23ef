//! Catalog resources: cats, their owners and their achievements

pub mod achievement;
pub mod cat;
pub mod user;

pub use achievement::{Achievement, AchievementInput};
pub use cat::{Cat, CatPayload, CatUpdate};
pub use user::User;

use uuid::Uuid;

/// A resource type exposed by the REST surface
pub trait Resource: Clone + Send + Sync + 'static {
    /// Plural name, used as the collection path (e.g. "cats")
    fn resource_name() -> &'static str;

    /// Singular name, used in error messages (e.g. "cat")
    fn resource_name_singular() -> &'static str;

    fn id(&self) -> Uuid;
}
