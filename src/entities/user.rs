use crate::core::field::{FieldPath, FieldSource, FieldValue};
use crate::core::permission::Owned;
use crate::entities::Resource;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A cat owner
///
/// `cats` is derived from cat ownership when the user is read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub cats: Vec<Uuid>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            first_name: String::new(),
            last_name: String::new(),
            cats: Vec::new(),
        }
    }

    pub fn with_names(mut self, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        self.first_name = first_name.into();
        self.last_name = last_name.into();
        self
    }
}

impl Resource for User {
    fn resource_name() -> &'static str {
        "users"
    }

    fn resource_name_singular() -> &'static str {
        "user"
    }

    fn id(&self) -> Uuid {
        self.id
    }
}

/// A user record is owned by that user
impl Owned for User {
    fn owner(&self) -> Option<Uuid> {
        Some(self.id)
    }
}

impl FieldSource for User {
    fn field_values(&self, path: &FieldPath) -> Vec<FieldValue> {
        if !path.is_direct() {
            return Vec::new();
        }
        match path.head() {
            "id" => vec![FieldValue::Uuid(self.id)],
            "username" => vec![FieldValue::String(self.username.clone())],
            "first_name" => vec![FieldValue::String(self.first_name.clone())],
            "last_name" => vec![FieldValue::String(self.last_name.clone())],
            "cats" => self.cats.iter().copied().map(FieldValue::Uuid).collect(),
            _ => Vec::new(),
        }
    }
}
