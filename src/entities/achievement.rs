use crate::core::field::{FieldPath, FieldSource, FieldValue};
use crate::core::permission::Owned;
use crate::entities::Resource;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Something a cat has accomplished, shared between cats by name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Achievement {
    pub id: Uuid,
    pub name: String,
}

impl Achievement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

impl Resource for Achievement {
    fn resource_name() -> &'static str {
        "achievements"
    }

    fn resource_name_singular() -> &'static str {
        "achievement"
    }

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Owned for Achievement {
    fn owner(&self) -> Option<Uuid> {
        None
    }
}

impl FieldSource for Achievement {
    fn field_values(&self, path: &FieldPath) -> Vec<FieldValue> {
        if !path.is_direct() {
            return Vec::new();
        }
        match path.head() {
            "id" => vec![FieldValue::Uuid(self.id)],
            "name" => vec![FieldValue::String(self.name.clone())],
            _ => Vec::new(),
        }
    }
}

/// Achievement as written in a cat payload; resolved by name
#[derive(Debug, Clone, Deserialize, Validate, PartialEq, Eq)]
pub struct AchievementInput {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
}
