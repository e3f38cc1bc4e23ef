use crate::core::field::{FieldPath, FieldSource, FieldValue};
use crate::core::permission::Owned;
use crate::entities::{Achievement, AchievementInput, Resource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// The primary catalog resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cat {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub birth_year: i32,
    pub owner: Option<Uuid>,
    #[serde(default)]
    pub achievements: Vec<Achievement>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource for Cat {
    fn resource_name() -> &'static str {
        "cats"
    }

    fn resource_name_singular() -> &'static str {
        "cat"
    }

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Owned for Cat {
    fn owner(&self) -> Option<Uuid> {
        self.owner
    }
}

impl FieldSource for Cat {
    /// Direct fields plus `achievements.<field>`
    fn field_values(&self, path: &FieldPath) -> Vec<FieldValue> {
        if let Some(rest) = path.tail() {
            return match path.head() {
                "achievements" => self
                    .achievements
                    .iter()
                    .flat_map(|a| a.field_values(&rest))
                    .collect(),
                _ => Vec::new(),
            };
        }

        match path.head() {
            "id" => vec![FieldValue::Uuid(self.id)],
            "name" => vec![FieldValue::String(self.name.clone())],
            "color" => vec![FieldValue::String(self.color.clone())],
            "birth_year" => vec![FieldValue::Integer(self.birth_year.into())],
            "owner" => vec![self.owner.map(FieldValue::Uuid).unwrap_or(FieldValue::Null)],
            "created_at" => vec![FieldValue::DateTime(self.created_at)],
            "updated_at" => vec![FieldValue::DateTime(self.updated_at)],
            _ => Vec::new(),
        }
    }
}

/// Body of `POST /cats` and `PUT /cats/{id}`
///
/// The owner is never taken from the body.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CatPayload {
    #[validate(length(min = 1, max = 16))]
    pub name: String,

    #[validate(length(min = 1, max = 16))]
    pub color: String,

    pub birth_year: i32,

    #[validate(nested)]
    #[serde(default)]
    pub achievements: Option<Vec<AchievementInput>>,
}

/// Body of `PATCH /cats/{id}`: only the present fields change
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CatUpdate {
    #[validate(length(min = 1, max = 16))]
    pub name: Option<String>,

    #[validate(length(min = 1, max = 16))]
    pub color: Option<String>,

    pub birth_year: Option<i32>,

    #[validate(nested)]
    pub achievements: Option<Vec<AchievementInput>>,
}

impl From<CatPayload> for CatUpdate {
    /// A full replacement keeps existing achievements unless the payload lists some
    fn from(payload: CatPayload) -> Self {
        Self {
            name: Some(payload.name),
            color: Some(payload.color),
            birth_year: Some(payload.birth_year),
            achievements: payload.achievements,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat() -> Cat {
        Cat {
            id: Uuid::new_v4(),
            name: "Murzik".into(),
            color: "Black".into(),
            birth_year: 2019,
            owner: None,
            achievements: vec![Achievement::new("climber"), Achievement::new("hunter")],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_field_values_direct_and_related() {
        let cat = cat();
        assert_eq!(
            cat.field_values(&FieldPath::parse("birth_year")),
            vec![FieldValue::Integer(2019)]
        );
        assert_eq!(
            cat.field_values(&FieldPath::parse("owner")),
            vec![FieldValue::Null]
        );
        assert_eq!(
            cat.field_values(&FieldPath::parse("achievements__name")),
            vec![
                FieldValue::String("climber".into()),
                FieldValue::String("hunter".into())
            ]
        );
        assert!(cat.field_values(&FieldPath::parse("owner.username")).is_empty());
        assert!(cat.field_values(&FieldPath::parse("weight")).is_empty());
    }

    #[test]
    fn test_payload_validation() {
        let ok: CatPayload = serde_json::from_value(serde_json::json!({
            "name": "Murzik",
            "color": "Black",
            "birth_year": 2019,
            "achievements": [{"name": "climber"}],
            "owner": "ignored"
        }))
        .unwrap();
        assert!(ok.validate().is_ok());

        let too_long: CatPayload = serde_json::from_value(serde_json::json!({
            "name": "A name that is way too long",
            "color": "",
            "birth_year": 2019
        }))
        .unwrap();
        let errors = too_long.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("color"));
    }

    #[test]
    fn test_update_validation_ignores_absent_fields() {
        let update = CatUpdate {
            birth_year: Some(2020),
            ..CatUpdate::default()
        };
        assert!(update.validate().is_ok());

        let bad = CatUpdate {
            name: Some(String::new()),
            ..CatUpdate::default()
        };
        assert!(bad.validate().is_err());
    }
}
