//! In-memory catalog for testing and development

use crate::core::field::{FieldPath, FieldSource, FieldValue};
use crate::core::query::Predicate;
use crate::core::service::{CatService, ReadService};
use crate::entities::{Achievement, AchievementInput, Cat, CatPayload, CatUpdate, User};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

type Table<T> = Arc<RwLock<IndexMap<Uuid, T>>>;

/// In-memory catalog of users, cats and achievements
///
/// Tables keep insertion order. Every method takes at most one table lock at
/// a time, so readers and writers never wait on each other in a cycle.
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    users: Table<User>,
    cats: Table<Cat>,
    achievements: Table<Achievement>,
}

fn read<T>(table: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    table
        .read()
        .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))
}

fn write<T>(table: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    table
        .write()
        .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))
}

/// A cat joined with its owner, for predicates over `owner.<field>`
#[derive(Debug, Clone)]
pub struct CatRow {
    pub cat: Cat,
    pub owner: Option<User>,
}

impl FieldSource for CatRow {
    fn field_values(&self, path: &FieldPath) -> Vec<FieldValue> {
        match (path.head(), path.tail()) {
            ("owner", Some(rest)) => self
                .owner
                .as_ref()
                .map(|owner| owner.field_values(&rest))
                .unwrap_or_default(),
            _ => self.cat.field_values(path),
        }
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with the given username
    pub fn add_user(&self, username: &str) -> Result<User> {
        self.insert_user(User::new(username))
    }

    pub fn insert_user(&self, user: User) -> Result<User> {
        let mut users = write(&self.users)?;
        if users.values().any(|u| u.username == user.username) {
            return Err(anyhow!("Username '{}' is already taken", user.username));
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    /// Store a cat as is, owner included (seeding)
    pub fn insert_cat(&self, cat: Cat) -> Result<Cat> {
        write(&self.cats)?.insert(cat.id, cat.clone());
        Ok(cat)
    }

    /// Resolve achievement inputs by name, creating unknown ones
    fn resolve_achievements(&self, inputs: &[AchievementInput]) -> Result<Vec<Achievement>> {
        let mut achievements = write(&self.achievements)?;
        let mut resolved: Vec<Achievement> = Vec::with_capacity(inputs.len());

        for input in inputs {
            let achievement = match achievements.values().find(|a| a.name == input.name) {
                Some(existing) => existing.clone(),
                None => {
                    let created = Achievement::new(input.name.clone());
                    achievements.insert(created.id, created.clone());
                    created
                }
            };
            if !resolved.iter().any(|a| a.id == achievement.id) {
                resolved.push(achievement);
            }
        }

        Ok(resolved)
    }

    fn cats_snapshot(&self) -> Result<Vec<Cat>> {
        Ok(read(&self.cats)?.values().cloned().collect())
    }

    fn with_cats(&self, mut user: User, cats: &[Cat]) -> User {
        user.cats = cats
            .iter()
            .filter(|cat| cat.owner == Some(user.id))
            .map(|cat| cat.id)
            .collect();
        user
    }
}

#[async_trait]
impl ReadService<Cat> for InMemoryCatalog {
    async fn find(&self, id: &Uuid) -> Result<Option<Cat>> {
        Ok(read(&self.cats)?.get(id).cloned())
    }

    async fn list(&self, predicate: &Predicate) -> Result<Vec<Cat>> {
        let cats = self.cats_snapshot()?;
        let users = read(&self.users)?.clone();

        Ok(cats
            .into_iter()
            .map(|cat| CatRow {
                owner: cat.owner.and_then(|id| users.get(&id).cloned()),
                cat,
            })
            .filter(|row| predicate.matches(row))
            .map(|row| row.cat)
            .collect())
    }
}

#[async_trait]
impl CatService for InMemoryCatalog {
    async fn create(&self, payload: CatPayload, owner: Uuid) -> Result<Cat> {
        let inputs = payload.achievements.as_deref().unwrap_or_default();
        let achievements = self.resolve_achievements(inputs)?;
        let now = Utc::now();

        let cat = Cat {
            id: Uuid::new_v4(),
            name: payload.name,
            color: payload.color,
            birth_year: payload.birth_year,
            owner: Some(owner),
            achievements,
            created_at: now,
            updated_at: now,
        };

        write(&self.cats)?.insert(cat.id, cat.clone());
        Ok(cat)
    }

    async fn update(&self, id: &Uuid, update: CatUpdate) -> Result<Option<Cat>> {
        if !read(&self.cats)?.contains_key(id) {
            return Ok(None);
        }

        let achievements = match &update.achievements {
            Some(inputs) => Some(self.resolve_achievements(inputs)?),
            None => None,
        };

        let mut cats = write(&self.cats)?;
        let Some(cat) = cats.get_mut(id) else {
            return Ok(None);
        };

        if let Some(name) = update.name {
            cat.name = name;
        }
        if let Some(color) = update.color {
            cat.color = color;
        }
        if let Some(birth_year) = update.birth_year {
            cat.birth_year = birth_year;
        }
        if let Some(achievements) = achievements {
            cat.achievements = achievements;
        }
        cat.updated_at = Utc::now();

        Ok(Some(cat.clone()))
    }

    async fn delete(&self, id: &Uuid) -> Result<bool> {
        Ok(write(&self.cats)?.shift_remove(id).is_some())
    }
}

#[async_trait]
impl ReadService<User> for InMemoryCatalog {
    async fn find(&self, id: &Uuid) -> Result<Option<User>> {
        let Some(user) = read(&self.users)?.get(id).cloned() else {
            return Ok(None);
        };
        let cats = self.cats_snapshot()?;
        Ok(Some(self.with_cats(user, &cats)))
    }

    async fn list(&self, predicate: &Predicate) -> Result<Vec<User>> {
        let users: Vec<User> = read(&self.users)?.values().cloned().collect();
        let cats = self.cats_snapshot()?;

        Ok(users
            .into_iter()
            .map(|user| self.with_cats(user, &cats))
            .filter(|user| predicate.matches(user))
            .collect())
    }
}

#[async_trait]
impl ReadService<Achievement> for InMemoryCatalog {
    async fn find(&self, id: &Uuid) -> Result<Option<Achievement>> {
        Ok(read(&self.achievements)?.get(id).cloned())
    }

    async fn list(&self, predicate: &Predicate) -> Result<Vec<Achievement>> {
        Ok(read(&self.achievements)?
            .values()
            .filter(|a| predicate.matches(*a))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::query::SearchMode;

    fn payload(name: &str, achievements: &[&str]) -> CatPayload {
        CatPayload {
            name: name.into(),
            color: "Black".into(),
            birth_year: 2019,
            achievements: Some(
                achievements
                    .iter()
                    .map(|n| AchievementInput { name: (*n).into() })
                    .collect(),
            ),
        }
    }

    #[tokio::test]
    async fn test_create_sets_owner() {
        let catalog = InMemoryCatalog::new();
        let alice = catalog.add_user("alice").unwrap();

        let cat = catalog.create(payload("Murzik", &[]), alice.id).await.unwrap();
        assert_eq!(cat.owner, Some(alice.id));

        let found = ReadService::<Cat>::find(&catalog, &cat.id).await.unwrap();
        assert_eq!(found, Some(cat));
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let catalog = InMemoryCatalog::new();
        catalog.add_user("alice").unwrap();
        assert!(catalog.add_user("alice").is_err());
    }

    #[tokio::test]
    async fn test_achievements_get_or_create_by_name() {
        let catalog = InMemoryCatalog::new();
        let alice = catalog.add_user("alice").unwrap();

        let first = catalog
            .create(payload("Murzik", &["climber", "climber"]), alice.id)
            .await
            .unwrap();
        let second = catalog
            .create(payload("Barsik", &["climber", "hunter"]), alice.id)
            .await
            .unwrap();

        assert_eq!(first.achievements.len(), 1);
        assert_eq!(first.achievements[0].id, second.achievements[0].id);

        let all = ReadService::<Achievement>::list(&catalog, &Predicate::always())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let catalog = InMemoryCatalog::new();
        let alice = catalog.add_user("alice").unwrap();
        let cat = catalog.create(payload("Murzik", &["climber"]), alice.id).await.unwrap();

        let updated = catalog
            .update(
                &cat.id,
                CatUpdate {
                    color: Some("White".into()),
                    ..CatUpdate::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.color, "White");
        assert_eq!(updated.name, "Murzik");
        assert_eq!(updated.achievements.len(), 1);

        assert!(catalog.update(&Uuid::new_v4(), CatUpdate::default()).await.unwrap().is_none());

        assert!(catalog.delete(&cat.id).await.unwrap());
        assert!(!catalog.delete(&cat.id).await.unwrap());
        assert!(ReadService::<Cat>::find(&catalog, &cat.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_traverses_owner() {
        let catalog = InMemoryCatalog::new();
        let alice = catalog.add_user("alice").unwrap();
        let bob = catalog.add_user("bob").unwrap();
        catalog.create(payload("Murzik", &[]), alice.id).await.unwrap();
        catalog.create(payload("Barsik", &[]), bob.id).await.unwrap();

        let predicate = Predicate::Matches {
            path: FieldPath::parse("owner__username"),
            mode: SearchMode::Contains,
            term: "BO".into(),
        };
        let cats = ReadService::<Cat>::list(&catalog, &predicate).await.unwrap();
        assert_eq!(cats.len(), 1);
        assert_eq!(cats[0].name, "Barsik");
    }

    #[tokio::test]
    async fn test_users_list_their_cats() {
        let catalog = InMemoryCatalog::new();
        let alice = catalog.add_user("alice").unwrap();
        let cat = catalog.create(payload("Murzik", &[]), alice.id).await.unwrap();

        let user = ReadService::<User>::find(&catalog, &alice.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.cats, vec![cat.id]);
    }
}
