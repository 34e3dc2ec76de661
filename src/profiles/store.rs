use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use crate::hub::{Event, Hub, Topic};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Profile {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub photo_url: Option<String>,
    pub online: bool,
}

/// What the identity provider told us about a user who just signed in.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

pub fn random_alias() -> String {
    let adjectives = [
        "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
        "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy", "Sad",
        "Eager", "Fancy", "Rusty", "Golden", "Silver", "Bright", "Dark", "Lucky",
    ];
    let nouns = [
        "Fox", "Bear", "Eagle", "Wolf", "Dragon", "Tiger", "Lion", "Owl", "Rabbit",
        "Falcon", "Hawk", "Shark", "Panda", "Kitten", "Puppy", "Phoenix", "Griffin",
        "Unicorn", "Turtle", "Dolphin", "Whale", "Elephant", "Giraffe", "Zebra",
    ];

    let mut rng = rand::rng();
    format!(
        "{} {}",
        adjectives.choose(&mut rng).copied().unwrap_or("Nameless"),
        nouns.choose(&mut rng).copied().unwrap_or("User"),
    )
}

/// Creates the profile on first sign-in, refreshes it afterwards, and marks
/// the user online either way.
pub async fn upsert_signed_in(db_pool: &SqlitePool, hub: &Hub, user: SignedIn) -> sqlx::Result<Profile> {
    let display_name = user
        .display_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(random_alias);

    let profile: Profile = sqlx::query_as(
        "INSERT INTO profiles (id,display_name,email,photo_url,online) VALUES (?,?,?,?,1)
         ON CONFLICT(id) DO UPDATE SET
             display_name=excluded.display_name,
             email=excluded.email,
             photo_url=excluded.photo_url,
             online=1
         RETURNING id,display_name,email,photo_url,online",
    )
    .bind(&user.id)
    .bind(&display_name)
    .bind(&user.email)
    .bind(&user.photo_url)
    .fetch_one(db_pool)
    .await?;

    info!("welcome {}#{}", profile.display_name, profile.id);
    hub.publish(&Topic::Roster, Event::Profile { profile: profile.clone() });
    Ok(profile)
}

pub async fn set_online(db_pool: &SqlitePool, hub: &Hub, id: &str, online: bool) -> sqlx::Result<Option<Profile>> {
    let profile: Option<Profile> = sqlx::query_as(
        "UPDATE profiles SET online=? WHERE id=? RETURNING id,display_name,email,photo_url,online",
    )
    .bind(online)
    .bind(id)
    .fetch_optional(db_pool)
    .await?;

    if let Some(profile) = &profile {
        hub.publish(&Topic::Roster, Event::Profile { profile: profile.clone() });
    }
    Ok(profile)
}

pub async fn get(db_pool: &SqlitePool, id: &str) -> sqlx::Result<Option<Profile>> {
    sqlx::query_as("SELECT id,display_name,email,photo_url,online FROM profiles WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await
}

/// Every registered user except `except`.
pub async fn roster(db_pool: &SqlitePool, except: &str) -> sqlx::Result<Vec<Profile>> {
    sqlx::query_as(
        "SELECT id,display_name,email,photo_url,online FROM profiles WHERE id<>? ORDER BY display_name,id",
    )
    .bind(except)
    .fetch_all(db_pool)
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db;

    fn signed_in(id: &str, name: Option<&str>) -> SignedIn {
        SignedIn {
            id: id.to_owned(),
            display_name: name.map(str::to_owned),
            email: None,
            photo_url: None,
        }
    }

    #[tokio::test]
    async fn upsert_creates_then_refreshes() {
        let db_pool = db::memory().await.unwrap();
        let hub = Hub::new();

        let first = upsert_signed_in(&db_pool, &hub, signed_in("google:1", Some("Alice"))).await.unwrap();
        assert!(first.online);
        set_online(&db_pool, &hub, "google:1", false).await.unwrap();

        let second = upsert_signed_in(&db_pool, &hub, signed_in("google:1", Some("Alice B"))).await.unwrap();
        assert_eq!(second.display_name, "Alice B");
        assert!(second.online);
    }

    #[tokio::test]
    async fn nameless_users_get_an_alias() {
        let db_pool = db::memory().await.unwrap();
        let profile = upsert_signed_in(&db_pool, &Hub::new(), signed_in("github:7", Some("  "))).await.unwrap();
        assert_eq!(profile.display_name.split(' ').count(), 2);
    }

    #[tokio::test]
    async fn roster_excludes_caller() {
        let db_pool = db::memory().await.unwrap();
        let hub = Hub::new();
        for (id, name) in [("a", "Alice"), ("b", "Bob"), ("c", "Carol")] {
            upsert_signed_in(&db_pool, &hub, signed_in(id, Some(name))).await.unwrap();
        }

        let ids: Vec<_> = roster(&db_pool, "b").await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, ["a", "c"]);
    }

    #[tokio::test]
    async fn online_flips_are_broadcast() {
        let db_pool = db::memory().await.unwrap();
        let hub = Arc::new(Hub::new());
        upsert_signed_in(&db_pool, &hub, signed_in("a", Some("Alice"))).await.unwrap();

        let mut roster_events = hub.subscribe(Topic::Roster);
        set_online(&db_pool, &hub, "a", false).await.unwrap();

        match roster_events.recv().await {
            Some(Event::Profile { profile }) => assert!(!profile.online),
            other => panic!("unexpected {other:?}"),
        }
        assert!(set_online(&db_pool, &hub, "nobody", true).await.unwrap().is_none());
    }
}
