use axum::{debug_handler, extract::State, Json};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{session::CurrentUser, AppResult, ChatError};

pub const BACKGROUNDS: [&str; 8] = [
    "https://4kwallpapers.com/images/wallpapers/vibrant-landscape-3840x2160-17436.jpg",
    "https://4kwallpapers.com/images/wallpapers/glacier-point-yosemite-valley-national-park-colorful-3840x2160-6412.jpg",
    "https://4kwallpapers.com/images/wallpapers/golden-gate-bridge-3840x2160-17401.jpg",
    "https://4kwallpapers.com/images/wallpapers/volcanic-moon-3840x2160-19153.jpg",
    "https://4kwallpapers.com/images/wallpapers/kimi-no-na-wa-love-3840x2160-19857.jpg",
    "https://4kwallpapers.com/images/wallpapers/your-name-shooting-3840x2160-14938.jpg",
    "https://4kwallpapers.com/images/wallpapers/sung-jinwoo-amoled-3840x2160-15859.jpg",
    "https://4kwallpapers.com/images/wallpapers/sung-jinwoo-solo-3840x2160-17972.jpg",
];

pub const FONTS: [&str; 5] = ["Sour Gummy", "Parkinsans", "Poppins", "Kanit", "Cedarville Cursive"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Preferences {
    pub background: Option<String>,
    pub font: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PreferencesView {
    #[serde(flatten)]
    pub chosen: Preferences,
    pub backgrounds: &'static [&'static str],
    pub fonts: &'static [&'static str],
}

impl Preferences {
    pub fn validate(&self) -> Result<(), ChatError> {
        check("background", &self.background, &BACKGROUNDS)?;
        check("font", &self.font, &FONTS)
    }
}

fn check(kind: &'static str, value: &Option<String>, catalog: &[&str]) -> Result<(), ChatError> {
    match value {
        Some(value) if !catalog.contains(&value.as_str()) => Err(ChatError::UnknownPreference {
            kind,
            value: value.clone(),
        }),
        _ => Ok(()),
    }
}

pub async fn load(db_pool: &SqlitePool, user_id: &str) -> sqlx::Result<Preferences> {
    Ok(
        sqlx::query_as("SELECT background,font FROM preferences WHERE user_id=?")
            .bind(user_id)
            .fetch_optional(db_pool)
            .await?
            .unwrap_or_default()
    )
}

/// Fields left `None` keep their stored value.
pub async fn save(db_pool: &SqlitePool, user_id: &str, prefs: &Preferences) -> AppResult<Preferences> {
    prefs.validate()?;

    let saved = sqlx::query_as(
        "INSERT INTO preferences (user_id,background,font) VALUES (?,?,?)
         ON CONFLICT(user_id) DO UPDATE SET
             background=COALESCE(excluded.background,background),
             font=COALESCE(excluded.font,font)
         RETURNING background,font",
    )
    .bind(user_id)
    .bind(&prefs.background)
    .bind(&prefs.font)
    .fetch_one(db_pool)
    .await?;

    Ok(saved)
}

fn view(chosen: Preferences) -> PreferencesView {
    PreferencesView {
        chosen,
        backgrounds: &BACKGROUNDS,
        fonts: &FONTS,
    }
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn get_prefs(
    CurrentUser(user_id): CurrentUser,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<PreferencesView>> {
    Ok(Json(view(load(&db_pool, &user_id).await?)))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn put_prefs(
    CurrentUser(user_id): CurrentUser,
    State(db_pool): State<SqlitePool>,
    Json(prefs): Json<Preferences>,
) -> AppResult<Json<PreferencesView>> {
    Ok(Json(view(save(&db_pool, &user_id, &prefs).await?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn unknown_font_is_rejected() {
        let prefs = Preferences {
            background: None,
            font: Some("Comic Sans".to_owned()),
        };
        assert!(matches!(
            prefs.validate(),
            Err(ChatError::UnknownPreference { kind: "font", .. })
        ));
    }

    #[tokio::test]
    async fn partial_updates_keep_other_choice() {
        let db_pool = db::memory().await.unwrap();
        assert_eq!(load(&db_pool, "alice").await.unwrap(), Preferences::default());

        save(&db_pool, "alice", &Preferences {
            background: Some(BACKGROUNDS[2].to_owned()),
            font: Some("Kanit".to_owned()),
        }).await.unwrap();
        let saved = save(&db_pool, "alice", &Preferences {
            background: None,
            font: Some("Poppins".to_owned()),
        }).await.unwrap();

        assert_eq!(saved.background.as_deref(), Some(BACKGROUNDS[2]));
        assert_eq!(saved.font.as_deref(), Some("Poppins"));
    }

    #[tokio::test]
    async fn invalid_save_writes_nothing() {
        let db_pool = db::memory().await.unwrap();
        let bad = Preferences {
            background: Some("https://example.com/cat.png".to_owned()),
            font: None,
        };
        assert!(save(&db_pool, "bob", &bad).await.is_err());
        assert_eq!(load(&db_pool, "bob").await.unwrap(), Preferences::default());
    }
}
