use axum::{debug_handler, extract::State, Json};
use sqlx::SqlitePool;

use crate::{session::CurrentUser, AppResult, ChatError};

use super::{store, Profile};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn me(
    CurrentUser(user_id): CurrentUser,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Profile>> {
    let profile = store::get(&db_pool, &user_id)
        .await?
        .ok_or(ChatError::UserNotFound(user_id))?;
    Ok(Json(profile))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn users(
    CurrentUser(user_id): CurrentUser,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<Profile>>> {
    Ok(Json(store::roster(&db_pool, &user_id).await?))
}
