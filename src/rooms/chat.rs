use axum::{
    debug_handler,
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    profiles::{store, Profile},
    session::CurrentUser,
    AppResult, AppState, ChatError,
};

use super::{key::room_key, Message, MessageStore, SendMessage};

/// Both sides of a conversation, or 404 if either is unknown.
async fn participants(db_pool: &SqlitePool, user_id: String, peer_id: &str) -> AppResult<Profile> {
    let me = store::get(db_pool, &user_id)
        .await?
        .ok_or(ChatError::UserNotFound(user_id))?;
    if store::get(db_pool, peer_id).await?.is_none() {
        return Err(ChatError::UserNotFound(peer_id.to_owned()).into());
    }
    Ok(me)
}

#[debug_handler(state = AppState)]
pub(crate) async fn list_messages(
    Path(peer_id): Path<String>,
    CurrentUser(user_id): CurrentUser,
    State(messages): State<MessageStore>,
) -> AppResult<Json<Vec<Message>>> {
    let room_key = room_key(&user_id, &peer_id)?;
    Ok(Json(messages.list(&room_key).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn send_message(
    Path(peer_id): Path<String>,
    CurrentUser(user_id): CurrentUser,
    State(db_pool): State<SqlitePool>,
    State(messages): State<MessageStore>,
    Json(msg): Json<SendMessage>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let me = participants(&db_pool, user_id, &peer_id).await?;
    let message = messages.send(&me, &peer_id, msg).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete_message(
    Path((peer_id, id)): Path<(String, Uuid)>,
    CurrentUser(user_id): CurrentUser,
    State(messages): State<MessageStore>,
) -> AppResult<StatusCode> {
    // Not yours or not there: nothing happens either way.
    messages.delete(&user_id, &peer_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
pub(crate) async fn upload_image(
    Path(peer_id): Path<String>,
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<Message>)> {
    let me = participants(&state.db_pool, user_id, &peer_id).await?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("image").to_owned();
        let content_type = field.content_type().map(str::to_owned);
        let bytes = field.bytes().await?;

        let url = state.media.upload(file_name, content_type, bytes.to_vec()).await?;
        let message = state.messages
            .send(&me, &peer_id, SendMessage { image: Some(url), ..SendMessage::default() })
            .await?;
        return Ok((StatusCode::CREATED, Json(message)));
    }

    // No file field: nothing to send.
    Err(ChatError::EmptyMessage.into())
}
