mod chat;
pub mod key;
pub mod msg;
pub mod previews;
pub mod typing;
pub mod upload;
mod ws;

use axum::{routing::{delete, get, post}, Router};

use crate::AppState;

pub use key::{room_key, RoomKey};
pub use msg::{Message, MessageStore, ReplySnapshot, SendMessage};
pub use previews::{Preview, Previews};
pub use typing::{TypingDebouncer, TypingFlags, TypingInput, TypingSink};
pub use upload::MediaClient;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/previews", get(previews::previews))
        .route("/api/chats/{peer}/messages", get(chat::list_messages).post(chat::send_message))
        .route("/api/chats/{peer}/messages/{id}", delete(chat::delete_message))
        .route("/api/chats/{peer}/images", post(chat::upload_image))
        .route("/ws/chats/{peer}", get(ws::chat_ws))
        .route("/ws/roster", get(previews::roster_ws))
}
