use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
    Json,
};
use futures_util::StreamExt;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::{
    cache::TtlCache,
    hub::{Hub, Topic},
    profiles::{store, Profile},
    session::CurrentUser,
    AppResult,
};

use super::{key::room_key, ws::send_json, Message, MessageStore, TypingFlags};

pub const TYPING_LABEL: &str = "typing...";
pub const PHOTO_LABEL: &str = "📷 Photo";
pub const EMPTY_LABEL: &str = "No messages yet";

/// A peer and the newest message exchanged with them. This is the part of a
/// preview worth caching; typing flags are read fresh every time.
#[derive(Debug, Clone)]
pub struct PeerSummary {
    pub peer: Profile,
    pub last_message: Option<Message>,
}

pub type PreviewCache = TtlCache<String, Vec<PeerSummary>>;

#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub peer: Profile,
    pub last_message: Option<Message>,
    pub peer_typing: bool,
    pub label: String,
}

pub fn label(last_message: Option<&Message>, peer_typing: bool) -> String {
    if peer_typing {
        return TYPING_LABEL.to_owned();
    }
    match last_message {
        Some(Message { text: Some(text), .. }) => text.clone(),
        Some(Message { image: Some(_), .. }) => PHOTO_LABEL.to_owned(),
        _ => EMPTY_LABEL.to_owned(),
    }
}

/// Most recent conversation first; peers never talked to go last, by name.
pub fn sort_previews(previews: &mut [Preview]) {
    previews.sort_by(|a, b| {
        let a_time = a.last_message.as_ref().map(|m| m.timestamp);
        let b_time = b.last_message.as_ref().map(|m| m.timestamp);
        b_time
            .cmp(&a_time)
            .then_with(|| a.peer.display_name.cmp(&b.peer.display_name))
            .then_with(|| a.peer.id.cmp(&b.peer.id))
    });
}

#[derive(Clone)]
pub struct Previews {
    db_pool: SqlitePool,
    messages: MessageStore,
    typing: TypingFlags,
    cache: Arc<PreviewCache>,
}

impl Previews {
    pub fn new(db_pool: SqlitePool, messages: MessageStore, typing: TypingFlags, cache: Arc<PreviewCache>) -> Previews {
        Previews {
            db_pool,
            messages,
            typing,
            cache,
        }
    }

    pub async fn for_user(&self, user_id: &str) -> AppResult<Vec<Preview>> {
        let summaries = match self.cache.get(&user_id.to_owned()) {
            Some(summaries) => summaries,
            None => {
                let ticket = self.cache.ticket();
                let summaries = self.summarize(user_id).await?;
                self.cache.fill(user_id.to_owned(), summaries.clone(), ticket);
                summaries
            }
        };

        let mut previews = Vec::with_capacity(summaries.len());
        for PeerSummary { peer, last_message } in summaries {
            let room_key = room_key(user_id, &peer.id)?;
            let peer_typing = self.typing.get(&room_key, &peer.id).await?;
            previews.push(Preview {
                label: label(last_message.as_ref(), peer_typing),
                peer,
                last_message,
                peer_typing,
            });
        }
        sort_previews(&mut previews);

        Ok(previews)
    }

    pub fn invalidate(&self, user_id: &str) {
        self.cache.invalidate(&user_id.to_owned());
    }

    async fn summarize(&self, user_id: &str) -> AppResult<Vec<PeerSummary>> {
        let mut summaries = Vec::new();
        for peer in store::roster(&self.db_pool, user_id).await? {
            let last_message = self.messages.latest(&room_key(user_id, &peer.id)?).await?;
            summaries.push(PeerSummary { peer, last_message });
        }
        Ok(summaries)
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RosterFrame {
    Roster { users: Vec<Profile> },
    Previews { previews: Vec<Preview> },
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn previews(
    CurrentUser(user_id): CurrentUser,
    State(previews): State<Previews>,
) -> AppResult<Json<Vec<Preview>>> {
    Ok(Json(previews.for_user(&user_id).await?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn roster_ws(
    CurrentUser(user_id): CurrentUser,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    State(previews): State<Previews>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(async move |socket| roster_session(socket, user_id, db_pool, hub, previews).await)
}

async fn roster_session(socket: WebSocket, user_id: String, db_pool: SqlitePool, hub: Arc<Hub>, previews: Previews) {
    let mut roster_events = hub.subscribe(Topic::Roster);
    let mut inbox = hub.subscribe(Topic::Inbox(user_id.clone()));
    let (mut sender, mut receiver) = socket.split();

    let mut roster_changed = true;
    let mut inbox_changed = true;
    loop {
        if roster_changed {
            match store::roster(&db_pool, &user_id).await {
                Ok(users) => {
                    if send_json(&mut sender, &RosterFrame::Roster { users }).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("roster for {user_id}: {e}"),
            }
        }
        if roster_changed || inbox_changed {
            match previews.for_user(&user_id).await {
                Ok(previews) => {
                    if send_json(&mut sender, &RosterFrame::Previews { previews }).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("previews for {user_id}: {:#}", e.0),
            }
        }

        (roster_changed, inbox_changed) = tokio::select! {
            event = roster_events.recv() => match event {
                Some(_) => {
                    previews.invalidate(&user_id);
                    (true, false)
                }
                None => break,
            },
            event = inbox.recv() => match event {
                Some(_) => (false, true),
                None => break,
            },
            frame = receiver.next() => match frame {
                Some(Ok(_)) => (false, false),
                _ => break,
            },
        };
    }

    debug!("roster stream for {user_id} closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::room_key;

    fn profile(id: &str, name: &str) -> Profile {
        Profile {
            id: id.to_owned(),
            display_name: name.to_owned(),
            email: None,
            photo_url: None,
            online: true,
        }
    }

    fn message(timestamp: i64, text: Option<&str>, image: Option<&str>) -> Message {
        Message {
            id: uuid::Uuid::now_v7(),
            room_key: room_key("a", "b").unwrap(),
            sender: "a".to_owned(),
            receiver: "b".to_owned(),
            text: text.map(str::to_owned),
            html: None,
            image: image.map(str::to_owned),
            reply: None,
            sender_name: "A".to_owned(),
            sender_photo: None,
            timestamp,
        }
    }

    fn preview(peer: Profile, last_message: Option<Message>) -> Preview {
        Preview {
            label: label(last_message.as_ref(), false),
            peer,
            last_message,
            peer_typing: false,
        }
    }

    #[test]
    fn labels_fall_back() {
        assert_eq!(label(None, false), EMPTY_LABEL);
        assert_eq!(label(Some(&message(1, None, Some("https://img"))), false), PHOTO_LABEL);
        assert_eq!(label(Some(&message(1, Some("hey"), Some("https://img"))), false), "hey");
        assert_eq!(label(Some(&message(1, Some("hey"), None)), true), TYPING_LABEL);
        assert_eq!(label(None, true), TYPING_LABEL);
    }

    #[test]
    fn newest_first_silent_last() {
        let mut previews = vec![
            preview(profile("z", "Zed"), None),
            preview(profile("o", "Old"), Some(message(10, Some("old"), None))),
            preview(profile("a", "Amy"), None),
            preview(profile("n", "New"), Some(message(20, Some("new"), None))),
        ];
        sort_previews(&mut previews);

        let order: Vec<_> = previews.iter().map(|p| p.peer.id.as_str()).collect();
        assert_eq!(order, ["n", "o", "a", "z"]);
    }
}
