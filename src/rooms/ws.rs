use axum::{
    debug_handler,
    extract::{ws::{Message as WsMessage, WebSocket}, Path, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    hub::{Event, Topic},
    profiles::{store, Profile},
    session::CurrentUser,
    AppResult, AppState, ChatError,
};

use super::{
    key::room_key,
    typing::{FlagSink, TypingDebouncer},
    Message, RoomKey, SendMessage,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ClientFrame {
    Input {
        text: String,
    },
    Blur,
    Send {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        image: Option<String>,
        #[serde(default)]
        reply_to: Option<Uuid>,
    },
    Delete {
        id: Uuid,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ServerFrame {
    Snapshot { messages: Vec<Message>, peer_typing: bool },
    Message { message: Message, notify: bool },
    MessageDeleted { id: Uuid },
    Typing { user_id: String, typing: bool },
    Error { message: String },
}

pub(crate) async fn send_json<S, T>(sender: &mut S, frame: &T) -> anyhow::Result<()>
where
    S: Sink<WsMessage, Error = axum::Error> + Unpin,
    T: Serialize,
{
    let text = serde_json::to_string(frame)?;
    sender.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

/// Whether `message` should ring for `viewer`: it is new to this stream and
/// somebody else wrote it.
pub(crate) fn should_notify(last_seen: &mut Option<Uuid>, message: &Message, viewer: &str) -> bool {
    let fresh = *last_seen != Some(message.id);
    *last_seen = Some(message.id);
    fresh && message.sender != viewer
}

/// Timestamps only grow within a room, so a message stamped at or below the
/// snapshot's newest was already delivered with it.
pub(crate) fn in_snapshot(snapshot_until: Option<i64>, message: &Message) -> bool {
    snapshot_until.is_some_and(|until| message.timestamp <= until)
}

#[debug_handler(state = AppState)]
pub(crate) async fn chat_ws(
    Path(peer_id): Path<String>,
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> AppResult<impl IntoResponse> {
    let me = store::get(&state.db_pool, &user_id)
        .await?
        .ok_or(ChatError::UserNotFound(user_id.clone()))?;
    if store::get(&state.db_pool, &peer_id).await?.is_none() {
        return Err(ChatError::UserNotFound(peer_id).into());
    }
    let room_key = room_key(&me.id, &peer_id)?;

    Ok(ws.on_upgrade(async move |socket| conversation(socket, state, me, peer_id, room_key).await))
}

async fn conversation(socket: WebSocket, state: AppState, me: Profile, peer_id: String, room_key: RoomKey) {
    // Subscribe before reading the snapshot so nothing falls in between.
    let mut events = state.hub.subscribe(Topic::Room(room_key.clone()));
    let (mut sender, mut receiver) = socket.split();

    let snapshot = async {
        let messages = state.messages.list(&room_key).await?;
        let peer_typing = state.typing.get(&room_key, &peer_id).await?;
        AppResult::Ok((messages, peer_typing))
    }
    .await;
    let (messages, peer_typing) = match snapshot {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("snapshot of {room_key}: {:#}", e.0);
            let _ = send_json(&mut sender, &ServerFrame::Error { message: e.0.to_string() }).await;
            return;
        }
    };
    let mut last_seen = messages.last().map(|m| m.id);
    let snapshot_until = messages.last().map(|m| m.timestamp);
    if send_json(&mut sender, &ServerFrame::Snapshot { messages, peer_typing }).await.is_err() {
        return;
    }

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerFrame>();
    let viewer = me.id.clone();
    let peer = peer_id.clone();
    let mut forward_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                event = events.recv() => match event {
                    Some(Event::Message { message }) if in_snapshot(snapshot_until, &message) => continue,
                    Some(Event::Message { message }) => {
                        let notify = should_notify(&mut last_seen, &message, &viewer);
                        ServerFrame::Message { message, notify }
                    }
                    Some(Event::MessageDeleted { id, .. }) => ServerFrame::MessageDeleted { id },
                    Some(Event::Typing { user_id, typing, .. }) if user_id == peer => {
                        ServerFrame::Typing { user_id, typing }
                    }
                    Some(_) => continue,
                    None => break,
                },
                frame = reply_rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            if send_json(&mut sender, &frame).await.is_err() {
                break;
            }
        }
    });

    let debouncer = TypingDebouncer::spawn(
        FlagSink {
            flags: state.typing.clone(),
            room_key: room_key.clone(),
            user_id: me.id.clone(),
        },
        state.config.typing_quiet(),
    );

    loop {
        let text = tokio::select! {
            _ = &mut forward_task => break,
            frame = receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
        };

        let frame = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = reply_tx.send(ServerFrame::Error { message: format!("bad frame: {e}") });
                continue;
            }
        };

        match frame {
            ClientFrame::Input { text } => debouncer.input(text),
            ClientFrame::Blur => debouncer.blur(),
            ClientFrame::Send { text, image, reply_to } => {
                debouncer.sent();
                let sent = state.messages
                    .send(&me, &peer_id, SendMessage { text, image, reply_to })
                    .await;
                if let Err(e) = sent {
                    warn!("{} -> {peer_id}: {:#}", me.id, e.0);
                    let _ = reply_tx.send(ServerFrame::Error { message: e.0.to_string() });
                }
            }
            ClientFrame::Delete { id } => match state.messages.delete(&me.id, &peer_id, id).await {
                Ok(deleted) => debug!("delete {id} by {}: {deleted}", me.id),
                Err(e) => {
                    warn!("delete {id} by {}: {:#}", me.id, e.0);
                    let _ = reply_tx.send(ServerFrame::Error { message: e.0.to_string() });
                }
            },
        }
    }

    forward_task.abort();
    debouncer.close().await;
    debug!("{} left {room_key}", me.id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_from(sender: &str) -> Message {
        Message {
            id: Uuid::now_v7(),
            room_key: room_key("alice", "bob").unwrap(),
            sender: sender.to_owned(),
            receiver: if sender == "alice" { "bob" } else { "alice" }.to_owned(),
            text: Some("hi".to_owned()),
            html: None,
            image: None,
            reply: None,
            sender_name: sender.to_owned(),
            sender_photo: None,
            timestamp: 1,
        }
    }

    #[test]
    fn notifies_once_for_peer_messages() {
        let mut last_seen = None;
        let incoming = message_from("bob");

        assert!(should_notify(&mut last_seen, &incoming, "alice"));
        assert!(!should_notify(&mut last_seen, &incoming, "alice"));
    }

    #[test]
    fn own_messages_stay_silent() {
        let mut last_seen = None;
        assert!(!should_notify(&mut last_seen, &message_from("alice"), "alice"));
    }

    #[test]
    fn snapshot_messages_are_not_replayed() {
        let mut message = message_from("bob");
        message.timestamp = 7;

        assert!(in_snapshot(Some(7), &message));
        assert!(in_snapshot(Some(9), &message));
        assert!(!in_snapshot(Some(6), &message));
        assert!(!in_snapshot(None, &message));
    }

    #[test]
    fn client_frames_parse() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"send","text":"hi"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Send { text: Some(_), image: None, reply_to: None }));

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"blur"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Blur));
    }

    #[test]
    fn server_frames_are_tagged() {
        let json = serde_json::to_value(ServerFrame::Typing { user_id: "bob".to_owned(), typing: true }).unwrap();
        assert_eq!(json["type"], "typing");
        assert_eq!(json["user_id"], "bob");
    }
}
