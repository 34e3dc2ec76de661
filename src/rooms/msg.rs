use std::{sync::Arc, time::Duration};

use pulldown_cmark::{Event as MdEvent, Parser};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    cache::TtlCache,
    hub::{Event, Hub, Topic},
    profiles::Profile,
    AppResult, ChatError,
};

use super::{key::room_key, previews::PreviewCache, RoomKey};

const COLUMNS: &str = "id,room_key,sender,receiver,text,image,reply_id,reply_text,reply_image,reply_sender,sender_name,sender_photo,timestamp";

/// A copy of the message being replied to, frozen at send time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplySnapshot {
    pub id: Uuid,
    pub text: Option<String>,
    pub image: Option<String>,
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_key: RoomKey,
    pub sender: String,
    pub receiver: String,
    pub text: Option<String>,
    /// `text` rendered as CommonMark.
    pub html: Option<String>,
    pub image: Option<String>,
    pub reply: Option<ReplySnapshot>,
    pub sender_name: String,
    pub sender_photo: Option<String>,
    /// Unix milliseconds, assigned by the server.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessage {
    pub text: Option<String>,
    pub image: Option<String>,
    pub reply_to: Option<Uuid>,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    room_key: String,
    sender: String,
    receiver: String,
    text: Option<String>,
    image: Option<String>,
    reply_id: Option<String>,
    reply_text: Option<String>,
    reply_image: Option<String>,
    reply_sender: Option<String>,
    sender_name: String,
    sender_photo: Option<String>,
    timestamp: i64,
}

impl MessageRow {
    fn into_message(self) -> Result<Message, uuid::Error> {
        let reply = match (self.reply_id, self.reply_sender) {
            (Some(id), Some(sender)) => Some(ReplySnapshot {
                id: Uuid::parse_str(&id)?,
                text: self.reply_text,
                image: self.reply_image,
                sender,
            }),
            _ => None,
        };

        Ok(Message {
            id: Uuid::parse_str(&self.id)?,
            room_key: RoomKey::from_stored(self.room_key),
            sender: self.sender,
            receiver: self.receiver,
            html: self.text.as_deref().map(render_markdown),
            text: self.text,
            image: self.image,
            reply,
            sender_name: self.sender_name,
            sender_photo: self.sender_photo,
            timestamp: self.timestamp,
        })
    }
}

/// Raw HTML in a message is shown as text, never injected.
pub fn render_markdown(text: &str) -> String {
    let parser = Parser::new(text).map(|event| match event {
        MdEvent::Html(html) | MdEvent::InlineHtml(html) => MdEvent::Text(html),
        _ => event,
    });

    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Message persistence plus the live side effects of every write: hub
/// events and cache maintenance.
#[derive(Clone)]
pub struct MessageStore {
    db_pool: SqlitePool,
    hub: Arc<Hub>,
    recent: Arc<TtlCache<RoomKey, Vec<Message>>>,
    previews: Arc<PreviewCache>,
}

impl MessageStore {
    pub fn new(db_pool: SqlitePool, hub: Arc<Hub>, ttl: Duration, previews: Arc<PreviewCache>) -> MessageStore {
        let recent = Arc::new(TtlCache::new(ttl));
        recent.spawn_purge(ttl);

        MessageStore {
            db_pool,
            hub,
            recent,
            previews,
        }
    }

    pub async fn send(&self, sender: &Profile, receiver: &str, msg: SendMessage) -> AppResult<Message> {
        let room_key = room_key(&sender.id, receiver)?;

        let text = msg.text
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty());
        let image = msg.image.filter(|image| !image.trim().is_empty());
        if text.is_none() && image.is_none() {
            return Err(ChatError::EmptyMessage.into());
        }

        let reply = match msg.reply_to {
            Some(reply_to) => Some(
                self.find(&room_key, reply_to)
                    .await?
                    .ok_or(ChatError::MessageNotFound(reply_to))?,
            ),
            None => None,
        };

        let id = Uuid::now_v7();
        let row: MessageRow = sqlx::query_as(&format!(
            "INSERT INTO messages ({COLUMNS})
             SELECT ?,?,?,?,?,?,?,?,?,?,?,?,MAX(?,COALESCE(MAX(timestamp),0)+1) FROM messages WHERE room_key=?
             RETURNING {COLUMNS}"
        ))
        .bind(id.to_string())
        .bind(room_key.as_str())
        .bind(&sender.id)
        .bind(receiver)
        .bind(&text)
        .bind(&image)
        .bind(reply.as_ref().map(|r| r.id.to_string()))
        .bind(reply.as_ref().and_then(|r| r.text.clone()))
        .bind(reply.as_ref().and_then(|r| r.image.clone()))
        .bind(reply.as_ref().map(|r| r.sender.clone()))
        .bind(&sender.display_name)
        .bind(&sender.photo_url)
        .bind(now_millis())
        .bind(room_key.as_str())
        .fetch_one(&self.db_pool)
        .await?;
        let message = row.into_message()?;

        info!("{} -> {} in {room_key} ({})", message.sender, message.receiver, message.id);

        self.recent.invalidate(&room_key);
        self.invalidate_previews(&message.sender, &message.receiver);
        self.publish(&room_key, &message.sender, &message.receiver, Event::Message {
            message: message.clone(),
        });

        Ok(message)
    }

    /// Only the sender may delete. Anyone else (or an unknown id) gets
    /// `false` and nothing changes.
    pub async fn delete(&self, requester: &str, peer: &str, id: Uuid) -> AppResult<bool> {
        let room_key = room_key(requester, peer)?;

        let deleted: Option<(String,)> = sqlx::query_as(
            "DELETE FROM messages WHERE id=? AND room_key=? AND sender=? RETURNING receiver",
        )
        .bind(id.to_string())
        .bind(room_key.as_str())
        .bind(requester)
        .fetch_optional(&self.db_pool)
        .await?;

        let Some((receiver,)) = deleted else {
            debug!("{requester} may not delete {id} in {room_key}");
            return Ok(false);
        };

        self.recent.invalidate(&room_key);
        self.invalidate_previews(requester, &receiver);
        self.publish(&room_key, requester, &receiver, Event::MessageDeleted {
            room_key: room_key.clone(),
            id,
        });

        Ok(true)
    }

    /// The whole conversation, oldest first.
    pub async fn list(&self, room_key: &RoomKey) -> AppResult<Vec<Message>> {
        if let Some(cached) = self.recent.get(room_key) {
            return Ok(cached);
        }

        let ticket = self.recent.ticket();
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM messages WHERE room_key=? ORDER BY timestamp,rowid"
        ))
        .bind(room_key.as_str())
        .fetch_all(&self.db_pool)
        .await?;

        let messages = rows
            .into_iter()
            .map(MessageRow::into_message)
            .collect::<Result<Vec<_>, _>>()?;
        self.recent.fill(room_key.clone(), messages.clone(), ticket);

        Ok(messages)
    }

    pub async fn latest(&self, room_key: &RoomKey) -> AppResult<Option<Message>> {
        if let Some(cached) = self.recent.get(room_key) {
            return Ok(cached.last().cloned());
        }

        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM messages WHERE room_key=? ORDER BY timestamp DESC,rowid DESC LIMIT 1"
        ))
        .bind(room_key.as_str())
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(row.map(MessageRow::into_message).transpose()?)
    }

    pub async fn find(&self, room_key: &RoomKey, id: Uuid) -> AppResult<Option<ReplySnapshot>> {
        let found: Option<(Option<String>, Option<String>, String)> =
            sqlx::query_as("SELECT text,image,sender FROM messages WHERE id=? AND room_key=?")
                .bind(id.to_string())
                .bind(room_key.as_str())
                .fetch_optional(&self.db_pool)
                .await?;

        Ok(found.map(|(text, image, sender)| ReplySnapshot { id, text, image, sender }))
    }

    fn invalidate_previews(&self, a: &str, b: &str) {
        self.previews.invalidate(&a.to_owned());
        self.previews.invalidate(&b.to_owned());
    }

    fn publish(&self, room_key: &RoomKey, sender: &str, receiver: &str, event: Event) {
        self.hub.publish(&Topic::Room(room_key.clone()), event.clone());
        self.hub.publish(&Topic::Inbox(sender.to_owned()), event.clone());
        if receiver != sender {
            self.hub.publish(&Topic::Inbox(receiver.to_owned()), event);
        }
    }
}
