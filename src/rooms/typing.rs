use std::{future::Future, sync::Arc, time::Duration};

use sqlx::SqlitePool;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::warn;

use crate::{
    hub::{Event, Hub, Topic},
    AppResult,
};

use super::RoomKey;

/// One boolean per (room, user), overwritten in place.
#[derive(Clone)]
pub struct TypingFlags {
    db_pool: SqlitePool,
    hub: Arc<Hub>,
}

impl TypingFlags {
    pub fn new(db_pool: SqlitePool, hub: Arc<Hub>) -> TypingFlags {
        TypingFlags { db_pool, hub }
    }

    /// Returns whether the stored flag changed. Only changes are broadcast.
    pub async fn set(&self, room_key: &RoomKey, user_id: &str, typing: bool) -> AppResult<bool> {
        let changed: Option<(bool,)> = sqlx::query_as(
            "INSERT INTO typing (room_key,user_id,typing) VALUES (?,?,?)
             ON CONFLICT(room_key,user_id) DO UPDATE SET typing=excluded.typing
             WHERE typing<>excluded.typing
             RETURNING typing",
        )
        .bind(room_key.as_str())
        .bind(user_id)
        .bind(typing)
        .fetch_optional(&self.db_pool)
        .await?;

        if changed.is_none() {
            return Ok(false);
        }

        let event = Event::Typing {
            room_key: room_key.clone(),
            user_id: user_id.to_owned(),
            typing,
        };
        self.hub.publish(&Topic::Room(room_key.clone()), event.clone());
        if let Some(peer) = room_key.peer_of(user_id) {
            self.hub.publish(&Topic::Inbox(peer.to_owned()), event);
        }

        Ok(true)
    }

    pub async fn get(&self, room_key: &RoomKey, user_id: &str) -> AppResult<bool> {
        let flag: Option<(bool,)> = sqlx::query_as("SELECT typing FROM typing WHERE room_key=? AND user_id=?")
            .bind(room_key.as_str())
            .bind(user_id)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(flag.is_some_and(|(typing,)| typing))
    }
}

/// Where a debouncer writes its decisions.
pub trait TypingSink: Send + Sync + 'static {
    fn set_typing(&self, typing: bool) -> impl Future<Output = ()> + Send;
}

/// Writes one user's flag in one room. Failures are logged and dropped.
pub struct FlagSink {
    pub flags: TypingFlags,
    pub room_key: RoomKey,
    pub user_id: String,
}

impl TypingSink for FlagSink {
    async fn set_typing(&self, typing: bool) {
        if let Err(e) = self.flags.set(&self.room_key, &self.user_id, typing).await {
            warn!("typing={typing} for {} in {}: {:#}", self.user_id, self.room_key, e.0);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingInput {
    /// The composer's current contents.
    Input(String),
    Blur,
    Sent,
}

/// Turns composer activity into typing flag writes.
///
/// Non-empty input writes `true` right away and arms a quiet timer; when the
/// timer runs out `false` is written. Empty input, blur and send write
/// `false` immediately, and so does dropping or closing the debouncer.
/// A write that would repeat the last written value is skipped.
pub struct TypingDebouncer {
    tx: mpsc::UnboundedSender<TypingInput>,
    task: JoinHandle<()>,
}

impl TypingDebouncer {
    pub fn spawn<S: TypingSink>(sink: S, quiet: Duration) -> TypingDebouncer {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(sink, quiet, rx));
        TypingDebouncer { tx, task }
    }

    pub fn push(&self, input: TypingInput) {
        let _ = self.tx.send(input);
    }

    pub fn input(&self, text: impl Into<String>) {
        self.push(TypingInput::Input(text.into()));
    }

    pub fn blur(&self) {
        self.push(TypingInput::Blur);
    }

    pub fn sent(&self) {
        self.push(TypingInput::Sent);
    }

    /// Clears the flag and waits until that write has finished.
    pub async fn close(self) {
        let TypingDebouncer { tx, task } = self;
        drop(tx);
        let _ = task.await;
    }
}

async fn run<S: TypingSink>(sink: S, quiet: Duration, mut rx: mpsc::UnboundedReceiver<TypingInput>) {
    let mut current = false;
    let mut deadline: Option<Instant> = None;

    loop {
        let input = match deadline {
            Some(at) => tokio::select! {
                input = rx.recv() => input,
                _ = sleep_until(at) => {
                    deadline = None;
                    write(&sink, &mut current, false).await;
                    continue;
                }
            },
            None => rx.recv().await,
        };

        match input {
            Some(TypingInput::Input(text)) if !text.trim().is_empty() => {
                write(&sink, &mut current, true).await;
                deadline = Some(Instant::now() + quiet);
            }
            Some(_) => {
                deadline = None;
                write(&sink, &mut current, false).await;
            }
            None => {
                write(&sink, &mut current, false).await;
                break;
            }
        }
    }
}

async fn write<S: TypingSink>(sink: &S, current: &mut bool, typing: bool) {
    if *current != typing {
        *current = typing;
        sink.set_typing(typing).await;
    }
}
