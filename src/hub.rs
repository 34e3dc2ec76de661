use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;
use uuid::Uuid;

use crate::{profiles::Profile, rooms::{Message, RoomKey}};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Everything happening inside one conversation.
    Room(RoomKey),
    /// Events touching any conversation a user takes part in.
    Inbox(String),
    /// Profile changes, for roster views.
    Roster,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Message { message: Message },
    MessageDeleted { room_key: RoomKey, id: Uuid },
    Typing { room_key: RoomKey, user_id: String, typing: bool },
    Profile { profile: Profile },
}

/// A topic's channel lives only while somebody is subscribed to it.
pub struct Hub {
    channels: Mutex<HashMap<Topic, broadcast::Sender<Event>>>,
}

impl Default for Hub {
    fn default() -> Self {
        Hub::new()
    }
}

impl Hub {
    pub fn new() -> Hub {
        Hub {
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(self: &Arc<Self>, topic: Topic) -> Subscription {
        let rx = self
            .channels()
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        Subscription {
            topic,
            rx: Some(rx),
            hub: Arc::downgrade(self),
        }
    }

    /// Returns how many subscribers the event reached.
    pub fn publish(&self, topic: &Topic, event: Event) -> usize {
        match self.channels().get(topic) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub fn topic_count(&self) -> usize {
        self.channels().len()
    }

    fn release(&self, topic: &Topic) {
        let mut channels = self.channels();
        if channels.get(topic).is_some_and(|tx| tx.receiver_count() == 0) {
            channels.remove(topic);
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<Topic, broadcast::Sender<Event>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Subscription {
    topic: Topic,
    rx: Option<broadcast::Receiver<Event>>,
    hub: Weak<Hub>,
}

impl Subscription {
    /// Waits for the next event. A subscriber that fell behind skips what it
    /// missed and carries on; `None` means the hub is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("subscriber on {:?} skipped {skipped} events", self.topic);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        drop(self.rx.take());
        if let Some(hub) = self.hub.upgrade() {
            hub.release(&self.topic);
        }
    }
}
