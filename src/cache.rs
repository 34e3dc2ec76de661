use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::debug;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct Entries<K, V> {
    map: HashMap<K, Entry<V>>,
    /// Bumped by every invalidation.
    writes: u64,
}

/// Taken before reading the backing store; a fill only lands if nothing was
/// invalidated in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket(u64);

pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<Entries<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            ttl,
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                writes: 0,
            }),
        }
    }

    /// Expired entries are dropped on the way out, never returned.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries();
        let now = Instant::now();
        match entries.map.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn ticket(&self) -> FillTicket {
        FillTicket(self.entries().writes)
    }

    /// Stores `value` unless some key was invalidated since `ticket` was
    /// taken, in which case the read may predate that write and is dropped.
    pub fn fill(&self, key: K, value: V, ticket: FillTicket) -> bool {
        let mut entries = self.entries();
        if entries.writes != ticket.0 {
            return false;
        }
        let expires_at = Instant::now() + self.ttl;
        entries.map.insert(key, Entry { value, expires_at });
        true
    }

    /// Call after the backing store changed.
    pub fn invalidate(&self, key: &K) {
        let mut entries = self.entries();
        entries.writes += 1;
        entries.map.remove(key);
    }

    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries();
        let now = Instant::now();
        let before = entries.map.len();
        entries.map.retain(|_, entry| entry.expires_at > now);
        before - entries.map.len()
    }

    pub fn len(&self) -> usize {
        self.entries().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweeps expired entries every `period` until the cache is dropped.
    pub fn spawn_purge(self: &Arc<Self>, period: Duration) -> JoinHandle<()>
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!("purged {purged} expired cache entries");
                }
            }
        })
    }

    fn entries(&self) -> MutexGuard<'_, Entries<K, V>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
