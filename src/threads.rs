//! Bounded registry mapping opaque thread handles to broker threads.
//!
//! Thread ids are process-local correlation strings handed to the agent so
//! its `/reply` calls can be routed back to the originating channel and
//! thread. The registry is shared between the poll loop and the local API,
//! so it is internally synchronized. At capacity the oldest ~10% of
//! entries by insertion order are evicted (not LRU recency — the
//! `last_access_at` timestamp is informational only).

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ThreadHandle {
    pub channel: String,
    pub thread_ts: String,
    pub created_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ThreadRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

struct RegistryInner {
    capacity: usize,
    by_id: HashMap<String, ThreadHandle>,
    by_key: HashMap<(String, String), String>,
    order: VecDeque<String>,
}

impl ThreadRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                capacity: capacity.max(1),
                by_id: HashMap::new(),
                by_key: HashMap::new(),
                order: VecDeque::new(),
            })),
        }
    }

    /// Get or create the handle for `(channel, thread_ts)`.
    pub fn id_for(&self, channel: &str, thread_ts: &str) -> String {
        let mut inner = self.inner.lock();
        let key = (channel.to_string(), thread_ts.to_string());
        if let Some(id) = inner.by_key.get(&key).cloned() {
            if let Some(handle) = inner.by_id.get_mut(&id) {
                handle.last_access_at = Utc::now();
            }
            return id;
        }

        if inner.by_id.len() >= inner.capacity {
            let evict = (inner.capacity / 10).max(1);
            inner.evict_oldest(evict);
        }

        let id = format!("thr_{}", Uuid::new_v4().simple());
        let now = Utc::now();
        inner.by_id.insert(
            id.clone(),
            ThreadHandle {
                channel: key.0.clone(),
                thread_ts: key.1.clone(),
                created_at: now,
                last_access_at: now,
            },
        );
        inner.by_key.insert(key, id.clone());
        inner.order.push_back(id.clone());
        id
    }

    /// Resolve a handle back to `(channel, thread_ts)`. `None` if evicted
    /// or never issued.
    pub fn resolve(&self, thread_id: &str) -> Option<(String, String)> {
        let mut inner = self.inner.lock();
        let handle = inner.by_id.get_mut(thread_id)?;
        handle.last_access_at = Utc::now();
        Some((handle.channel.clone(), handle.thread_ts.clone()))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RegistryInner {
    fn evict_oldest(&mut self, count: usize) {
        for _ in 0..count {
            let Some(id) = self.order.pop_front() else {
                break;
            };
            if let Some(handle) = self.by_id.remove(&id) {
                self.by_key.remove(&(handle.channel, handle.thread_ts));
            }
        }
    }
}
