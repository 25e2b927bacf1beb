use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

/// TTL-based message-id idempotency cache.
///
/// A live entry means the message was already delivered (or dropped as
/// poison) this cycle or a recent one: it must not be re-forwarded, but a
/// redelivery is still acknowledged. Entries are pruned lazily once per
/// poll cycle.
#[derive(Debug)]
pub struct DedupeCache {
    ttl: Duration,
    entries: HashMap<String, Instant>,
    order: VecDeque<(String, Instant)>,
}

impl DedupeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn seen(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn remember(&mut self, id: &str, now: Instant) {
        if self.entries.insert(id.to_string(), now).is_none() {
            self.order.push_back((id.to_string(), now));
        }
    }

    pub fn prune(&mut self, now: Instant) {
        while let Some((id, inserted_at)) = self.order.front().cloned() {
            if now.duration_since(inserted_at) < self.ttl {
                break;
            }
            self.order.pop_front();
            self.entries.remove(&id);
        }
        debug_assert_eq!(
            self.entries.len(),
            self.order.len(),
            "DedupeCache: HashMap and VecDeque out of sync"
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
