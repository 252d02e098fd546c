//! Seen-message cache for gossip deduplication.
//!
//! Ids are kept for a retention window and then forgotten. Within the window
//! a seen id is always reported as seen; after it, a very old duplicate may
//! be processed again, which the chain and pool tolerate because both are
//! idempotent.
//!
//! A hard capacity bounds memory under a flood. Hitting it evicts the oldest
//! ids early, so the capacity should comfortably exceed the number of
//! distinct messages expected within one retention window.

use std::collections::{HashMap, VecDeque};

use crate::crypto::hash::Hash256;

pub type MessageId = Hash256;

/// Bounded, age-evicting set of message ids.
#[derive(Debug)]
pub struct MessageStore {
    retention_ms: u64,
    capacity: usize,
    /// id -> time first seen.
    seen: HashMap<MessageId, u64>,
    /// Insertion order; timestamps are non-decreasing front to back.
    order: VecDeque<(MessageId, u64)>,
}

impl MessageStore {
    pub fn new(retention_ms: u64, capacity: usize) -> Self {
        Self {
            retention_ms,
            capacity: capacity.max(1),
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn has_seen(&self, id: &MessageId) -> bool {
        self.seen.contains_key(id)
    }

    /// Records `id` as seen at `now_ms`. Returns `false` if it already was.
    pub fn mark_seen(&mut self, id: MessageId, now_ms: u64) -> bool {
        if self.seen.contains_key(&id) {
            return false;
        }
        self.prune(now_ms);
        while self.seen.len() >= self.capacity {
            if self.pop_oldest().is_none() {
                break;
            }
        }

        // Keep the queue ordered even if the caller's clock steps back.
        let stamp = self.order.back().map_or(now_ms, |(_, t)| now_ms.max(*t));
        self.seen.insert(id, stamp);
        self.order.push_back((id, stamp));
        true
    }

    /// Forgets ids first seen more than the retention window before
    /// `now_ms`. Returns how many were dropped.
    pub fn prune(&mut self, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(self.retention_ms);
        let mut dropped = 0;
        while let Some((_, seen_at)) = self.order.front() {
            if *seen_at >= cutoff {
                break;
            }
            self.pop_oldest();
            dropped += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn pop_oldest(&mut self) -> Option<MessageId> {
        let (id, _) = self.order.pop_front()?;
        self.seen.remove(&id);
        Some(id)
    }
}
