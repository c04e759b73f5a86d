//! Replay protection for message ids.
//!
//! An id is remembered until its envelope can no longer pass the freshness
//! check: `max(timestamp, received) + window`. A future-dated envelope is
//! therefore held for as long as its own timestamp stays fresh.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

#[derive(Debug)]
pub struct ReplayGuard {
    window_ms: i64,
    seen: HashSet<String>,
    /// Expiry per id, earliest first.
    expiries: BinaryHeap<Reverse<(i64, String)>>,
}

impl ReplayGuard {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_ms: (window_secs as i64).saturating_mul(1_000),
            seen: HashSet::new(),
            expiries: BinaryHeap::new(),
        }
    }

    /// Record `message_id`, signed at `timestamp_ms` and received at
    /// `now_ms`. Returns `false` if it is still remembered.
    pub fn check_and_record(&mut self, message_id: &str, timestamp_ms: i64, now_ms: i64) -> bool {
        self.evict(now_ms);
        if !self.seen.insert(message_id.to_string()) {
            return false;
        }
        let expires_at = timestamp_ms.max(now_ms).saturating_add(self.window_ms);
        self.expiries.push(Reverse((expires_at, message_id.to_string())));
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn evict(&mut self, now_ms: i64) {
        while let Some(Reverse((expires_at, _))) = self.expiries.peek() {
            if *expires_at >= now_ms {
                break;
            }
            if let Some(Reverse((_, id))) = self.expiries.pop() {
                self.seen.remove(&id);
            }
        }
    }
}
