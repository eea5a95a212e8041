//! Replay protection for command ids.
//!
//! A bounded cache of processed command ids. Entries live for at least the
//! configured horizon (token TTL plus clock skew by default) so a replayed
//! command inside the validity window is always caught; capacity pruning
//! only evicts entries older than the horizon is about to expire anyway.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

/// Default horizon: 300 s token TTL + 60 s skew.
pub const DEFAULT_HORIZON_SECS: i64 = 360;
const DEFAULT_MAX_ENTRIES: usize = 100_000;

#[derive(Debug)]
struct Inner {
    seen: HashSet<String>,
    order: VecDeque<(String, DateTime<Utc>)>,
}

/// First-submission-wins cache over command ids.
#[derive(Debug)]
pub struct ReplayCache {
    horizon: Duration,
    max_entries: usize,
    inner: Mutex<Inner>,
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_HORIZON_SECS), DEFAULT_MAX_ENTRIES)
    }
}

impl ReplayCache {
    pub fn new(horizon: Duration, max_entries: usize) -> Self {
        Self {
            horizon,
            max_entries,
            inner: Mutex::new(Inner {
                seen: HashSet::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Record `command_id`. Returns false when it was already present.
    pub fn insert(&self, command_id: &str) -> bool {
        self.insert_at(command_id, Utc::now())
    }

    /// Clock-injected variant for tests.
    pub fn insert_at(&self, command_id: &str, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock();

        // Expire entries past the horizon, then enforce capacity.
        while let Some((id, at)) = inner.order.front().cloned() {
            let expired = now - at > self.horizon;
            let over_capacity = inner.order.len() >= self.max_entries;
            if !expired && !over_capacity {
                break;
            }
            inner.order.pop_front();
            inner.seen.remove(&id);
        }

        if inner.seen.contains(command_id) {
            return false;
        }
        inner.seen.insert(command_id.to_string());
        inner.order.push_back((command_id.to_string(), now));
        true
    }

    /// Membership check without recording.
    pub fn contains(&self, command_id: &str) -> bool {
        self.inner.lock().seen.contains(command_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
