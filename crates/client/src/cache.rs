//! Short-lived snapshot cache keyed by conversion id.

use std::collections::HashMap;
use std::time::Duration;

use sheetflow_core::conversion::ConversionSnapshot;
use sheetflow_core::types::ConversionId;
use tokio::time::Instant;

/// Default lifetime of a cached snapshot.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

struct CacheEntry {
    snapshot: ConversionSnapshot,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Snapshots with a fixed time-to-live. Expired entries are dropped lazily.
pub struct SnapshotCache {
    entries: HashMap<ConversionId, CacheEntry>,
    ttl: Duration,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// The cached snapshot, if it has not expired at `now`.
    pub fn get(&self, id: &ConversionId, now: Instant) -> Option<ConversionSnapshot> {
        self.entries
            .get(id)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.snapshot.clone())
    }

    pub fn insert(&mut self, snapshot: ConversionSnapshot, now: Instant) {
        let entry = CacheEntry {
            expires_at: now + self.ttl,
            snapshot,
        };
        self.entries.insert(entry.snapshot.id, entry);

        if self.entries.len() > 256 {
            self.entries.retain(|_, entry| !entry.is_expired(now));
        }
    }

    pub fn remove(&mut self, id: &ConversionId) {
        self.entries.remove(id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
