//! In-process cache tier
//!
//! A small, volatile map in front of the disk tier: entries live for a short
//! TTL and the table holds at most a fixed number of them, evicting the
//! oldest-inserted entry when full. Insertion order, not access order, keeps
//! the bookkeeping trivial; the TTL is short enough that staleness within it
//! is an accepted risk, so hits here skip the freshness re-check entirely.

use crate::identity::{CacheKey, FreshnessToken};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One cached preview in the memory tier.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub token: FreshnessToken,
}

struct Stored {
    entry: CacheEntry,
    inserted_at: Instant,
    seq: u64,
}

struct Inner {
    map: HashMap<CacheKey, Stored>,
    next_seq: u64,
}

/// Bounded TTL cache with oldest-inserted-first eviction.
pub struct MemoryCache {
    max_entries: usize,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries,
            ttl,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Look up a fresh entry. Expiry is lazy: an entry past its TTL is
    /// removed here and reported as absent.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut inner = self.inner.lock();
        let expired = match inner.map.get(key) {
            Some(stored) => {
                if stored.inserted_at.elapsed() <= self.ttl {
                    return Some(stored.entry.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            inner.map.remove(key);
        }
        None
    }

    /// Insert an entry, evicting the single oldest-inserted one first when
    /// the table is at its ceiling. Re-inserting an existing key refreshes
    /// its insertion position.
    pub fn insert(&self, key: CacheKey, entry: CacheEntry) {
        if self.max_entries == 0 {
            return;
        }

        let mut inner = self.inner.lock();
        if !inner.map.contains_key(&key) && inner.map.len() >= self.max_entries {
            let oldest = inner
                .map
                .iter()
                .min_by_key(|(_, stored)| stored.seq)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                inner.map.remove(&oldest);
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.map.insert(
            key,
            Stored {
                entry,
                inserted_at: Instant::now(),
                seq,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.next_seq = 0;
    }
}
