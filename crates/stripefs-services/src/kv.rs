//! Fast in-memory key-value cache in front of the metadata store.
//!
//! Entries carry the TTL and flags the client sent. Expiry is lazy: an
//! expired entry is dropped the next time it is looked up.

use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;

/// Key-value operations the cache service needs from its fast tier.
/// Implementations must be safe to call from many tasks at once.
pub trait FastCache: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedValue>;

    /// `ttl` in seconds, 0 = no expiry.
    fn set(&self, key: &str, value: Bytes, ttl: u32, flags: u8);

    /// Returns whether an entry was present.
    fn remove(&self, key: &str) -> bool;

    /// Drop every key starting with `prefix`. Returns how many were dropped.
    fn remove_prefix(&self, prefix: &str) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);
}

/// A hit: the stored value and the flags it was stored with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    pub value: Bytes,
    pub flags: u8,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    flags: u8,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FastCache for MemoryCache {
    fn get(&self, key: &str) -> Option<CachedValue> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.expired(now) {
                return Some(CachedValue {
                    value: entry.value.clone(),
                    flags: entry.flags,
                });
            }
        }
        // Either missing or expired; the guard above is released here.
        self.entries.remove_if(key, |_, e| e.expired(now));
        None
    }

    fn set(&self, key: &str, value: Bytes, ttl: u32, flags: u8) {
        let expires_at = (ttl > 0).then(|| Instant::now() + Duration::from_secs(ttl as u64));
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                flags,
                expires_at,
            },
        );
    }

    fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn remove_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0;
        self.entries.retain(|k, _| {
            let hit = k.starts_with(prefix);
            removed += usize::from(hit);
            !hit
        });
        removed
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}
