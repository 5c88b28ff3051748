//! TTL-bounded read-through cache.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Default lifetime of a cached value.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Map of values that expire `ttl` after insertion.
///
/// Expired entries are never returned; they are dropped lazily on the next
/// lookup of the same key.
#[derive(Debug)]
pub struct ReadThroughCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> Default for ReadThroughCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<K, V> ReadThroughCache<K, V>
where
    K: Eq + Hash,
{
    /// Empty cache with the given TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Configured TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store `value` under `key`, resetting its age.
    pub fn set(&self, key: K, value: V) {
        self.lock().insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Forget `key`.
    pub fn invalidate(&self, key: &K) {
        self.lock().remove(key);
    }

    /// Forget everything.
    pub fn clear(&self) {
        let mut entries = self.lock();
        let dropped = entries.len();
        entries.clear();
        drop(entries);
        debug!(dropped, "Cache cleared");
    }

    /// Number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> ReadThroughCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Value stored under `key` if it is younger than the TTL.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.lock();
        let fresh = entries
            .get(key)
            .map(|entry| entry.inserted_at.elapsed() < self.ttl);
        match fresh {
            Some(true) => entries.get(key).map(|entry| entry.value.clone()),
            Some(false) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}
