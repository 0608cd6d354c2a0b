//! Small keyed cache with a freshness window and a longer eviction window.
//!
//! Reads inside the freshness window re-serve the cached value (pull-based
//! check); a per-entry timer evicts the value after the longer window to
//! bound memory (push-based). Used for the derived settings snapshots, and
//! generic enough for any future derived-snapshot cache.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    fetched_at: Instant,
    seq: u64,
    evict_guard: Option<JoinHandle<()>>,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    next_seq: u64,
}

/// Cheaply clonable; all clones share the same entries.
pub struct ExpiringCache<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
    fresh_for: Duration,
    evict_after: Duration,
}

impl<K, V> Clone for ExpiringCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            fresh_for: self.fresh_for,
            evict_after: self.evict_after,
        }
    }
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    #[must_use]
    pub fn new(fresh_for: Duration, evict_after: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                next_seq: 0,
            })),
            fresh_for,
            evict_after,
        }
    }

    /// The cached value, if one was stored within the freshness window.
    #[must_use]
    pub fn get_fresh(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock().expect("cache lock poisoned");
        let entry = inner.entries.get(key)?;
        if entry.fetched_at.elapsed() < self.fresh_for {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Store a value, superseding any previous entry and its eviction
    /// timer. Must run inside a tokio runtime.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.next_seq += 1;
        let seq = inner.next_seq;

        let deadline = Instant::now() + self.evict_after;
        let shared = self.inner.clone();
        let guard_key = key.clone();
        let evict_guard = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut inner = shared.lock().expect("cache lock poisoned");
            // Only evict the entry this timer was armed for.
            if inner.entries.get(&guard_key).is_some_and(|e| e.seq == seq) {
                inner.entries.remove(&guard_key);
            }
        });

        if let Some(old) = inner.entries.insert(
            key,
            Entry {
                value,
                fetched_at: Instant::now(),
                seq,
                evict_guard: Some(evict_guard),
            },
        ) {
            if let Some(guard) = old.evict_guard {
                guard.abort();
            }
        }
    }

    /// Drop the entry for `key`. Callers that just issued a write targeting
    /// the key must call this so the next read rescans.
    pub fn invalidate(&self, key: &K) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if let Some(entry) = inner.entries.remove(key) {
            if let Some(guard) = entry.evict_guard {
                guard.abort();
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        for (_, entry) in inner.entries.drain() {
            if let Some(guard) = entry.evict_guard {
                guard.abort();
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::task::yield_now;
    use tokio::time::advance;

    use super::ExpiringCache;

    fn cache() -> ExpiringCache<String, u32> {
        ExpiringCache::new(Duration::from_millis(1000), Duration::from_millis(2000))
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_read_hits() {
        let c = cache();
        c.insert("a".to_string(), 1);

        advance(Duration::from_millis(999)).await;
        assert_eq!(c.get_fresh(&"a".to_string()), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_read_misses_but_entry_survives() {
        let c = cache();
        c.insert("a".to_string(), 1);

        advance(Duration::from_millis(1500)).await;
        assert_eq!(c.get_fresh(&"a".to_string()), None);
        assert_eq!(c.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_timer_bounds_memory() {
        let c = cache();
        c.insert("a".to_string(), 1);

        advance(Duration::from_millis(2100)).await;
        yield_now().await;
        assert!(c.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reinsert_supersedes_eviction_timer() {
        let c = cache();
        c.insert("a".to_string(), 1);

        advance(Duration::from_millis(1500)).await;
        c.insert("a".to_string(), 2);

        // The first entry's eviction deadline passes; the replacement must
        // not be collateral damage.
        advance(Duration::from_millis(600)).await;
        assert_eq!(c.get_fresh(&"a".to_string()), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_miss() {
        let c = cache();
        c.insert("a".to_string(), 1);
        c.invalidate(&"a".to_string());
        assert_eq!(c.get_fresh(&"a".to_string()), None);
        assert!(c.is_empty());
    }
}
