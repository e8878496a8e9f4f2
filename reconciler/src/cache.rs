//! The state cache (§4.9): a bounded, TTL'd cache of discovered
//! [`ProjectState`]s keyed by project id, with a background sweep task the
//! caller starts and stops explicitly (mirroring the registry's
//! `start()`/`stop()` lifecycle this workspace has always used).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reconciler_common::ProjectState;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

struct Entry {
    state: ProjectState,
    inserted_at: Instant,
    last_used: Instant,
}

/// Point-in-time counters for `StateCache::stats`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// 0.0 when no accesses have happened yet, rather than NaN.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Inner {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
    stop: Notify,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// An LRU cache of `ProjectState`, bounded by `capacity` and expiring
/// entries after `ttl`. Eviction is both lazy (on `get`) and eager (the
/// background sweep task started by `start()`).
#[derive(Clone)]
pub struct StateCache {
    inner: Arc<Inner>,
}

impl StateCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                ttl,
                entries: Mutex::new(HashMap::new()),
                stop: Notify::new(),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the cached state for `project_id`, evicting it first if its
    /// TTL has elapsed.
    pub fn get(&self, project_id: &str) -> Option<ProjectState> {
        let mut entries = self.inner.entries.lock();
        let expired = entries
            .get(project_id)
            .map(|e| e.inserted_at.elapsed() >= self.inner.ttl)
            .unwrap_or(false);
        if expired {
            entries.remove(project_id);
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        match entries.get_mut(project_id) {
            Some(entry) => {
                entry.last_used = Instant::now();
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.state.clone())
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
        }
    }

    /// Evicts every entry and resets the hit/miss counters.
    pub fn clear(&self) {
        self.inner.entries.lock().clear();
        self.inner.hits.store(0, Ordering::Relaxed);
        self.inner.misses.store(0, Ordering::Relaxed);
    }

    pub fn put(&self, project_id: impl Into<String>, state: ProjectState) {
        let mut entries = self.inner.entries.lock();
        let now = Instant::now();
        entries.insert(
            project_id.into(),
            Entry {
                state,
                inserted_at: now,
                last_used: now,
            },
        );
        Self::evict_over_capacity(&mut entries, self.inner.capacity);
    }

    pub fn invalidate(&self, project_id: &str) {
        self.inner.entries.lock().remove(project_id);
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    fn evict_over_capacity(entries: &mut HashMap<String, Entry>, capacity: usize) {
        while entries.len() > capacity {
            if let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest_key);
            } else {
                break;
            }
        }
    }

    fn sweep_expired(&self) {
        let mut entries = self.inner.entries.lock();
        let ttl = self.inner.ttl;
        let before = entries.len();
        entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "state cache swept expired entries");
        }
    }

    /// Spawns the background sweep task, running every `sweep_period` until
    /// `stop()` is called. The returned handle is also awaited by `stop()`.
    pub fn start(&self, sweep_period: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(sweep_period) => {
                        cache.sweep_expired();
                    }
                    _ = cache.inner.stop.notified() => {
                        return;
                    }
                }
            }
        })
    }

    /// Signals the background sweep task to stop. Idempotent; safe to call
    /// even if `start()` was never called (the notification is simply never
    /// observed).
    pub fn stop(&self) {
        self.inner.stop.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let cache = StateCache::new(10, Duration::from_secs(60));
        cache.put("proj-1", ProjectState::default());
        assert!(cache.get("proj-1").is_some());
    }

    #[test]
    fn expired_entries_are_evicted_lazily() {
        let cache = StateCache::new(10, Duration::from_millis(0));
        cache.put("proj-1", ProjectState::default());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("proj-1").is_none());
    }

    #[test]
    fn stats_report_hits_misses_and_hit_rate() {
        let cache = StateCache::new(10, Duration::from_secs(60));
        cache.put("proj-1", ProjectState::default());
        cache.get("proj-1");
        cache.get("missing");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn hit_rate_is_zero_with_no_accesses() {
        let cache = StateCache::new(10, Duration::from_secs(60));
        assert_eq!(cache.stats().hit_rate(), 0.0);
    }

    #[test]
    fn clear_resets_entries_and_counters() {
        let cache = StateCache::new(10, Duration::from_secs(60));
        cache.put("proj-1", ProjectState::default());
        cache.get("proj-1");
        cache.clear();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn capacity_evicts_the_least_recently_used_entry() {
        let cache = StateCache::new(2, Duration::from_secs(60));
        cache.put("a", ProjectState::default());
        std::thread::sleep(Duration::from_millis(2));
        cache.put("b", ProjectState::default());
        std::thread::sleep(Duration::from_millis(2));
        // touch "a" so "b" becomes the least recently used
        cache.get("a");
        std::thread::sleep(Duration::from_millis(2));
        cache.put("c", ProjectState::default());
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[tokio::test]
    async fn start_and_stop_do_not_hang() {
        let cache = StateCache::new(10, Duration::from_millis(5));
        let handle = cache.start(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.stop();
        handle.await.unwrap();
    }
}
