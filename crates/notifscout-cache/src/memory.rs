use crate::cache::Cache;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::metrics::{CacheMetrics, CacheStats};
use crate::prefetch::PrefetchQueue;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Volatile in-process cache
///
/// Readers share the lock; expired entries are only removed when a `get`
/// trips over them.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Envelope>>,
    metrics: Arc<CacheMetrics>,
    prefetch: PrefetchQueue,
}

impl MemoryCache {
    pub fn new(prefetch_queue_size: usize) -> Result<Self> {
        let metrics = Arc::new(CacheMetrics::new());
        let prefetch = PrefetchQueue::spawn("memory", prefetch_queue_size, Arc::clone(&metrics))?;

        Ok(Self {
            entries: RwLock::new(HashMap::new()),
            metrics,
            prefetch,
        })
    }

    /// Number of stored entries, expired ones included until they're read
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.metrics.record_get();

        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => {
                    self.metrics.record_miss();
                    return None;
                }
                Some(entry) if !entry.is_expired() => {
                    self.metrics.record_hit();
                    return Some(entry.value.clone());
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write();
        // Someone may have refreshed it between the two locks
        if entries.get(key).is_some_and(|e| e.is_expired()) {
            trace!("Evicting expired key {}", key);
            entries.remove(key);
        }
        self.metrics.record_miss();
        None
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) {
        self.metrics.record_set();
        self.entries
            .write()
            .insert(key.to_string(), Envelope::new(value, ttl));
    }

    fn delete(&self, key: &str) {
        self.metrics.record_delete();
        self.entries.write().remove(key);
    }

    fn clear(&self) {
        self.metrics.record_clear();
        self.entries.write().clear();
    }

    fn prefetch(&self, key: &str) {
        self.prefetch.enqueue(key);
    }

    fn close(&self) {
        self.prefetch.shutdown();
    }

    fn metrics(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let cache = MemoryCache::new(8).unwrap();
        cache.set("a", b"1", None);
        assert_eq!(cache.get("a"), Some(b"1".to_vec()));

        cache.delete("a");
        assert_eq!(cache.get("a"), None);

        let stats = cache.metrics();
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_expired_entry_is_evicted_on_read() {
        let cache = MemoryCache::new(8).unwrap();
        cache.set("short", b"x", Some(Duration::from_millis(10)));
        assert_eq!(cache.get("short"), Some(b"x".to_vec()));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("short"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = MemoryCache::new(8).unwrap();
        cache.set("a", b"1", None);
        cache.set("b", b"2", None);
        cache.clear();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.metrics().clears, 1);
    }

    #[test]
    fn test_concurrent_writers() {
        let cache = Arc::new(MemoryCache::new(8).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.set(&format!("{}-{}", t, i), b"v", None);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 400);
    }
}
