use crate::cache::Cache;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::metrics::{CacheMetrics, CacheStats};
use crate::prefetch::PrefetchQueue;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Persistent cache on an LSM tree (fjall)
///
/// Write-heavy workloads like score caching land in the memtable and get
/// compacted in the background. One partition per bucket.
///
/// `clear` swaps in a fresh partition and deletes the old one, so the live
/// partition is `{bucket}` at first and `{bucket}#{generation}` after clears.
/// The current generation is kept in a small `{bucket}$meta` partition.
pub struct LsmCache {
    keyspace: Keyspace,
    bucket: String,
    meta: PartitionHandle,
    live: RwLock<Generation>,
    metrics: Arc<CacheMetrics>,
    prefetch: PrefetchQueue,
}

struct Generation {
    number: u64,
    partition: PartitionHandle,
}

const GENERATION_KEY: &str = "generation";

fn partition_name(bucket: &str, generation: u64) -> String {
    if generation == 0 {
        bucket.to_string()
    } else {
        format!("{}#{}", bucket, generation)
    }
}

impl LsmCache {
    pub fn open(dir: &Path, bucket: &str, prefetch_queue_size: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let keyspace = Config::new(dir).open()?;
        let meta = keyspace.open_partition(
            &format!("{}$meta", bucket),
            PartitionCreateOptions::default(),
        )?;

        let number = match meta.get(GENERATION_KEY.as_bytes())? {
            Some(raw) => <[u8; 8]>::try_from(&*raw)
                .map(u64::from_be_bytes)
                .unwrap_or_default(),
            None => 0,
        };
        let partition = keyspace.open_partition(
            &partition_name(bucket, number),
            PartitionCreateOptions::default(),
        )?;

        // A crash between swapping generations and deleting the old one leaves it behind
        if number > 0 {
            let stale = partition_name(bucket, number - 1);
            if keyspace.partition_exists(&stale) {
                let handle = keyspace.open_partition(&stale, PartitionCreateOptions::default())?;
                keyspace.delete_partition(handle)?;
                debug!("Removed stale LSM partition {}", stale);
            }
        }
        info!("Opened LSM cache at {:?} (bucket {}, generation {})", dir, bucket, number);

        let metrics = Arc::new(CacheMetrics::new());
        let prefetch = PrefetchQueue::spawn("lsm", prefetch_queue_size, Arc::clone(&metrics))?;

        Ok(Self {
            keyspace,
            bucket: bucket.to_string(),
            meta,
            live: RwLock::new(Generation { number, partition }),
            metrics,
            prefetch,
        })
    }

    fn partition(&self) -> PartitionHandle {
        self.live.read().partition.clone()
    }

    fn remove_key(&self, key: &str) {
        if let Err(e) = self.partition().remove(key.as_bytes()) {
            warn!("Failed to delete cache key {}: {}", key, e);
            self.metrics.record_error();
        }
    }

    /// Open the next generation, record it, then drop the old partition.
    /// Readers see either the old contents or an empty bucket, never a mix.
    fn swap_generation(&self) -> Result<u64> {
        let mut live = self.live.write();
        let next = live.number + 1;
        let fresh = self.keyspace.open_partition(
            &partition_name(&self.bucket, next),
            PartitionCreateOptions::default(),
        )?;
        self.meta.insert(GENERATION_KEY.as_bytes(), next.to_be_bytes().to_vec())?;
        self.keyspace.persist(PersistMode::SyncAll)?;

        let old = std::mem::replace(
            &mut *live,
            Generation {
                number: next,
                partition: fresh,
            },
        );
        drop(live);

        self.keyspace.delete_partition(old.partition)?;
        Ok(next)
    }
}

impl Cache for LsmCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.metrics.record_get();

        let blob = match self.partition().get(key.as_bytes()) {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                self.metrics.record_miss();
                return None;
            }
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                self.metrics.record_error();
                self.metrics.record_miss();
                return None;
            }
        };

        match Envelope::decode(&blob) {
            Ok(envelope) if !envelope.is_expired() => {
                self.metrics.record_hit();
                Some(envelope.value)
            }
            Ok(_) => {
                self.remove_key(key);
                self.metrics.record_miss();
                None
            }
            Err(e) => {
                warn!("Dropping undecodable cache entry {}: {}", key, e);
                self.metrics.record_error();
                self.remove_key(key);
                self.metrics.record_miss();
                None
            }
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) {
        self.metrics.record_set();

        let encoded = match Envelope::new(value, ttl).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode cache entry {}: {}", key, e);
                self.metrics.record_error();
                return;
            }
        };

        if let Err(e) = self.partition().insert(key.as_bytes(), encoded) {
            warn!("Cache write failed for {}: {}", key, e);
            self.metrics.record_error();
        }
    }

    fn delete(&self, key: &str) {
        self.metrics.record_delete();
        self.remove_key(key);
    }

    fn clear(&self) {
        self.metrics.record_clear();
        match self.swap_generation() {
            Ok(generation) => debug!("Cleared LSM cache, now at generation {}", generation),
            Err(e) => {
                warn!("Failed to clear LSM cache: {}", e);
                self.metrics.record_error();
            }
        }
    }

    fn prefetch(&self, key: &str) {
        self.prefetch.enqueue(key);
    }

    fn close(&self) {
        self.prefetch.shutdown();
        if let Err(e) = self.keyspace.persist(PersistMode::SyncAll) {
            warn!("Failed to persist LSM cache on close: {}", e);
            self.metrics.record_error();
        }
    }

    fn metrics(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    fn backend(&self) -> &'static str {
        "lsm"
    }
}

impl Drop for LsmCache {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = LsmCache::open(dir.path(), "notifications", 8).unwrap();

        cache.set("k", b"v", None);
        assert_eq!(cache.get("k"), Some(b"v".to_vec()));

        cache.delete("k");
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let cache = LsmCache::open(dir.path(), "notifications", 8).unwrap();

        for i in 0..10 {
            cache.set(&format!("key-{}", i), b"v", None);
        }
        cache.clear();

        for i in 0..10 {
            assert_eq!(cache.get(&format!("key-{}", i)), None);
        }
        assert_eq!(cache.metrics().errors, 0);
    }

    #[test]
    fn test_expired_entry_removed_on_read() {
        let dir = TempDir::new().unwrap();
        let cache = LsmCache::open(dir.path(), "notifications", 8).unwrap();

        cache.set("short", b"x", Some(Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.get("short"), None);
        assert!(cache.partition().get("short".as_bytes()).unwrap().is_none());
    }

    #[test]
    fn test_clear_drops_the_old_partition() {
        let dir = TempDir::new().unwrap();
        let cache = LsmCache::open(dir.path(), "notifications", 8).unwrap();

        cache.set("a", b"1", None);
        cache.clear();
        cache.clear();

        assert!(!cache.keyspace.partition_exists("notifications"));
        assert!(!cache.keyspace.partition_exists("notifications#1"));
        assert!(cache.keyspace.partition_exists("notifications#2"));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn test_cleared_generation_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = LsmCache::open(dir.path(), "notifications", 8).unwrap();
            cache.set("old", b"1", None);
            cache.clear();
            cache.set("new", b"2", None);
            cache.close();
        }

        let cache = LsmCache::open(dir.path(), "notifications", 8).unwrap();
        assert_eq!(cache.get("old"), None);
        assert_eq!(cache.get("new"), Some(b"2".to_vec()));
        assert_eq!(cache.metrics().errors, 0);
    }
}
