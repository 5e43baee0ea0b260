use crate::metrics::CacheStats;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Uniform key/value cache with TTL expiry
///
/// Every backend behaves the same from the outside. Reads that fail are
/// misses, writes that fail are counted and dropped, so a broken cache can
/// slow things down but never break the caller.
pub trait Cache: Send + Sync {
    /// Fetch a live entry. Expired entries are evicted here and reported as misses.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store `value` under `key`. `None` means the entry never expires.
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>);

    fn delete(&self, key: &str);

    /// Drop every entry in this cache's namespace
    fn clear(&self);

    /// Best-effort request to warm `key` in the background. Dropped when the queue is full.
    fn prefetch(&self, key: &str);

    /// Flush and stop background work. Safe to call more than once.
    fn close(&self);

    fn metrics(&self) -> CacheStats;

    /// Short backend name for logs ("memory", "sqlite", ...)
    fn backend(&self) -> &'static str;
}

/// Typed helpers on top of the byte-level cache, JSON-encoded
pub trait CacheExt: Cache {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key)?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Cached value for {} has unexpected shape: {}", key, e);
                None
            }
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, &bytes, ttl),
            Err(e) => warn!("Failed to serialize value for {}: {}", key, e),
        }
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}
