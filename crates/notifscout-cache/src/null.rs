use crate::cache::Cache;
use crate::metrics::CacheStats;
use std::time::Duration;

/// Cache that remembers nothing. Lets callers switch caching off without branching.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl NullCache {
    pub fn new() -> Self {
        Self
    }
}

impl Cache for NullCache {
    fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    fn set(&self, _key: &str, _value: &[u8], _ttl: Option<Duration>) {}

    fn delete(&self, _key: &str) {}

    fn clear(&self) {}

    fn prefetch(&self, _key: &str) {}

    fn close(&self) {}

    fn metrics(&self) -> CacheStats {
        CacheStats::default()
    }

    fn backend(&self) -> &'static str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_misses() {
        let cache = NullCache::new();
        cache.set("k", b"v", None);
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.metrics(), CacheStats::default());
    }
}
