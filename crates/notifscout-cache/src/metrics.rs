use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared between a cache and its prefetch worker
#[derive(Debug, Default)]
pub struct CacheMetrics {
    gets: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    clears: AtomicU64,
    prefetches: AtomicU64,
    prefetch_dropped: AtomicU64,
    prefetch_processed: AtomicU64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        record_get => gets,
        record_set => sets,
        record_delete => deletes,
        record_hit => hits,
        record_miss => misses,
        record_error => errors,
        record_clear => clears,
        record_prefetch => prefetches,
        record_prefetch_dropped => prefetch_dropped,
        record_prefetch_processed => prefetch_processed,
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            gets: self.gets.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
            prefetches: self.prefetches.load(Ordering::Relaxed),
            prefetch_dropped: self.prefetch_dropped.load(Ordering::Relaxed),
            prefetch_processed: self.prefetch_processed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a cache's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub gets: u64,
    pub sets: u64,
    pub deletes: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub clears: u64,
    pub prefetches: u64,
    pub prefetch_dropped: u64,
    pub prefetch_processed: u64,
}

impl CacheStats {
    /// Fraction of gets that hit, 0.0 when nothing was read yet
    pub fn hit_rate(&self) -> f64 {
        if self.gets == 0 {
            0.0
        } else {
            self.hits as f64 / self.gets as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_hit_rate() {
        let metrics = CacheMetrics::new();
        metrics.record_get();
        metrics.record_hit();
        metrics.record_get();
        metrics.record_miss();
        metrics.record_error();

        let stats = metrics.snapshot();
        assert_eq!(stats.gets, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.errors, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
