use moka::sync::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Query embedding cache keyed by query text
///
/// Repeated queries (and the identical text sent to several sources of one
/// hybrid query) skip the embedding round-trip.
pub struct QueryCache {
    cache: Cache<String, Arc<Vec<f32>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    capacity: u64,
}

impl QueryCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: Cache::new(capacity),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            capacity,
        }
    }

    /// Look up an embedding, counting the hit or miss
    pub fn get(&self, text: &str) -> Option<Arc<Vec<f32>>> {
        match self.cache.get(text) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, text: &str, embedding: Arc<Vec<f32>>) {
        if self.capacity > 0 {
            self.cache.insert(text.to_string(), embedding);
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.cache.entry_count(),
            capacity: self.capacity,
        }
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: u64,
    pub capacity: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache() {
        let cache = QueryCache::new(100);

        assert!(cache.get("schools").is_none());
        cache.insert("schools", Arc::new(vec![1.0, 2.0, 3.0]));
        assert_eq!(*cache.get("schools").unwrap(), vec![1.0, 2.0, 3.0]);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_zero_capacity_never_stores() {
        let cache = QueryCache::new(0);
        cache.insert("q", Arc::new(vec![1.0]));
        assert!(cache.get("q").is_none());
    }

    #[test]
    fn test_clear_resets_counters() {
        let cache = QueryCache::new(10);
        cache.insert("q", Arc::new(vec![1.0]));
        let _ = cache.get("q");
        cache.clear();

        assert!(cache.get("q").is_none());
        assert_eq!(cache.stats().hits, 0);
    }
}
