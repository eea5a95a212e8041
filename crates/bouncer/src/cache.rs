//! Bounded LRU cache of compiled capability patterns.
//!
//! The engine matches every action and resource against manifest patterns;
//! compiling them once and reusing the matcher keeps the hot path at a
//! hash lookup. Concurrent readers share the map; insertion happens under
//! the same short lock, bounded by `max_size` with least-recently-used
//! eviction. Hit/miss counters are observable.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use aigos_identity::patterns::{Pattern, PatternError};

/// Observable cache counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

#[derive(Debug, Default)]
struct Inner {
    map: HashMap<(String, bool), Pattern>,
    // Recency queue; front is oldest.
    order: VecDeque<(String, bool)>,
    hits: u64,
    misses: u64,
}

/// Compiled-pattern LRU keyed by `(raw pattern, is_domain)`.
#[derive(Debug)]
pub struct PatternCache {
    max_size: usize,
    inner: Mutex<Inner>,
}

impl PatternCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Fetch the compiled form of `raw`, compiling on miss.
    pub fn get_or_compile(&self, raw: &str, domain: bool) -> Result<Pattern, PatternError> {
        let key = (raw.to_string(), domain);
        let mut inner = self.inner.lock();

        if let Some(pattern) = inner.map.get(&key).cloned() {
            inner.hits += 1;
            // Refresh recency.
            if let Some(pos) = inner.order.iter().position(|k| k == &key) {
                inner.order.remove(pos);
            }
            inner.order.push_back(key);
            return Ok(pattern);
        }

        inner.misses += 1;
        let pattern = if domain {
            Pattern::compile_domain(raw)?
        } else {
            Pattern::compile_tool(raw)?
        };

        while inner.map.len() >= self.max_size {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
            } else {
                break;
            }
        }
        inner.map.insert(key.clone(), pattern.clone());
        inner.order.push_back(key);
        Ok(pattern)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.map.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_miss_accounting() {
        let cache = PatternCache::new(8);
        cache.get_or_compile("db:*", false).unwrap();
        cache.get_or_compile("db:*", false).unwrap();
        cache.get_or_compile("admin:*", false).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.size, 2);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = PatternCache::new(2);
        cache.get_or_compile("a*", false).unwrap();
        cache.get_or_compile("b*", false).unwrap();
        // Touch "a*" so "b*" becomes the eviction candidate.
        cache.get_or_compile("a*", false).unwrap();
        cache.get_or_compile("c*", false).unwrap();

        assert_eq!(cache.stats().size, 2);
        // "a*" survived (hit), "b*" was evicted (miss on re-fetch).
        let before = cache.stats();
        cache.get_or_compile("a*", false).unwrap();
        assert_eq!(cache.stats().hits, before.hits + 1);
        cache.get_or_compile("b*", false).unwrap();
        assert_eq!(cache.stats().misses, before.misses + 1);
    }

    #[test]
    fn test_tool_and_domain_keys_are_distinct() {
        let cache = PatternCache::new(8);
        cache.get_or_compile("*.example.com", true).unwrap();
        cache.get_or_compile("*.example.com", false).unwrap();
        assert_eq!(cache.stats().size, 2);
    }

    #[test]
    fn test_compile_error_propagates() {
        let cache = PatternCache::new(8);
        assert!(cache.get_or_compile("in*valid", false).is_err());
        assert_eq!(cache.stats().size, 0);
    }
}
